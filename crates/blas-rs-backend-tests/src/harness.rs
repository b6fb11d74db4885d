//! Plumbing shared by the suites: handles on private devices, seeded operands and the host
//! oracle evaluated next to every device call.

use std::mem;
use std::sync::Arc;

use blas_rs::kernel::BlasKernels;
use blas_rs::{
    api, DataType, Device, DeviceBuffer, GemmFamily, GemmStridedBatchedEx, Handle, MatrixArg,
    Operation, PointerMode, Scalar, ScalarArg, Status,
};
use blas_rs_backend_ref_cpu::reference::{self, BatchLayout, HostElement};
use bytemuck::Pod;
use half::f16;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Capacity of the private device each test handle runs on.
pub const DEVICE_BYTES: u64 = 64 << 20;

pub const FAMILIES: [GemmFamily; 4] = [
    GemmFamily::Hgemm,
    GemmFamily::HgemmHpa,
    GemmFamily::Sgemm,
    GemmFamily::Dgemm,
];

pub const TRANSPOSE_PAIRS: [(Operation, Operation); 4] = [
    (Operation::NoTranspose, Operation::NoTranspose),
    (Operation::NoTranspose, Operation::Transpose),
    (Operation::Transpose, Operation::NoTranspose),
    (Operation::Transpose, Operation::Transpose),
];

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A handle on a fresh device so capacity and pointer queries never see other tests.
pub fn test_handle(kernels: Arc<dyn BlasKernels>, mode: PointerMode) -> Handle {
    init_logging();
    let mut handle =
        Handle::with_kernels(Device::new(DEVICE_BYTES), kernels).expect("failed to create handle");
    handle.set_pointer_mode(mode);
    handle
}

/// Element types the suites stage on the device.
pub trait Element: HostElement + Pod {}

impl<T: HostElement + Pod> Element for T {}

/// Distribution operand values are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Values {
    /// Integers in `[-4, 4]`: every family computes these products exactly.
    SmallIntegers,
    /// Uniform in `[-1, 1)`.
    Uniform,
}

fn host_data<T: Element>(rng: &mut StdRng, len: usize, values: Values) -> Vec<T> {
    (0..len)
        .map(|_| {
            let value = match values {
                Values::SmallIntegers => f64::from(rng.gen_range(-4i32..=4)),
                Values::Uniform => rng.gen_range(-1.0..1.0),
            };
            T::from_f64(value)
        })
        .collect()
}

pub fn host_scalar(dtype: DataType, value: f64) -> Scalar {
    match dtype {
        DataType::F16 => Scalar::F16(f16::from_f64(value)),
        DataType::F32 => Scalar::F32(value as f32),
        _ => Scalar::F64(value),
    }
}

/// Uploads one scalar of `dtype` and returns its allocation.
pub fn device_scalar(device: &Device, dtype: DataType, value: f64) -> DeviceBuffer {
    let uploaded = match dtype {
        DataType::F16 => device.upload(&[f16::from_f64(value)]),
        DataType::F32 => device.upload(&[value as f32]),
        _ => device.upload(&[value]),
    };
    uploaded.expect("failed to upload scalar")
}

pub fn scalar_arg(device: &Device, dtype: DataType, value: f64, mode: PointerMode) -> ScalarArg {
    match mode {
        PointerMode::Host => ScalarArg::Host(host_scalar(dtype, value)),
        PointerMode::Device => ScalarArg::Device(device_scalar(device, dtype, value).ptr()),
    }
}

/// Elements an operand buffer needs to hold every batch element.
fn batch_span(stride: usize, extent: usize, batch_count: usize) -> usize {
    if extent == 0 || batch_count == 0 {
        0
    } else {
        stride * (batch_count - 1) + extent
    }
}

fn stored_shape(op: Operation, rows: usize, cols: usize) -> (usize, usize) {
    if op.is_transposed() {
        (cols, rows)
    } else {
        (rows, cols)
    }
}

/// Shape, layout and scalars of one strided-batched GEMM test problem.
#[derive(Debug, Clone)]
pub struct GemmCase {
    pub family: GemmFamily,
    pub trans_a: Operation,
    pub trans_b: Operation,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    /// Added to the minimum legal leading dimension of every operand.
    pub ld_pad: usize,
    pub batch_count: usize,
    pub alpha: f64,
    pub beta: f64,
    /// Explicit batch strides for A, B, C and D; packed with a gap of `ld_pad` when unset.
    pub strides: Option<[usize; 4]>,
    pub values: Values,
    pub seed: u64,
}

impl GemmCase {
    pub fn new(family: GemmFamily, m: usize, n: usize, k: usize) -> Self {
        Self {
            family,
            trans_a: Operation::NoTranspose,
            trans_b: Operation::NoTranspose,
            m,
            n,
            k,
            ld_pad: 0,
            batch_count: 1,
            alpha: 1.0,
            beta: 0.0,
            strides: None,
            values: Values::SmallIntegers,
            seed: 0x5eed,
        }
    }

    pub fn trans(mut self, trans_a: Operation, trans_b: Operation) -> Self {
        self.trans_a = trans_a;
        self.trans_b = trans_b;
        self
    }

    pub fn batch(mut self, batch_count: usize) -> Self {
        self.batch_count = batch_count;
        self
    }

    pub fn scalars(mut self, alpha: f64, beta: f64) -> Self {
        self.alpha = alpha;
        self.beta = beta;
        self
    }

    pub fn padded(mut self, ld_pad: usize) -> Self {
        self.ld_pad = ld_pad;
        self
    }

    pub fn strides(mut self, a: usize, b: usize, c: usize, d: usize) -> Self {
        self.strides = Some([a, b, c, d]);
        self
    }

    pub fn values(mut self, values: Values) -> Self {
        self.values = values;
        self
    }

    pub fn layout(&self) -> BatchLayout {
        let (a_rows, a_cols) = stored_shape(self.trans_a, self.m, self.k);
        let (b_rows, b_cols) = stored_shape(self.trans_b, self.k, self.n);
        let lda = a_rows.max(1) + self.ld_pad;
        let ldb = b_rows.max(1) + self.ld_pad;
        let ldc = self.m.max(1) + self.ld_pad;
        let ldd = self.m.max(1) + self.ld_pad;
        let packed = [
            extent(a_rows, a_cols, lda),
            extent(b_rows, b_cols, ldb),
            extent(self.m, self.n, ldc),
            extent(self.m, self.n, ldd),
        ]
        .map(|extent| extent + self.ld_pad);
        let [stride_a, stride_b, stride_c, stride_d] = self.strides.unwrap_or(packed);
        BatchLayout {
            trans_a: self.trans_a,
            trans_b: self.trans_b,
            m: self.m,
            n: self.n,
            k: self.k,
            lda,
            ldb,
            ldc,
            ldd,
            stride_a,
            stride_b,
            stride_c,
            stride_d,
            batch_count: self.batch_count,
        }
    }

    /// Alpha as the kernels see it, rounded to the compute type.
    pub fn alpha_rounded(&self) -> f64 {
        host_scalar(self.family.compute_type(), self.alpha).to_f64()
    }

    pub fn beta_rounded(&self) -> f64 {
        host_scalar(self.family.compute_type(), self.beta).to_f64()
    }
}

fn extent(rows: usize, cols: usize, ld: usize) -> usize {
    reference::extent(rows, cols, ld).expect("test operand extent overflows")
}

/// Device buffers for one [`GemmCase`] plus the host copies they were seeded from.
pub struct GemmFixture<T> {
    pub case: GemmCase,
    pub layout: BatchLayout,
    pub device: Device,
    pub a: Vec<T>,
    pub b: Vec<T>,
    pub c: Vec<T>,
    /// Contents of D before the call.
    pub d: Vec<T>,
    pub a_buf: DeviceBuffer,
    pub b_buf: DeviceBuffer,
    pub c_buf: DeviceBuffer,
    pub d_buf: DeviceBuffer,
}

impl<T: Element> GemmFixture<T> {
    pub fn new(device: &Device, case: &GemmCase) -> Self {
        assert_eq!(
            mem::size_of::<T>(),
            case.family.storage_bytes(),
            "fixture element type does not match {}",
            case.family
        );
        let layout = case.layout();
        let (a_rows, a_cols) = stored_shape(layout.trans_a, layout.m, layout.k);
        let (b_rows, b_cols) = stored_shape(layout.trans_b, layout.k, layout.n);
        let batch = layout.batch_count;
        let lens = [
            batch_span(
                layout.stride_a,
                extent(a_rows, a_cols, layout.lda),
                batch,
            ),
            batch_span(
                layout.stride_b,
                extent(b_rows, b_cols, layout.ldb),
                batch,
            ),
            batch_span(
                layout.stride_c,
                extent(layout.m, layout.n, layout.ldc),
                batch,
            ),
            batch_span(
                layout.stride_d,
                extent(layout.m, layout.n, layout.ldd),
                batch,
            ),
        ];

        let mut rng = StdRng::seed_from_u64(case.seed);
        let [a, b, c, d] = lens.map(|len| host_data::<T>(&mut rng, len, case.values));
        let upload = |values: &[T]| device.upload(values).expect("failed to upload operand");
        Self {
            case: case.clone(),
            layout,
            device: device.clone(),
            a_buf: upload(&a),
            b_buf: upload(&b),
            c_buf: upload(&c),
            d_buf: upload(&d),
            a,
            b,
            c,
            d,
        }
    }

    /// Arguments addressing the fixture's buffers, with scalars placed for `mode`.
    pub fn args(&self, mode: PointerMode) -> GemmStridedBatchedEx {
        let case = &self.case;
        let layout = &self.layout;
        let storage = case.family.storage_type();
        let compute = case.family.compute_type();
        let matrix = |buffer: &DeviceBuffer, ld: usize, stride: usize| {
            MatrixArg::new(buffer.ptr(), storage, ld as i64, stride as i64)
        };
        GemmStridedBatchedEx {
            trans_a: case.trans_a,
            trans_b: case.trans_b,
            m: case.m as i64,
            n: case.n as i64,
            k: case.k as i64,
            alpha: scalar_arg(&self.device, compute, case.alpha, mode),
            a: matrix(&self.a_buf, layout.lda, layout.stride_a),
            b: matrix(&self.b_buf, layout.ldb, layout.stride_b),
            beta: scalar_arg(&self.device, compute, case.beta, mode),
            c: matrix(&self.c_buf, layout.ldc, layout.stride_c),
            d: matrix(&self.d_buf, layout.ldd, layout.stride_d),
            batch_count: case.batch_count as i64,
            compute_type: compute,
        }
    }

    /// Overwrites every element of C, on the host copy and on the device.
    pub fn fill_c(&mut self, value: f64) {
        self.c.iter_mut().for_each(|x| *x = T::from_f64(value));
        self.c_buf
            .ptr()
            .write(&self.c)
            .expect("failed to rewrite c");
    }

    /// D as the oracle computes it from the fixture's host copies.
    pub fn expected(&self) -> Vec<f64> {
        self.expected_with_c(&self.c)
    }

    /// Oracle result when C is D's own initial contents.
    pub fn expected_in_place(&self) -> Vec<f64> {
        self.expected_with_c(&self.d)
    }

    fn expected_with_c(&self, c: &[T]) -> Vec<f64> {
        let mut d = self.d.clone();
        reference::gemm_strided_batched(
            &self.layout,
            self.case.alpha_rounded(),
            &self.a,
            &self.b,
            self.case.beta_rounded(),
            Some(c),
            &mut d,
        )
        .expect("oracle rejected the case");
        d.into_iter().map(HostElement::to_f64).collect()
    }

    /// Current device contents of D.
    pub fn device_d(&self) -> Vec<f64> {
        self.d_buf
            .download::<T>()
            .into_iter()
            .map(HostElement::to_f64)
            .collect()
    }
}

/// Runs `args` through the status API and waits for the stream.
pub fn execute(handle: &Handle, args: &GemmStridedBatchedEx) {
    let status = api::gemm_strided_batched_ex(Some(handle), args);
    assert_eq!(status, Status::Success, "gemm_strided_batched_ex failed");
    handle.synchronize().expect("stream reported an error");
}

/// Largest acceptable deviation from the f64 oracle, relative to `max(1, |expected|)`.
pub fn tolerance(family: GemmFamily) -> f64 {
    match family {
        GemmFamily::Hgemm => 1e-2,
        GemmFamily::HgemmHpa => 2e-3,
        GemmFamily::Sgemm => 1e-4,
        GemmFamily::Dgemm => 1e-10,
    }
}

pub fn assert_close(family: GemmFamily, got: &[f64], want: &[f64], context: &str) {
    assert_eq!(got.len(), want.len(), "{context}: length mismatch");
    let tol = tolerance(family);
    for (index, (g, w)) in got.iter().zip(want).enumerate() {
        let bound = tol * w.abs().max(1.0);
        let diff = (g - w).abs();
        // Written so that NaN fails.
        if !(diff <= bound) {
            panic!("{context}: element {index} is {g}, expected {w} (tolerance {bound})");
        }
    }
}

/// Runs `case` end to end in `mode` and returns the device result next to the oracle's.
pub fn run_case(
    kernels: &Arc<dyn BlasKernels>,
    case: &GemmCase,
    mode: PointerMode,
) -> (Vec<f64>, Vec<f64>) {
    match case.family.storage_type() {
        DataType::F16 => run_typed::<f16>(kernels, case, mode),
        DataType::F32 => run_typed::<f32>(kernels, case, mode),
        _ => run_typed::<f64>(kernels, case, mode),
    }
}

fn run_typed<T: Element>(
    kernels: &Arc<dyn BlasKernels>,
    case: &GemmCase,
    mode: PointerMode,
) -> (Vec<f64>, Vec<f64>) {
    let handle = test_handle(Arc::clone(kernels), mode);
    let fixture = GemmFixture::<T>::new(handle.device(), case);
    execute(&handle, &fixture.args(mode));
    (fixture.device_d(), fixture.expected())
}
