//! Strided-batched GEMM conformance checks, parameterized over a kernel set.

use std::sync::Arc;

use blas_rs::kernel::BlasKernels;
use blas_rs::{
    DevicePtr, GemmFamily, GemmStridedBatchedEx, MatrixArg, Operation, PointerMode, ScalarArg,
};
use blas_rs_backend_ref_cpu::reference;
use half::f16;

use crate::harness::{
    assert_close, execute, host_scalar, run_case, test_handle, Element, GemmCase, GemmFixture,
    Values, FAMILIES, TRANSPOSE_PAIRS,
};

pub fn every_family_and_transpose_matches_reference(kernels: Arc<dyn BlasKernels>) {
    for family in FAMILIES {
        for (trans_a, trans_b) in TRANSPOSE_PAIRS {
            for ld_pad in [0, 2] {
                let case = GemmCase::new(family, 5, 3, 7)
                    .trans(trans_a, trans_b)
                    .batch(2)
                    .scalars(2.0, 0.5)
                    .padded(ld_pad);
                let (got, want) = run_case(&kernels, &case, PointerMode::Host);
                assert_close(
                    family,
                    &got,
                    &want,
                    &format!("{family} {}{} ld_pad={ld_pad}", trans_a, trans_b),
                );
            }
        }
    }
}

pub fn uniform_values_stay_within_tolerance(kernels: Arc<dyn BlasKernels>) {
    for family in [GemmFamily::Sgemm, GemmFamily::Dgemm] {
        let case = GemmCase::new(family, 17, 13, 37)
            .trans(Operation::Transpose, Operation::NoTranspose)
            .batch(2)
            .scalars(0.75, -1.25)
            .padded(1)
            .values(Values::Uniform);
        let (got, want) = run_case(&kernels, &case, PointerMode::Host);
        assert_close(family, &got, &want, &format!("{family} uniform"));
    }
}

/// Three independent 4x4 products laid out back to back.
pub fn packed_batch_of_three_matches_dense_products(kernels: Arc<dyn BlasKernels>) {
    let case = GemmCase::new(GemmFamily::Sgemm, 4, 4, 4)
        .trans(Operation::NoTranspose, Operation::Transpose)
        .batch(3)
        .strides(16, 16, 16, 16);
    let handle = test_handle(kernels, PointerMode::Host);
    let fixture = GemmFixture::<f32>::new(handle.device(), &case);
    execute(&handle, &fixture.args(PointerMode::Host));
    let got = fixture.d_buf.download::<f32>();

    for index in 0..3 {
        let slice = |values: &[f32]| values[index * 16..(index + 1) * 16].to_vec();
        let mut want = vec![0.0f32; 16];
        reference::gemm(
            Operation::NoTranspose,
            Operation::Transpose,
            4,
            4,
            4,
            1.0,
            &slice(&fixture.a),
            4,
            &slice(&fixture.b),
            4,
            0.0,
            None,
            4,
            &mut want,
            4,
        )
        .unwrap();
        assert_eq!(
            &got[index * 16..(index + 1) * 16],
            want.as_slice(),
            "batch element {index}"
        );
    }
}

/// With one batch element the strides must not matter.
pub fn single_element_ignores_strides(kernels: Arc<dyn BlasKernels>) {
    for family in FAMILIES {
        let case = GemmCase::new(family, 6, 4, 5).scalars(1.0, 1.0);
        let (packed, want) = run_case(&kernels, &case, PointerMode::Host);
        let broadcast_case = case.clone().strides(0, 0, 0, 0);
        let (broadcast, _) = run_case(&kernels, &broadcast_case, PointerMode::Host);
        assert_eq!(packed, broadcast, "{family}");
        assert_close(family, &packed, &want, &format!("{family} single element"));
    }
}

/// Host and device scalars with equal values give bitwise equal results.
pub fn pointer_modes_agree(kernels: Arc<dyn BlasKernels>) {
    for family in FAMILIES {
        let case = GemmCase::new(family, 4, 5, 6)
            .trans(Operation::Transpose, Operation::NoTranspose)
            .batch(3)
            .scalars(-1.5, 2.0)
            .padded(1);
        let (host, want) = run_case(&kernels, &case, PointerMode::Host);
        let (device, _) = run_case(&kernels, &case, PointerMode::Device);
        assert_eq!(host, device, "{family}");
        assert_close(family, &device, &want, &format!("{family} device scalars"));
    }
}

/// C is never read when beta is zero: NaNs do not leak, and C may be absent in host mode.
pub fn zero_beta_never_reads_c(kernels: Arc<dyn BlasKernels>) {
    let case = GemmCase::new(GemmFamily::Sgemm, 3, 5, 2).batch(2).scalars(3.0, 0.0);

    for mode in [PointerMode::Host, PointerMode::Device] {
        let handle = test_handle(Arc::clone(&kernels), mode);
        let mut fixture = GemmFixture::<f32>::new(handle.device(), &case);
        fixture.fill_c(f64::NAN);
        execute(&handle, &fixture.args(mode));
        let got = fixture.device_d();
        assert!(got.iter().all(|x| !x.is_nan()), "{mode:?}: NaN from C leaked into D");
        assert_close(GemmFamily::Sgemm, &got, &fixture.expected(), &format!("{mode:?}"));
    }

    let handle = test_handle(Arc::clone(&kernels), PointerMode::Host);
    let fixture = GemmFixture::<f32>::new(handle.device(), &case);
    let unreadable = handle.device().alloc(0).unwrap();
    for c_ptr in [DevicePtr::null(), unreadable.ptr()] {
        let mut args = fixture.args(PointerMode::Host);
        args.c.ptr = c_ptr;
        execute(&handle, &args);
        assert_close(
            GemmFamily::Sgemm,
            &fixture.device_d(),
            &fixture.expected(),
            "absent c",
        );
    }
}

/// A host alpha of zero leaves A and B unread, so they may be null.
pub fn zero_alpha_scales_c_only(kernels: Arc<dyn BlasKernels>) {
    for family in FAMILIES {
        let case = GemmCase::new(family, 4, 3, 5).batch(2).scalars(0.0, -2.0);
        let (got, want) = match family.storage_bytes() {
            2 => zero_alpha_run::<f16>(&kernels, &case),
            4 => zero_alpha_run::<f32>(&kernels, &case),
            _ => zero_alpha_run::<f64>(&kernels, &case),
        };
        assert_close(family, &got, &want, &format!("{family} alpha=0"));
    }
}

fn zero_alpha_run<T: Element>(
    kernels: &Arc<dyn BlasKernels>,
    case: &GemmCase,
) -> (Vec<f64>, Vec<f64>) {
    let handle = test_handle(Arc::clone(kernels), PointerMode::Host);
    let fixture = GemmFixture::<T>::new(handle.device(), case);
    let mut args = fixture.args(PointerMode::Host);
    args.a.ptr = DevicePtr::null();
    args.b.ptr = DevicePtr::null();
    execute(&handle, &args);
    (fixture.device_d(), fixture.expected())
}

/// An empty reduction still applies beta to C.
pub fn empty_reduction_scales_c(kernels: Arc<dyn BlasKernels>) {
    for family in FAMILIES {
        let case = GemmCase::new(family, 3, 4, 0).batch(2).scalars(1.0, 0.5);
        let (got, want) = run_case(&kernels, &case, PointerMode::Host);
        assert_close(family, &got, &want, &format!("{family} k=0"));
    }
}

/// D may be C: each element reads its own C before overwriting it.
pub fn in_place_update_matches_reference(kernels: Arc<dyn BlasKernels>) {
    let case = GemmCase::new(GemmFamily::Dgemm, 5, 4, 3)
        .trans(Operation::NoTranspose, Operation::Transpose)
        .batch(3)
        .scalars(2.0, 0.5)
        .padded(1);
    let handle = test_handle(kernels, PointerMode::Host);
    let fixture = GemmFixture::<f64>::new(handle.device(), &case);
    let mut args = fixture.args(PointerMode::Host);
    args.c = args.d.clone();
    execute(&handle, &args);
    assert_close(
        GemmFamily::Dgemm,
        &fixture.device_d(),
        &fixture.expected_in_place(),
        "c == d",
    );
}

/// Conjugation is the identity on real data.
pub fn conjugate_transpose_matches_transpose(kernels: Arc<dyn BlasKernels>) {
    for family in FAMILIES {
        let base = GemmCase::new(family, 3, 4, 5).batch(2).scalars(1.0, 1.0);
        let conjugate = base.clone().trans(
            Operation::ConjugateTranspose,
            Operation::ConjugateTranspose,
        );
        let transpose = base.trans(Operation::Transpose, Operation::Transpose);
        let (got, _) = run_case(&kernels, &conjugate, PointerMode::Host);
        let (want, _) = run_case(&kernels, &transpose, PointerMode::Host);
        assert_eq!(got, want, "{family}");
    }
}

/// Zero-stride D across the batch keeps the last element's product.
pub fn zero_stride_output_keeps_last_element(kernels: Arc<dyn BlasKernels>) {
    let base = GemmCase::new(GemmFamily::Sgemm, 3, 2, 4).batch(3);
    let layout = base.layout();
    let case = base.strides(layout.stride_a, layout.stride_b, layout.stride_c, 0);
    let handle = test_handle(kernels, PointerMode::Host);
    let fixture = GemmFixture::<f32>::new(handle.device(), &case);
    execute(&handle, &fixture.args(PointerMode::Host));

    let last = 2;
    let a = &fixture.a[last * layout.stride_a..];
    let b = &fixture.b[last * layout.stride_b..];
    let mut want = fixture.d.clone();
    reference::gemm(
        Operation::NoTranspose,
        Operation::NoTranspose,
        3,
        2,
        4,
        1.0,
        a,
        layout.lda,
        b,
        layout.ldb,
        0.0,
        None,
        layout.ldc,
        &mut want,
        layout.ldd,
    )
    .unwrap();
    assert_eq!(fixture.d_buf.download::<f32>(), want);
}

/// A 1x4096 dot product of ones: exact with f32 accumulation, never better with f16.
pub fn promoted_accumulation_is_exact(kernels: Arc<dyn BlasKernels>) {
    let k = 4096usize;
    let mut outcomes = Vec::new();
    for family in [GemmFamily::Hgemm, GemmFamily::HgemmHpa] {
        let handle = test_handle(Arc::clone(&kernels), PointerMode::Host);
        let device = handle.device();
        let ones = device.upload(&vec![f16::ONE; k]).unwrap();
        let d = device.upload(&[f16::ZERO]).unwrap();
        let storage = family.storage_type();
        let compute = family.compute_type();
        let args = GemmStridedBatchedEx {
            trans_a: Operation::NoTranspose,
            trans_b: Operation::NoTranspose,
            m: 1,
            n: 1,
            k: k as i64,
            alpha: ScalarArg::Host(host_scalar(compute, 1.0)),
            a: MatrixArg::new(ones.ptr(), storage, 1, 0),
            b: MatrixArg::new(ones.ptr(), storage, k as i64, 0),
            beta: ScalarArg::Host(host_scalar(compute, 0.0)),
            c: MatrixArg::new(DevicePtr::null(), storage, 1, 0),
            d: MatrixArg::new(d.ptr(), storage, 1, 0),
            batch_count: 1,
            compute_type: compute,
        };
        execute(&handle, &args);
        outcomes.push(d.download::<f16>()[0].to_f64());
    }
    let (half_sum, promoted_sum) = (outcomes[0], outcomes[1]);
    assert_eq!(promoted_sum, k as f64);
    assert!((k as f64 - half_sum).abs() >= (k as f64 - promoted_sum).abs());
}
