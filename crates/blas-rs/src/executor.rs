//! Strided-batch GEMM execution against device memory through a handle's stream.
//!
//! Everything that can fail on the arguments fails here, before anything is enqueued:
//! validation, dispatch, operand extents and scratch reservation. The enqueued job then walks
//! the batch in order, staging each element's operands, running the kernel on them and writing
//! D back. Running elements in order makes zero-stride outputs last-writer-wins.

use std::sync::Arc;

use bytemuck::Pod;
use half::f16;

use crate::descriptor::{GemmStridedBatchedEx, MatrixArg, ScalarArg};
use crate::device::{DevicePtr, Reservation};
use crate::dispatch::{dispatch_gemm, GemmDispatch, GemmFamily};
use crate::handle::Handle;
use crate::kernel::{BlasKernels, GemmInvocation, GemmTile, KernelScalar, Promote};
use crate::status::{BlasError, BlasResult};
use crate::types::Operation;
use crate::validate::{reads_ab, reads_c, validate_gemm, Workload};

/// Validates `args`, resolves the kernel family and enqueues the batch on the handle's stream.
///
/// Never blocks: results land in D when the stream reaches the work. Host-mode scalars are
/// captured at call time; device-mode scalars are read when the work runs.
pub fn gemm_strided_batched_ex(handle: &Handle, args: &GemmStridedBatchedEx) -> BlasResult<()> {
    let workload = validate_gemm(args, handle.pointer_mode(), handle.validation_mode())?;
    if workload == Workload::Empty {
        log::debug!(
            "gemm quick return: m={} n={} batch_count={}",
            args.m,
            args.n,
            args.batch_count
        );
        return Ok(());
    }

    let dispatch = dispatch_gemm(args.types(), args.trans_a, args.trans_b)?;
    let plan = GemmPlan::new(args, dispatch)?;
    let kernels = Arc::clone(handle.kernels());
    let scratch = handle
        .device()
        .reserve(plan.scratch_bytes(kernels.as_ref()))?;

    log::debug!(
        "enqueue {} m={} n={} k={} batch_count={} on stream {} ({} kernels)",
        dispatch.family,
        plan.m,
        plan.n,
        plan.k,
        plan.batch_count,
        handle.stream().id(),
        kernels.name()
    );

    match dispatch.family {
        GemmFamily::Hgemm => enqueue::<Hgemm>(handle, args, plan, kernels, scratch),
        GemmFamily::HgemmHpa => enqueue::<HgemmHpa>(handle, args, plan, kernels, scratch),
        GemmFamily::Sgemm => enqueue::<Sgemm>(handle, args, plan, kernels, scratch),
        GemmFamily::Dgemm => enqueue::<Dgemm>(handle, args, plan, kernels, scratch),
    }
}

/// Storage and accumulation types of one family, tied to its invocation variant.
trait FamilyTypes: 'static {
    type Storage: Promote<Self::Compute> + Pod + Send + Sync;
    type Compute: KernelScalar;

    fn invocation(tile: GemmTile<'_, Self::Storage, Self::Compute>) -> GemmInvocation<'_>;
}

struct Hgemm;
struct HgemmHpa;
struct Sgemm;
struct Dgemm;

impl FamilyTypes for Hgemm {
    type Storage = f16;
    type Compute = f16;

    fn invocation(tile: GemmTile<'_, f16, f16>) -> GemmInvocation<'_> {
        GemmInvocation::Hgemm(tile)
    }
}

impl FamilyTypes for HgemmHpa {
    type Storage = f16;
    type Compute = f32;

    fn invocation(tile: GemmTile<'_, f16, f32>) -> GemmInvocation<'_> {
        GemmInvocation::HgemmHpa(tile)
    }
}

impl FamilyTypes for Sgemm {
    type Storage = f32;
    type Compute = f32;

    fn invocation(tile: GemmTile<'_, f32, f32>) -> GemmInvocation<'_> {
        GemmInvocation::Sgemm(tile)
    }
}

impl FamilyTypes for Dgemm {
    type Storage = f64;
    type Compute = f64;

    fn invocation(tile: GemmTile<'_, f64, f64>) -> GemmInvocation<'_> {
        GemmInvocation::Dgemm(tile)
    }
}

/// One operand's batch walk: element `i` starts `i * stride` elements past `ptr` and spans
/// `extent` elements.
#[derive(Debug, Clone)]
struct OperandPlan {
    ptr: DevicePtr,
    stride: i64,
    extent: usize,
}

impl OperandPlan {
    fn new(
        name: &str,
        arg: &MatrixArg,
        rows: usize,
        cols: usize,
        ld: usize,
        batch_count: usize,
        elem_bytes: usize,
    ) -> BlasResult<Self> {
        let extent = matrix_extent(name, rows, cols, ld)?;
        check_batch_span(name, &arg.ptr, arg.stride, extent, batch_count, elem_bytes)?;
        Ok(Self {
            ptr: arg.ptr.clone(),
            stride: arg.stride,
            extent,
        })
    }

    fn element_offset(&self, index: usize) -> i64 {
        // Bounds were checked for the whole batch, so this cannot overflow.
        self.stride * index as i64
    }

    fn gather<T: Pod>(&self, index: usize) -> BlasResult<Vec<T>> {
        self.ptr.read(self.element_offset(index), self.extent)
    }

    fn scatter<T: Pod>(&self, index: usize, values: &[T]) -> BlasResult<()> {
        self.ptr.write_at(self.element_offset(index), values)
    }
}

/// Column-major footprint of a `rows x cols` matrix with leading dimension `ld`.
///
/// A footprint too large to address is `InvalidSize`.
pub(crate) fn matrix_extent(
    name: &str,
    rows: usize,
    cols: usize,
    ld: usize,
) -> BlasResult<usize> {
    if rows == 0 || cols == 0 {
        return Ok(0);
    }
    ld.checked_mul(cols - 1)
        .and_then(|columns| columns.checked_add(rows))
        .ok_or_else(|| {
            BlasError::invalid_size(format!(
                "{name} extent of {rows}x{cols} with ld {ld} overflows"
            ))
        })
}

/// Checks that every batch element of an operand lies inside its allocation.
///
/// Offsets are linear in the batch index, so the first and last elements bound the span.
/// Negative strides are fine as long as the span stays inside.
pub(crate) fn check_batch_span(
    name: &str,
    ptr: &DevicePtr,
    stride: i64,
    extent: usize,
    batch_count: usize,
    elem_bytes: usize,
) -> BlasResult<()> {
    if extent == 0 || batch_count == 0 {
        return Ok(());
    }
    let overflow = || BlasError::invalid_size(format!("{name} batch span overflows"));
    let last = stride
        .checked_mul(batch_count as i64 - 1)
        .ok_or_else(overflow)?;
    let extent = i64::try_from(extent).map_err(|_| overflow())?;
    let elem = elem_bytes as i64;
    let first_byte = last.min(0).checked_mul(elem).ok_or_else(overflow)?;
    let end_byte = last
        .max(0)
        .checked_add(extent)
        .and_then(|end| end.checked_mul(elem))
        .ok_or_else(overflow)?;
    ptr.check_span(first_byte, end_byte).map_err(|err| {
        BlasError::invalid_size(format!(
            "{name}: {}",
            err.detail().unwrap_or("operand extent exceeds allocation")
        ))
    })
}

/// Argument-checked, usize-typed description of the batch to run.
#[derive(Debug, Clone)]
struct GemmPlan {
    trans_a: Operation,
    trans_b: Operation,
    m: usize,
    n: usize,
    k: usize,
    lda: usize,
    ldb: usize,
    ldc: usize,
    ldd: usize,
    batch_count: usize,
    family: GemmFamily,
    a: Option<OperandPlan>,
    b: Option<OperandPlan>,
    c: Option<OperandPlan>,
    d: OperandPlan,
}

fn to_usize(name: &str, value: i64) -> BlasResult<usize> {
    usize::try_from(value).map_err(|_| BlasError::invalid_size(format!("{name}={value}")))
}

impl GemmPlan {
    fn new(args: &GemmStridedBatchedEx, dispatch: GemmDispatch) -> BlasResult<Self> {
        let m = to_usize("m", args.m)?;
        let n = to_usize("n", args.n)?;
        let k = to_usize("k", args.k)?;
        let lda = to_usize("lda", args.a.ld)?;
        let ldb = to_usize("ldb", args.b.ld)?;
        let ldc = to_usize("ldc", args.c.ld)?;
        let ldd = to_usize("ldd", args.d.ld)?;
        let batch_count = to_usize("batch_count", args.batch_count)?;
        let elem = dispatch.family.storage_bytes();

        let (a, b) = if reads_ab(args) {
            let (a_rows, a_cols) = if dispatch.trans_a.is_transposed() {
                (k, m)
            } else {
                (m, k)
            };
            let (b_rows, b_cols) = if dispatch.trans_b.is_transposed() {
                (n, k)
            } else {
                (k, n)
            };
            let a = OperandPlan::new("a", &args.a, a_rows, a_cols, lda, batch_count, elem)?;
            let b = OperandPlan::new("b", &args.b, b_rows, b_cols, ldb, batch_count, elem)?;
            (Some(a), Some(b))
        } else {
            (None, None)
        };
        let c = if reads_c(args) {
            Some(OperandPlan::new("c", &args.c, m, n, ldc, batch_count, elem)?)
        } else {
            None
        };
        let d = OperandPlan::new("d", &args.d, m, n, ldd, batch_count, elem)?;

        let compute_bytes = dispatch.family.compute_type().size_in_bytes() as i64;
        for (name, scalar) in [("alpha", &args.alpha), ("beta", &args.beta)] {
            if let ScalarArg::Device(ptr) = scalar {
                ptr.check_span(0, compute_bytes).map_err(|_| {
                    BlasError::invalid_size(format!("{name} lies outside its allocation"))
                })?;
            }
        }

        Ok(Self {
            trans_a: dispatch.trans_a,
            trans_b: dispatch.trans_b,
            m,
            n,
            k,
            lda,
            ldb,
            ldc,
            ldd,
            batch_count,
            family: dispatch.family,
            a,
            b,
            c,
            d,
        })
    }

    /// Device bytes staged for one batch element plus kernel workspace.
    fn scratch_bytes(&self, kernels: &dyn BlasKernels) -> usize {
        let staged: usize = [&self.a, &self.b, &self.c]
            .into_iter()
            .flatten()
            .map(|op| op.extent)
            .sum::<usize>()
            + self.d.extent;
        staged * self.family.storage_bytes()
            + kernels.workspace_bytes(self.family, self.m, self.n, self.k)
    }
}

/// Where a scalar comes from when the job runs.
enum ScalarSource<C> {
    Value(C),
    Device(DevicePtr),
}

impl<C: KernelScalar> ScalarSource<C> {
    fn capture(name: &str, arg: &ScalarArg) -> BlasResult<Self> {
        match arg {
            ScalarArg::Host(value) => Ok(ScalarSource::Value(C::from_scalar(*value))),
            ScalarArg::Device(ptr) => Ok(ScalarSource::Device(ptr.clone())),
            ScalarArg::Null => Err(BlasError::invalid_pointer(format!("{name} is null"))),
        }
    }

    fn resolve(&self) -> BlasResult<C> {
        match self {
            ScalarSource::Value(value) => Ok(*value),
            ScalarSource::Device(ptr) => ptr
                .read::<C>(0, 1)?
                .into_iter()
                .next()
                .ok_or_else(|| BlasError::invalid_pointer("device scalar read returned nothing")),
        }
    }
}

fn enqueue<F: FamilyTypes>(
    handle: &Handle,
    args: &GemmStridedBatchedEx,
    plan: GemmPlan,
    kernels: Arc<dyn BlasKernels>,
    scratch: Reservation,
) -> BlasResult<()> {
    let alpha = ScalarSource::<F::Compute>::capture("alpha", &args.alpha)?;
    let beta = ScalarSource::<F::Compute>::capture("beta", &args.beta)?;
    handle.stream().enqueue(move || {
        let _scratch = scratch;
        let alpha = alpha.resolve()?;
        let beta = beta.resolve()?;
        run_batch::<F>(kernels.as_ref(), &plan, alpha, beta)
    })
}

fn run_batch<F: FamilyTypes>(
    kernels: &dyn BlasKernels,
    plan: &GemmPlan,
    alpha: F::Compute,
    beta: F::Compute,
) -> BlasResult<()> {
    let zero = <F::Compute as KernelScalar>::ZERO;
    // alpha == 0 leaves A and B unread; beta == 0 leaves C unread.
    let k = if alpha == zero { 0 } else { plan.k };
    let read_c = beta != zero;
    for index in 0..plan.batch_count {
        let a = gather_if::<F::Storage>(plan.a.as_ref(), k > 0, index)?;
        let b = gather_if::<F::Storage>(plan.b.as_ref(), k > 0, index)?;
        let c = match (&plan.c, read_c) {
            (Some(op), true) => Some(op.gather::<F::Storage>(index)?),
            _ => None,
        };
        let mut d = plan.d.gather::<F::Storage>(index)?;
        log::trace!("{} batch element {index}/{}", plan.family, plan.batch_count);
        kernels.gemm(F::invocation(GemmTile {
            trans_a: plan.trans_a,
            trans_b: plan.trans_b,
            m: plan.m,
            n: plan.n,
            k,
            alpha,
            beta,
            a: &a,
            lda: plan.lda,
            b: &b,
            ldb: plan.ldb,
            c: c.as_deref(),
            ldc: plan.ldc,
            d: &mut d,
            ldd: plan.ldd,
        }))?;
        plan.d.scatter(index, &d)?;
    }
    Ok(())
}

fn gather_if<T: Pod>(op: Option<&OperandPlan>, needed: bool, index: usize) -> BlasResult<Vec<T>> {
    match op {
        Some(op) if needed => op.gather(index),
        _ => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::status::Status;

    #[test]
    fn extent_counts_trailing_column_only_up_to_rows() {
        assert_eq!(matrix_extent("a", 3, 4, 5).unwrap(), 18);
        assert_eq!(matrix_extent("a", 0, 4, 5).unwrap(), 0);
        assert_eq!(matrix_extent("a", 3, 0, 5).unwrap(), 0);
    }

    #[test]
    fn unaddressable_extent_is_invalid_size() {
        let err = matrix_extent("a", 1, 5, 1 << (usize::BITS - 2)).unwrap_err();
        assert_eq!(err.status(), Status::InvalidSize);
        let err = matrix_extent("b", 2, 2, usize::MAX).unwrap_err();
        assert_eq!(err.status(), Status::InvalidSize);
    }

    #[test]
    fn batch_span_accepts_negative_strides_inside_allocation() {
        let device = Device::new(1 << 20);
        let buffer = device.alloc(4 * 12).unwrap();
        // Three elements of four floats walking backwards from the last one.
        let last = buffer.ptr().add::<f32>(8);
        assert!(check_batch_span("a", &last, -4, 4, 3, 4).is_ok());
        let err = check_batch_span("a", &last, -5, 4, 3, 4).unwrap_err();
        assert_eq!(err.status(), Status::InvalidSize);
        assert!(check_batch_span("a", &buffer.ptr(), 0, 12, 1000, 4).is_ok());
        assert!(check_batch_span("a", &buffer.ptr(), 4, 4, 4, 4).is_err());
    }
}
