use crate::descriptor::{GemmStridedBatchedEx, ScalarArg};
use crate::status::{BlasError, BlasResult};
use crate::types::{PointerMode, ValidationMode};

/// Outcome of a successful validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workload {
    /// Nothing to compute (`m`, `n` or `batch_count` is zero); no pointer is inspected.
    Empty,
    /// Well-formed request with at least one output element.
    Compute,
}

/// Checks a GEMM request in fixed precedence; the first failing check decides the status.
///
/// 1. `m`, `n`, `k` non-negative.
/// 2. `lda` and `ldb` cover the stored rows of A and B.
/// 3. `ldc` and `ldd` cover `m`.
/// 4. `batch_count` non-negative.
/// 5. Every pointer that will be dereferenced is non-null and scalars live where the pointer
///    mode says.
/// 6. In strict mode, zero-stride outputs across more than one batch element are rejected.
pub fn validate_gemm(
    args: &GemmStridedBatchedEx,
    pointer_mode: PointerMode,
    validation_mode: ValidationMode,
) -> BlasResult<Workload> {
    let (m, n, k) = (args.m, args.n, args.k);
    if m < 0 || n < 0 || k < 0 {
        return Err(BlasError::invalid_size(format!(
            "negative dimension m={m} n={n} k={k}"
        )));
    }

    let (a_rows, _) = args.a_shape();
    if args.a.ld < a_rows {
        return Err(BlasError::invalid_size(format!(
            "lda={} < {a_rows} for op(A)={}",
            args.a.ld, args.trans_a
        )));
    }
    let (b_rows, _) = args.b_shape();
    if args.b.ld < b_rows {
        return Err(BlasError::invalid_size(format!(
            "ldb={} < {b_rows} for op(B)={}",
            args.b.ld, args.trans_b
        )));
    }
    if args.c.ld < m {
        return Err(BlasError::invalid_size(format!("ldc={} < m={m}", args.c.ld)));
    }
    if args.d.ld < m {
        return Err(BlasError::invalid_size(format!("ldd={} < m={m}", args.d.ld)));
    }

    if args.batch_count < 0 {
        return Err(BlasError::invalid_size(format!(
            "negative batch_count {}",
            args.batch_count
        )));
    }

    if m == 0 || n == 0 || args.batch_count == 0 {
        return Ok(Workload::Empty);
    }

    check_scalar("alpha", &args.alpha, pointer_mode)?;
    check_scalar("beta", &args.beta, pointer_mode)?;
    if args.d.ptr.is_null() {
        return Err(BlasError::invalid_pointer("d is null"));
    }
    if reads_ab(args) {
        if args.a.ptr.is_null() {
            return Err(BlasError::invalid_pointer("a is null"));
        }
        if args.b.ptr.is_null() {
            return Err(BlasError::invalid_pointer("b is null"));
        }
    }
    if reads_c(args) && args.c.ptr.is_null() {
        return Err(BlasError::invalid_pointer("c is null and beta is not known to be zero"));
    }

    if validation_mode == ValidationMode::Strict && args.batch_count > 1 {
        let shared_output = if args.d.stride == 0 {
            Some("d")
        } else if reads_c(args) && args.c.stride == 0 && c_is_d(args) {
            Some("c")
        } else {
            None
        };
        if let Some(name) = shared_output {
            log::warn!(
                "strict validation: {name} has zero batch stride across {} batch elements",
                args.batch_count
            );
            return Err(BlasError::invalid_size(format!(
                "{name} stride 0 with batch_count {} writes one region repeatedly",
                args.batch_count
            )));
        }
    }

    Ok(Workload::Compute)
}

/// A and B are dereferenced unless the reduction is empty or alpha is a host zero.
pub fn reads_ab(args: &GemmStridedBatchedEx) -> bool {
    args.k > 0 && !args.alpha.is_host_zero()
}

/// C is dereferenced unless beta is a host zero. A device-resident beta is unknown until the
/// stream runs, so C must stay valid in device mode.
pub fn reads_c(args: &GemmStridedBatchedEx) -> bool {
    !args.beta.is_host_zero()
}

fn c_is_d(args: &GemmStridedBatchedEx) -> bool {
    args.c.ptr.address() == args.d.ptr.address()
}

fn check_scalar(name: &str, scalar: &ScalarArg, pointer_mode: PointerMode) -> BlasResult<()> {
    match (scalar, pointer_mode) {
        (ScalarArg::Null, _) => Err(BlasError::invalid_pointer(format!("{name} is null"))),
        (ScalarArg::Device(ptr), _) if ptr.is_null() => {
            Err(BlasError::invalid_pointer(format!("{name} is null")))
        }
        (ScalarArg::Host(_), PointerMode::Host) | (ScalarArg::Device(_), PointerMode::Device) => {
            Ok(())
        }
        (ScalarArg::Host(_), PointerMode::Device) => Err(BlasError::invalid_pointer(format!(
            "{name} is a host scalar but the pointer mode is device"
        ))),
        (ScalarArg::Device(_), PointerMode::Host) => Err(BlasError::invalid_pointer(format!(
            "{name} is a device pointer but the pointer mode is host"
        ))),
    }
}
