use std::sync::mpsc;
use std::sync::Arc;

use crate::device::DevicePtr;
use crate::executor::check_batch_span;
use crate::handle::Handle;
use crate::kernel::AsumInvocation;
use crate::status::{BlasError, BlasResult};
use crate::types::{DataType, PointerMode, Scalar};

/// Destination of a scalar result; must agree with the handle's pointer mode.
#[derive(Debug)]
pub enum ResultArg<'a> {
    Null,
    Host(&'a mut Scalar),
    Device(DevicePtr),
}

impl ResultArg<'_> {
    fn is_null(&self) -> bool {
        match self {
            ResultArg::Null => true,
            ResultArg::Host(_) => false,
            ResultArg::Device(ptr) => ptr.is_null(),
        }
    }
}

fn zero_of(dtype: DataType) -> Scalar {
    match dtype {
        DataType::F64 => Scalar::F64(0.0),
        _ => Scalar::F32(0.0),
    }
}

/// Sum of absolute values of `n` elements of `x` spaced `incx` apart.
///
/// Host pointer mode blocks until the sum is in `result`. Device pointer mode enqueues the work
/// and returns; the sum lands in device memory once the stream reaches it. `n <= 0` or
/// `incx <= 0` yields zero.
pub fn asum(
    handle: &Handle,
    dtype: DataType,
    n: i64,
    x: &DevicePtr,
    incx: i64,
    result: ResultArg<'_>,
) -> BlasResult<()> {
    if x.is_null() || result.is_null() {
        return Err(BlasError::invalid_pointer("asum x or result is null"));
    }
    match (&result, handle.pointer_mode()) {
        (ResultArg::Host(_), PointerMode::Host) | (ResultArg::Device(_), PointerMode::Device) => {}
        _ => {
            return Err(BlasError::invalid_pointer(
                "asum result location does not match the pointer mode",
            ))
        }
    }
    if !matches!(dtype, DataType::F32 | DataType::F64) {
        return Err(BlasError::invalid_value(format!(
            "asum does not support {dtype}"
        )));
    }

    let (n, incx) = match (usize::try_from(n), usize::try_from(incx)) {
        (Ok(n), Ok(incx)) if n > 0 && incx > 0 => (n, incx),
        _ => return deliver(handle, result, zero_of(dtype)),
    };

    let span = (n - 1)
        .checked_mul(incx)
        .and_then(|last| last.checked_add(1))
        .ok_or_else(|| {
            BlasError::invalid_size(format!("asum span of n={n} incx={incx} overflows"))
        })?;
    check_batch_span("x", x, 0, span, 1, dtype.size_in_bytes())?;
    let scratch = handle.device().reserve(span * dtype.size_in_bytes())?;
    let kernels = Arc::clone(handle.kernels());
    let x = x.clone();
    let compute = move || -> BlasResult<Scalar> {
        match dtype {
            DataType::F64 => {
                let staged = x.read::<f64>(0, span)?;
                kernels.asum(AsumInvocation::F64 {
                    x: &staged,
                    n,
                    incx,
                })
            }
            _ => {
                let staged = x.read::<f32>(0, span)?;
                kernels.asum(AsumInvocation::F32 {
                    x: &staged,
                    n,
                    incx,
                })
            }
        }
    };
    log::debug!("enqueue asum {dtype} n={n} incx={incx} on stream {}", handle.stream().id());

    match result {
        ResultArg::Host(out) => {
            let (sender, receiver) = mpsc::sync_channel(1);
            handle.stream().enqueue(move || {
                let _scratch = scratch;
                // A dropped receiver only means the caller already gave up waiting.
                let _ = sender.send(compute());
                Ok(())
            })?;
            let value = receiver
                .recv()
                .map_err(|_| BlasError::invalid_value("asum work was dropped before finishing"))??;
            *out = value;
            Ok(())
        }
        ResultArg::Device(ptr) => {
            check_batch_span("result", &ptr, 0, 1, 1, dtype.size_in_bytes())?;
            handle.stream().enqueue(move || {
                let _scratch = scratch;
                write_scalar(&ptr, compute()?)
            })
        }
        ResultArg::Null => Err(BlasError::invalid_pointer("asum result is null")),
    }
}

fn deliver(handle: &Handle, result: ResultArg<'_>, value: Scalar) -> BlasResult<()> {
    match result {
        ResultArg::Host(out) => {
            *out = value;
            Ok(())
        }
        ResultArg::Device(ptr) => {
            check_batch_span("result", &ptr, 0, 1, 1, value.dtype().size_in_bytes())?;
            handle.stream().enqueue(move || write_scalar(&ptr, value))
        }
        ResultArg::Null => Err(BlasError::invalid_pointer("asum result is null")),
    }
}

fn write_scalar(ptr: &DevicePtr, value: Scalar) -> BlasResult<()> {
    match value {
        Scalar::F16(v) => ptr.write(&[v]),
        Scalar::F32(v) => ptr.write(&[v]),
        Scalar::F64(v) => ptr.write(&[v]),
    }
}
