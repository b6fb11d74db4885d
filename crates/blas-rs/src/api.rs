//! Status-returning entry points.
//!
//! These mirror the classic handle-based BLAS calling convention: the context is passed as an
//! optional reference so an absent context is expressible, and every call reports a [`Status`]
//! instead of a `Result`. An absent handle is rejected before any other argument is looked at.

use crate::descriptor::GemmStridedBatchedEx;
use crate::device::{DevicePtr, Stream};
use crate::executor;
use crate::handle::Handle;
use crate::level1::{self, ResultArg};
use crate::status::{BlasError, BlasResult, Status};
use crate::types::{DataType, PointerMode};

fn require<T>(handle: Option<T>) -> BlasResult<T> {
    handle.ok_or_else(BlasError::invalid_handle)
}

fn report<T>(call: &str, result: BlasResult<T>) -> Status {
    if let Err(err) = &result {
        log::debug!("{call} failed: {err}");
    }
    Status::of(&result)
}

/// Creates a handle into `out`.
pub fn create_handle(out: &mut Option<Handle>) -> Status {
    report(
        "create_handle",
        Handle::create().map(|handle| {
            *out = Some(handle);
        }),
    )
}

pub fn destroy_handle(handle: Option<Handle>) -> Status {
    report("destroy_handle", require(handle).map(Handle::destroy))
}

pub fn set_stream(handle: Option<&mut Handle>, stream: Stream) -> Status {
    report(
        "set_stream",
        require(handle).map(|handle| handle.set_stream(stream)),
    )
}

pub fn get_stream(handle: Option<&Handle>, out: &mut Option<Stream>) -> Status {
    report(
        "get_stream",
        require(handle).map(|handle| {
            *out = Some(handle.stream().clone());
        }),
    )
}

pub fn set_pointer_mode(handle: Option<&mut Handle>, mode: PointerMode) -> Status {
    report(
        "set_pointer_mode",
        require(handle).map(|handle| handle.set_pointer_mode(mode)),
    )
}

pub fn get_pointer_mode(handle: Option<&Handle>, out: &mut PointerMode) -> Status {
    report(
        "get_pointer_mode",
        require(handle).map(|handle| {
            *out = handle.pointer_mode();
        }),
    )
}

/// Strided-batched GEMM with per-operand types; see [`executor::gemm_strided_batched_ex`].
pub fn gemm_strided_batched_ex(handle: Option<&Handle>, args: &GemmStridedBatchedEx) -> Status {
    report(
        "gemm_strided_batched_ex",
        require(handle).and_then(|handle| executor::gemm_strided_batched_ex(handle, args)),
    )
}

/// Sum of absolute values; see [`level1::asum`].
pub fn asum(
    handle: Option<&Handle>,
    dtype: DataType,
    n: i64,
    x: &DevicePtr,
    incx: i64,
    result: ResultArg<'_>,
) -> Status {
    report(
        "asum",
        require(handle).and_then(|handle| level1::asum(handle, dtype, n, x, incx, result)),
    )
}
