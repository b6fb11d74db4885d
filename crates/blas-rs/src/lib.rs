pub mod api;
pub mod descriptor;
pub mod device;
pub mod dispatch;
mod env;
pub mod executor;
pub mod handle;
pub mod kernel;
pub mod level1;
pub mod status;
pub mod types;
pub mod validate;

pub use descriptor::{GemmStridedBatchedEx, MatrixArg, ScalarArg};
pub use device::{Device, DeviceBuffer, DevicePtr, Stream};
pub use dispatch::{dispatch_gemm, GemmDispatch, GemmFamily, GemmTypes};
pub use env::{runtime_config, RuntimeConfig};
pub use executor::gemm_strided_batched_ex;
pub use handle::Handle;
pub use kernel::BlasKernels;
pub use level1::{asum, ResultArg};
pub use status::{BlasError, BlasResult, Status};
pub use types::{DataType, Operation, PointerLocation, PointerMode, Scalar, ValidationMode};
