pub mod cpu;
pub mod reference;

use std::sync::Arc;

use blas_rs::kernel::registry::register_kernels;

pub use cpu::{CpuKernelInterceptor, GenericCpuKernels, NoopInterceptor, ReferenceKernels};
pub use reference::{BatchLayout, HostElement};

/// Register the reference kernels with the global kernel registry.
///
/// The set is registered under both "reference" and "cpu".
pub fn register_reference_kernels() {
    register_kernels(ReferenceKernels::NAME, || Arc::new(ReferenceKernels::new()));
    register_kernels("cpu", || Arc::new(ReferenceKernels::new()));
}
