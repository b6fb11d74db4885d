use std::sync::Arc;

use blas_rs::kernel::PortableKernels;
use blas_rs_backend_ref_cpu::ReferenceKernels;
use blas_rs_backend_tests::define_backend_tests;

define_backend_tests!(reference_kernels, || Arc::new(ReferenceKernels::new()));
define_backend_tests!(portable_kernels, || Arc::new(PortableKernels::new()));
