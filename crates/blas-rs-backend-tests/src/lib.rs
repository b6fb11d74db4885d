pub mod gemm;
pub mod harness;
pub mod level1;

#[doc(hidden)]
pub use blas_rs;

/// Instantiates the conformance suite for a kernel set.
///
/// `$kernels_ctor` is called once per test and must return an `Arc` of something implementing
/// `BlasKernels`.
#[macro_export]
macro_rules! define_backend_tests {
    ($module:ident, $kernels_ctor:expr) => {
        #[cfg(test)]
        mod $module {
            #[allow(unused_imports)]
            use super::*;
            use std::sync::Arc;

            use $crate::blas_rs::kernel::BlasKernels;
            use $crate::{gemm, level1};

            fn kernels() -> Arc<dyn BlasKernels> {
                let kernels: Arc<dyn BlasKernels> = ($kernels_ctor)();
                kernels
            }

            macro_rules! suite_test {
                ($name:ident, $func:path) => {
                    #[test]
                    fn $name() {
                        $func(kernels());
                    }
                };
            }

            suite_test!(
                gemm_every_family_and_transpose,
                gemm::every_family_and_transpose_matches_reference
            );
            suite_test!(
                gemm_uniform_values,
                gemm::uniform_values_stay_within_tolerance
            );
            suite_test!(
                gemm_packed_batch_of_three,
                gemm::packed_batch_of_three_matches_dense_products
            );
            suite_test!(
                gemm_single_element_ignores_strides,
                gemm::single_element_ignores_strides
            );
            suite_test!(gemm_pointer_modes_agree, gemm::pointer_modes_agree);
            suite_test!(gemm_zero_beta_never_reads_c, gemm::zero_beta_never_reads_c);
            suite_test!(gemm_zero_alpha_scales_c_only, gemm::zero_alpha_scales_c_only);
            suite_test!(gemm_empty_reduction_scales_c, gemm::empty_reduction_scales_c);
            suite_test!(gemm_in_place_update, gemm::in_place_update_matches_reference);
            suite_test!(
                gemm_conjugate_transpose_matches_transpose,
                gemm::conjugate_transpose_matches_transpose
            );
            suite_test!(
                gemm_zero_stride_output_keeps_last_element,
                gemm::zero_stride_output_keeps_last_element
            );
            suite_test!(
                gemm_promoted_accumulation_is_exact,
                gemm::promoted_accumulation_is_exact
            );
            suite_test!(
                asum_host_result_matches_reference,
                level1::asum_host_result_matches_reference
            );
            suite_test!(
                asum_device_result_lands_after_synchronize,
                level1::asum_device_result_lands_after_synchronize
            );
            suite_test!(
                asum_degenerate_arguments_yield_zero,
                level1::asum_degenerate_arguments_yield_zero
            );
        }
    };
}
