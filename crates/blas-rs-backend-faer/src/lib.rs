use std::mem;
use std::sync::Arc;

use blas_rs::kernel::registry::register_kernels;
use blas_rs::kernel::{GemmInvocation, GemmTile};
use blas_rs::{BlasResult, GemmFamily};
use blas_rs_backend_ref_cpu::{CpuKernelInterceptor, GenericCpuKernels};
use faer::linalg::matmul::matmul;
use faer::mat::{MatMut, MatRef};
use faer::{Accum, Par};

pub const FAER_KERNELS: &str = "faer";

fn faer_parallelism() -> Par {
    let par = faer::get_global_parallelism();
    if par.degree() == 1 {
        Par::Seq
    } else {
        par
    }
}

/// Routes single and double precision GEMM through faer; everything else falls through to the
/// reference CPU kernels.
#[derive(Default, Clone)]
pub struct FaerCpuInterceptor;

impl FaerCpuInterceptor {
    pub fn new() -> Self {
        Self
    }
}

impl CpuKernelInterceptor for FaerCpuInterceptor {
    fn try_gemm(&self, invocation: &mut GemmInvocation<'_>) -> Option<BlasResult<()>> {
        match invocation {
            GemmInvocation::Sgemm(tile) => Some(faer_sgemm(tile)),
            GemmInvocation::Dgemm(tile) => Some(faer_dgemm(tile)),
            GemmInvocation::Hgemm(_) | GemmInvocation::HgemmHpa(_) => None,
        }
    }

    fn workspace_bytes(&self, family: GemmFamily, m: usize, n: usize, k: usize) -> usize {
        let elem = match family {
            GemmFamily::Sgemm => mem::size_of::<f32>(),
            GemmFamily::Dgemm => mem::size_of::<f64>(),
            GemmFamily::Hgemm | GemmFamily::HgemmHpa => return 0,
        };
        // Packed op(A), packed op(B) and the product.
        (m * k + k * n + m * n) * elem
    }
}

pub type FaerKernels = GenericCpuKernels<FaerCpuInterceptor>;

pub fn faer_kernels() -> FaerKernels {
    GenericCpuKernels::with_interceptor(FAER_KERNELS, FaerCpuInterceptor::new())
}

/// Register the faer kernels with the global kernel registry under "faer".
pub fn register_faer_kernels() {
    register_kernels(FAER_KERNELS, || Arc::new(faer_kernels()));
}

macro_rules! faer_gemm {
    ($name:ident, $ty:ty) => {
        fn $name(tile: &mut GemmTile<'_, $ty, $ty>) -> BlasResult<()> {
            tile.check_extents()?;
            let (m, n, k) = (tile.m, tile.n, tile.k);
            if m == 0 || n == 0 {
                return Ok(());
            }
            log::trace!("faer {} gemm {m}x{n}x{k}", stringify!($ty));

            // faer wants dense operands; packing also folds op() and the leading dimensions away.
            let mut product = vec![0.0 as $ty; m * n];
            if k > 0 {
                let mut lhs = vec![0.0 as $ty; m * k];
                for col in 0..k {
                    for row in 0..m {
                        lhs[row + col * m] = tile.a_at(row, col);
                    }
                }
                let mut rhs = vec![0.0 as $ty; k * n];
                for col in 0..n {
                    for row in 0..k {
                        rhs[row + col * k] = tile.b_at(row, col);
                    }
                }
                let lhs_view = MatRef::from_column_major_slice(lhs.as_slice(), m, k);
                let rhs_view = MatRef::from_column_major_slice(rhs.as_slice(), k, n);
                let mut out_view =
                    MatMut::from_column_major_slice_mut(product.as_mut_slice(), m, n);
                matmul(
                    &mut out_view,
                    Accum::Replace,
                    lhs_view,
                    rhs_view,
                    tile.alpha,
                    faer_parallelism(),
                );
            }

            let beta = tile.beta;
            let c = tile.c.filter(|_| beta != 0.0);
            for col in 0..n {
                for row in 0..m {
                    let mut value = product[row + col * m];
                    if let Some(c) = c {
                        value += beta * c[row + col * tile.ldc];
                    }
                    tile.d[row + col * tile.ldd] = value;
                }
            }
            Ok(())
        }
    };
}

faer_gemm!(faer_sgemm, f32);
faer_gemm!(faer_dgemm, f64);

#[cfg(test)]
mod tests {
    use super::*;
    use blas_rs::kernel::BlasKernels;
    use blas_rs::Operation;

    #[test]
    fn faer_sgemm_handles_transposes_and_padding() {
        // a is 2x2 padded to lda 3 and used transposed; b is the identity padded to ldb 3.
        let a = [1.0f32, 2.0, -1.0, 3.0, 4.0, -1.0];
        let b = [1.0f32, 0.0, -1.0, 0.0, 1.0, -1.0];
        let c = [10.0f32, 20.0, 30.0, 40.0];
        let mut d = [0.0f32; 4];
        faer_kernels()
            .gemm(GemmInvocation::Sgemm(GemmTile {
                trans_a: Operation::Transpose,
                trans_b: Operation::NoTranspose,
                m: 2,
                n: 2,
                k: 2,
                alpha: 2.0,
                beta: 0.5,
                a: &a,
                lda: 3,
                b: &b,
                ldb: 3,
                c: Some(&c),
                ldc: 2,
                d: &mut d,
                ldd: 2,
            }))
            .unwrap();
        // op(a) = [[1, 2], [3, 4]]; 2 * op(a) + 0.5 * c.
        assert_eq!(d, [7.0, 16.0, 19.0, 28.0]);
    }

    #[test]
    fn half_families_fall_through_to_reference() {
        let interceptor = FaerCpuInterceptor::new();
        let a = [half::f16::ONE];
        let mut d = [half::f16::ZERO];
        let mut invocation = GemmInvocation::HgemmHpa(GemmTile {
            trans_a: Operation::NoTranspose,
            trans_b: Operation::NoTranspose,
            m: 1,
            n: 1,
            k: 1,
            alpha: 1.0,
            beta: 0.0,
            a: &a,
            lda: 1,
            b: &a,
            ldb: 1,
            c: None,
            ldc: 1,
            d: &mut d,
            ldd: 1,
        });
        assert!(interceptor.try_gemm(&mut invocation).is_none());
        assert_eq!(interceptor.workspace_bytes(GemmFamily::Hgemm, 8, 8, 8), 0);
        assert_eq!(
            interceptor.workspace_bytes(GemmFamily::Dgemm, 2, 3, 4),
            (8 + 12 + 6) * 8
        );
    }
}
