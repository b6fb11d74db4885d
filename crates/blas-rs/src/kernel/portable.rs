use crate::kernel::{AsumInvocation, BlasKernels, GemmInvocation, GemmTile, KernelScalar, Promote};
use crate::status::{BlasError, BlasResult};
use crate::types::Scalar;

/// Straightforward loop kernels covering every family; the default kernel set.
#[derive(Debug, Default, Clone, Copy)]
pub struct PortableKernels;

impl PortableKernels {
    pub const NAME: &'static str = "portable";

    pub fn new() -> Self {
        Self
    }
}

impl BlasKernels for PortableKernels {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn gemm(&self, invocation: GemmInvocation<'_>) -> BlasResult<()> {
        match invocation {
            GemmInvocation::Hgemm(tile) => gemm_tile(tile),
            GemmInvocation::HgemmHpa(tile) => gemm_tile(tile),
            GemmInvocation::Sgemm(tile) => gemm_tile(tile),
            GemmInvocation::Dgemm(tile) => gemm_tile(tile),
        }
    }

    fn asum(&self, invocation: AsumInvocation<'_>) -> BlasResult<Scalar> {
        match invocation {
            AsumInvocation::F32 { x, n, incx } => {
                let values = strided(x, n, incx)?;
                Ok(Scalar::F32(values.map(f32::abs).sum()))
            }
            AsumInvocation::F64 { x, n, incx } => {
                let values = strided(x, n, incx)?;
                Ok(Scalar::F64(values.map(f64::abs).sum()))
            }
        }
    }
}

fn strided<T: Copy>(
    x: &[T],
    n: usize,
    incx: usize,
) -> BlasResult<impl Iterator<Item = T> + '_> {
    let fits = n == 0
        || (incx > 0
            && (n - 1)
                .checked_mul(incx)
                .is_some_and(|last| last < x.len()));
    if !fits {
        return Err(BlasError::invalid_size(format!(
            "asum view of {n} elements with increment {incx} exceeds {} staged elements",
            x.len()
        )));
    }
    Ok(x.iter().step_by(incx.max(1)).take(n).copied())
}

/// Column-major reference loop, accumulating in `C`.
pub(crate) fn gemm_tile<S, C>(tile: GemmTile<'_, S, C>) -> BlasResult<()>
where
    S: Promote<C>,
    C: KernelScalar,
{
    tile.check_extents()?;
    let beta = tile.beta;
    for col in 0..tile.n {
        for row in 0..tile.m {
            let mut acc = C::ZERO;
            for l in 0..tile.k {
                acc = acc + tile.a_at(row, l).promote() * tile.b_at(l, col).promote();
            }
            let mut value = tile.alpha * acc;
            if let Some(c) = tile.c {
                if beta != C::ZERO {
                    value = value + beta * c[row + col * tile.ldc].promote();
                }
            }
            tile.d[row + col * tile.ldd] = S::demote(value);
        }
    }
    Ok(())
}
