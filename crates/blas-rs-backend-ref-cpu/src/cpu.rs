use std::sync::Arc;

use blas_rs::kernel::{AsumInvocation, BlasKernels, GemmInvocation, GemmTile, KernelScalar};
use blas_rs::{BlasResult, GemmFamily, Scalar};

use crate::reference::{self, HostElement};

/// Hook that lets an accelerated kernel set take over individual calls.
///
/// Returning `None` hands the call to the reference loops.
pub trait CpuKernelInterceptor: Send + Sync {
    fn try_gemm(&self, invocation: &mut GemmInvocation<'_>) -> Option<BlasResult<()>>;

    fn try_asum(&self, _invocation: &AsumInvocation<'_>) -> Option<BlasResult<Scalar>> {
        None
    }

    /// Scratch the interceptor needs for one batch element.
    fn workspace_bytes(&self, _family: GemmFamily, _m: usize, _n: usize, _k: usize) -> usize {
        0
    }
}

#[derive(Default)]
pub struct NoopInterceptor;

impl CpuKernelInterceptor for NoopInterceptor {
    fn try_gemm(&self, _invocation: &mut GemmInvocation<'_>) -> Option<BlasResult<()>> {
        None
    }
}

/// Reference CPU kernels with an optional interceptor in front.
///
/// Every family is accumulated in f64 and rounded once to its storage type, which makes this
/// set at least as accurate as the family requires.
#[derive(Clone)]
pub struct GenericCpuKernels<I: CpuKernelInterceptor> {
    name: String,
    interceptor: Arc<I>,
}

impl<I: CpuKernelInterceptor> GenericCpuKernels<I> {
    pub fn with_interceptor(name: impl Into<String>, interceptor: I) -> Self {
        Self::with_arc(name, Arc::new(interceptor))
    }

    pub fn with_arc(name: impl Into<String>, interceptor: Arc<I>) -> Self {
        Self {
            name: name.into(),
            interceptor,
        }
    }

    pub fn interceptor(&self) -> &I {
        self.interceptor.as_ref()
    }
}

impl GenericCpuKernels<NoopInterceptor> {
    pub const NAME: &'static str = "reference";

    pub fn new() -> Self {
        Self::with_interceptor(Self::NAME, NoopInterceptor)
    }
}

impl Default for GenericCpuKernels<NoopInterceptor> {
    fn default() -> Self {
        Self::new()
    }
}

pub type ReferenceKernels = GenericCpuKernels<NoopInterceptor>;

impl<I: CpuKernelInterceptor> BlasKernels for GenericCpuKernels<I> {
    fn name(&self) -> &str {
        &self.name
    }

    fn gemm(&self, mut invocation: GemmInvocation<'_>) -> BlasResult<()> {
        if let Some(result) = self.interceptor.try_gemm(&mut invocation) {
            return result;
        }
        log::trace!("{}: reference {} gemm", self.name, invocation.family());
        match invocation {
            GemmInvocation::Hgemm(tile) => reference_tile(tile),
            GemmInvocation::HgemmHpa(tile) => reference_tile(tile),
            GemmInvocation::Sgemm(tile) => reference_tile(tile),
            GemmInvocation::Dgemm(tile) => reference_tile(tile),
        }
    }

    fn asum(&self, invocation: AsumInvocation<'_>) -> BlasResult<Scalar> {
        if let Some(result) = self.interceptor.try_asum(&invocation) {
            return result;
        }
        Ok(match invocation {
            AsumInvocation::F32 { x, n, incx } => {
                Scalar::F32(reference::asum(n, x, incx) as f32)
            }
            AsumInvocation::F64 { x, n, incx } => Scalar::F64(reference::asum(n, x, incx)),
        })
    }

    fn workspace_bytes(&self, family: GemmFamily, m: usize, n: usize, k: usize) -> usize {
        self.interceptor.workspace_bytes(family, m, n, k)
    }
}

fn reference_tile<S, C>(tile: GemmTile<'_, S, C>) -> BlasResult<()>
where
    S: HostElement,
    C: KernelScalar,
{
    reference::gemm(
        tile.trans_a,
        tile.trans_b,
        tile.m,
        tile.n,
        tile.k,
        tile.alpha.to_f64(),
        tile.a,
        tile.lda,
        tile.b,
        tile.ldb,
        tile.beta.to_f64(),
        tile.c,
        tile.ldc,
        tile.d,
        tile.ldd,
    )
}
