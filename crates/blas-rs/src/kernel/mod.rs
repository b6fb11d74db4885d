//! Kernel seam between the executor and numeric implementations.
//!
//! The executor hands kernels dense host views of one batch element at a time; kernels never
//! see device pointers, strides or the stream.

use std::fmt::Debug;
use std::ops::{Add, Mul};

use bytemuck::Pod;
use half::f16;

use crate::dispatch::GemmFamily;
use crate::status::{BlasError, BlasResult};
use crate::types::{Operation, Scalar};

mod portable;
pub mod registry;

pub use portable::PortableKernels;

/// One column-major GEMM problem: `d = alpha * op(a) * op(b) + beta * c`.
///
/// `S` is the storage type and `C` the accumulation type. `c` is `None` when beta is zero and C
/// must not be read. Transposes are already normalized, never `ConjugateTranspose`.
#[derive(Debug)]
pub struct GemmTile<'a, S, C> {
    pub trans_a: Operation,
    pub trans_b: Operation,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub alpha: C,
    pub beta: C,
    pub a: &'a [S],
    pub lda: usize,
    pub b: &'a [S],
    pub ldb: usize,
    pub c: Option<&'a [S]>,
    pub ldc: usize,
    pub d: &'a mut [S],
    pub ldd: usize,
}

impl<S: Copy, C> GemmTile<'_, S, C> {
    /// Verifies the staged slices cover every element the tile addresses.
    pub fn check_extents(&self) -> BlasResult<()> {
        let (m, n, k) = (self.m, self.n, self.k);
        if m == 0 || n == 0 {
            return Ok(());
        }
        let (a_rows, a_cols) = if self.trans_a.is_transposed() {
            (k, m)
        } else {
            (m, k)
        };
        let (b_rows, b_cols) = if self.trans_b.is_transposed() {
            (n, k)
        } else {
            (k, n)
        };
        let c_len = self.c.map(<[S]>::len);
        let checks = [
            ("a", Some(self.a.len()), a_rows, a_cols, self.lda),
            ("b", Some(self.b.len()), b_rows, b_cols, self.ldb),
            ("c", c_len, m, n, self.ldc),
            ("d", Some(self.d.len()), m, n, self.ldd),
        ];
        for (name, len, rows, cols, ld) in checks {
            let Some(len) = len else { continue };
            if rows == 0 || cols == 0 {
                continue;
            }
            let needed = ld
                .checked_mul(cols - 1)
                .and_then(|columns| columns.checked_add(rows));
            if ld < rows || needed.map_or(true, |needed| len < needed) {
                return Err(BlasError::invalid_size(format!(
                    "{name} tile of {rows}x{cols} (ld {ld}) does not fit {len} staged elements"
                )));
            }
        }
        Ok(())
    }

    /// Element `(row, col)` of `op(a)`.
    #[inline]
    pub fn a_at(&self, row: usize, col: usize) -> S {
        match self.trans_a {
            Operation::NoTranspose => self.a[row + col * self.lda],
            _ => self.a[col + row * self.lda],
        }
    }

    /// Element `(row, col)` of `op(b)`.
    #[inline]
    pub fn b_at(&self, row: usize, col: usize) -> S {
        match self.trans_b {
            Operation::NoTranspose => self.b[row + col * self.ldb],
            _ => self.b[col + row * self.ldb],
        }
    }
}

/// A typed GEMM tile per kernel family.
#[derive(Debug)]
pub enum GemmInvocation<'a> {
    Hgemm(GemmTile<'a, f16, f16>),
    HgemmHpa(GemmTile<'a, f16, f32>),
    Sgemm(GemmTile<'a, f32, f32>),
    Dgemm(GemmTile<'a, f64, f64>),
}

impl GemmInvocation<'_> {
    pub fn family(&self) -> GemmFamily {
        match self {
            GemmInvocation::Hgemm(_) => GemmFamily::Hgemm,
            GemmInvocation::HgemmHpa(_) => GemmFamily::HgemmHpa,
            GemmInvocation::Sgemm(_) => GemmFamily::Sgemm,
            GemmInvocation::Dgemm(_) => GemmFamily::Dgemm,
        }
    }
}

/// Strided vector for a sum of absolute values: elements `x[i * incx]` for `i < n`.
#[derive(Debug, Clone, Copy)]
pub enum AsumInvocation<'a> {
    F32 { x: &'a [f32], n: usize, incx: usize },
    F64 { x: &'a [f64], n: usize, incx: usize },
}

/// A set of numeric kernels the executor can run batch elements on.
pub trait BlasKernels: Send + Sync {
    /// Registry name (e.g. "portable", "faer").
    fn name(&self) -> &str;

    /// Computes one batch element in place on `d`.
    fn gemm(&self, invocation: GemmInvocation<'_>) -> BlasResult<()>;

    /// Sum of absolute values, returned in the vector's precision.
    fn asum(&self, invocation: AsumInvocation<'_>) -> BlasResult<Scalar>;

    /// Extra device scratch one batch element needs beyond operand staging.
    fn workspace_bytes(&self, _family: GemmFamily, _m: usize, _n: usize, _k: usize) -> usize {
        0
    }
}

/// Accumulation scalar of a kernel family.
pub trait KernelScalar:
    Pod + Debug + PartialEq + Send + Sync + Add<Output = Self> + Mul<Output = Self>
{
    const ZERO: Self;

    fn from_scalar(value: Scalar) -> Self;

    fn to_f64(self) -> f64;
}

impl KernelScalar for f16 {
    const ZERO: Self = f16::ZERO;

    fn from_scalar(value: Scalar) -> Self {
        value.to_f16()
    }

    fn to_f64(self) -> f64 {
        f16::to_f64(self)
    }
}

impl KernelScalar for f32 {
    const ZERO: Self = 0.0;

    fn from_scalar(value: Scalar) -> Self {
        value.to_f32()
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }
}

impl KernelScalar for f64 {
    const ZERO: Self = 0.0;

    fn from_scalar(value: Scalar) -> Self {
        value.to_f64()
    }

    fn to_f64(self) -> f64 {
        self
    }
}

/// Conversion between a storage type and an accumulation type.
pub trait Promote<C>: Copy {
    fn promote(self) -> C;

    fn demote(value: C) -> Self;
}

impl<T: KernelScalar> Promote<T> for T {
    #[inline]
    fn promote(self) -> T {
        self
    }

    #[inline]
    fn demote(value: T) -> Self {
        value
    }
}

impl Promote<f32> for f16 {
    #[inline]
    fn promote(self) -> f32 {
        self.to_f32()
    }

    #[inline]
    fn demote(value: f32) -> Self {
        f16::from_f32(value)
    }
}
