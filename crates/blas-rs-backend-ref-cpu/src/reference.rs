//! Host oracle routines: column-major GEMM and asum over plain slices, accumulating in f64.
//!
//! These are the comparison baseline for every kernel set; they favour obviousness over speed.

use std::ops::Range;

use blas_rs::{BlasError, BlasResult, Operation};
use half::f16;

/// Element type the oracle can read and write.
pub trait HostElement: Copy + Send + Sync + 'static {
    fn to_f64(self) -> f64;

    fn from_f64(value: f64) -> Self;
}

impl HostElement for f16 {
    fn to_f64(self) -> f64 {
        f16::to_f64(self)
    }

    fn from_f64(value: f64) -> Self {
        f16::from_f64(value)
    }
}

impl HostElement for f32 {
    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl HostElement for f64 {
    fn to_f64(self) -> f64 {
        self
    }

    fn from_f64(value: f64) -> Self {
        value
    }
}

fn stored_shape(op: Operation, rows: usize, cols: usize) -> (usize, usize) {
    if op.is_transposed() {
        (cols, rows)
    } else {
        (rows, cols)
    }
}

fn check_operand(name: &str, len: usize, rows: usize, cols: usize, ld: usize) -> BlasResult<()> {
    if rows == 0 || cols == 0 {
        return Ok(());
    }
    let fits = extent(rows, cols, ld).is_some_and(|needed| len >= needed);
    if ld < rows || !fits {
        return Err(BlasError::invalid_size(format!(
            "{name}: {rows}x{cols} with ld {ld} needs more than {len} elements"
        )));
    }
    Ok(())
}

#[inline]
fn op_at<T: HostElement>(op: Operation, values: &[T], ld: usize, row: usize, col: usize) -> f64 {
    match op {
        Operation::NoTranspose => values[row + col * ld].to_f64(),
        _ => values[col + row * ld].to_f64(),
    }
}

/// `d = alpha * op(a) * op(b) + beta * c` for one column-major problem.
///
/// `c` is not read when `beta == 0` or when it is `None`.
#[allow(clippy::too_many_arguments)]
pub fn gemm<T: HostElement>(
    trans_a: Operation,
    trans_b: Operation,
    m: usize,
    n: usize,
    k: usize,
    alpha: f64,
    a: &[T],
    lda: usize,
    b: &[T],
    ldb: usize,
    beta: f64,
    c: Option<&[T]>,
    ldc: usize,
    d: &mut [T],
    ldd: usize,
) -> BlasResult<()> {
    if m == 0 || n == 0 {
        return Ok(());
    }
    let k = if alpha == 0.0 { 0 } else { k };
    let (a_rows, a_cols) = stored_shape(trans_a, m, k);
    let (b_rows, b_cols) = stored_shape(trans_b, k, n);
    check_operand("a", a.len(), a_rows, a_cols, lda)?;
    check_operand("b", b.len(), b_rows, b_cols, ldb)?;
    check_operand("d", d.len(), m, n, ldd)?;
    let c = c.filter(|_| beta != 0.0);
    if let Some(c) = c {
        check_operand("c", c.len(), m, n, ldc)?;
    }

    for col in 0..n {
        for row in 0..m {
            let mut acc = 0.0f64;
            for l in 0..k {
                acc += op_at(trans_a, a, lda, row, l) * op_at(trans_b, b, ldb, l, col);
            }
            let mut value = alpha * acc;
            if let Some(c) = c {
                value += beta * c[row + col * ldc].to_f64();
            }
            d[row + col * ldd] = T::from_f64(value);
        }
    }
    Ok(())
}

/// Column-major footprint of a stored `rows x cols` matrix, or `None` when it overflows.
pub fn extent(rows: usize, cols: usize, ld: usize) -> Option<usize> {
    if rows == 0 || cols == 0 {
        return Some(0);
    }
    ld.checked_mul(cols - 1)?.checked_add(rows)
}

/// Shape and layout of a strided batch, in elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLayout {
    pub trans_a: Operation,
    pub trans_b: Operation,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub lda: usize,
    pub ldb: usize,
    pub ldc: usize,
    pub ldd: usize,
    pub stride_a: usize,
    pub stride_b: usize,
    pub stride_c: usize,
    pub stride_d: usize,
    pub batch_count: usize,
}

/// Element range of batch element `index`.
fn batch_range(name: &str, index: usize, stride: usize, len: usize) -> BlasResult<Range<usize>> {
    index
        .checked_mul(stride)
        .and_then(|start| Some(start..start.checked_add(len)?))
        .ok_or_else(|| BlasError::invalid_size(format!("{name} batch element overflows")))
}

/// Runs the batch in index order against host copies of every operand.
///
/// `d` must already hold C's contents wherever D aliases C; elements are processed in order, so
/// zero-stride outputs keep the last element's result.
pub fn gemm_strided_batched<T: HostElement>(
    layout: &BatchLayout,
    alpha: f64,
    a: &[T],
    b: &[T],
    beta: f64,
    c: Option<&[T]>,
    d: &mut [T],
) -> BlasResult<()> {
    let (a_rows, a_cols) = stored_shape(layout.trans_a, layout.m, layout.k);
    let (b_rows, b_cols) = stored_shape(layout.trans_b, layout.k, layout.n);
    let checked_extent = |name: &str, rows: usize, cols: usize, ld: usize| {
        extent(rows, cols, ld)
            .ok_or_else(|| BlasError::invalid_size(format!("{name} extent overflows")))
    };
    let a_extent = checked_extent("a", a_rows, a_cols, layout.lda)?;
    let b_extent = checked_extent("b", b_rows, b_cols, layout.ldb)?;
    let c_extent = checked_extent("c", layout.m, layout.n, layout.ldc)?;
    let d_extent = checked_extent("d", layout.m, layout.n, layout.ldd)?;
    let slice = |values: &[T], range: Range<usize>, name: &str| -> BlasResult<Vec<T>> {
        values
            .get(range)
            .map(<[T]>::to_vec)
            .ok_or_else(|| BlasError::invalid_size(format!("{name} batch element out of range")))
    };

    for index in 0..layout.batch_count {
        let a_i = slice(a, batch_range("a", index, layout.stride_a, a_extent)?, "a")?;
        let b_i = slice(b, batch_range("b", index, layout.stride_b, b_extent)?, "b")?;
        let c_i = match c {
            Some(c) if beta != 0.0 => {
                let range = batch_range("c", index, layout.stride_c, c_extent)?;
                Some(slice(c, range, "c")?)
            }
            _ => None,
        };
        let d_i = d
            .get_mut(batch_range("d", index, layout.stride_d, d_extent)?)
            .ok_or_else(|| BlasError::invalid_size("d batch element out of range"))?;
        gemm(
            layout.trans_a,
            layout.trans_b,
            layout.m,
            layout.n,
            layout.k,
            alpha,
            &a_i,
            layout.lda,
            &b_i,
            layout.ldb,
            beta,
            c_i.as_deref(),
            layout.ldc,
            d_i,
            layout.ldd,
        )?;
    }
    Ok(())
}

/// Sum of `|x[i * incx]|` for `i < n`; zero when `n == 0` or `incx == 0`.
pub fn asum<T: HostElement>(n: usize, x: &[T], incx: usize) -> f64 {
    if n == 0 || incx == 0 {
        return 0.0;
    }
    x.iter()
        .step_by(incx)
        .take(n)
        .map(|value| value.to_f64().abs())
        .sum()
}
