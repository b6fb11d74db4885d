use crate::device::DevicePtr;
use crate::dispatch::GemmTypes;
use crate::types::{DataType, Operation, Scalar};

/// One matrix operand: base pointer, element type, leading dimension and batch stride.
///
/// Strides are in elements; zero broadcasts one matrix to every batch element.
#[derive(Debug, Clone)]
pub struct MatrixArg {
    pub ptr: DevicePtr,
    pub dtype: DataType,
    pub ld: i64,
    pub stride: i64,
}

impl MatrixArg {
    pub fn new(ptr: DevicePtr, dtype: DataType, ld: i64, stride: i64) -> Self {
        Self {
            ptr,
            dtype,
            ld,
            stride,
        }
    }
}

/// A scalar argument whose location must agree with the handle's pointer mode.
#[derive(Debug, Clone, Default)]
pub enum ScalarArg {
    #[default]
    Null,
    Host(Scalar),
    /// Device address of one element of the compute type.
    Device(DevicePtr),
}

impl ScalarArg {
    pub fn is_null(&self) -> bool {
        match self {
            ScalarArg::Null => true,
            ScalarArg::Host(_) => false,
            ScalarArg::Device(ptr) => ptr.is_null(),
        }
    }

    /// True only for a host scalar known to be zero.
    pub fn is_host_zero(&self) -> bool {
        matches!(self, ScalarArg::Host(value) if value.is_zero())
    }
}

impl From<Scalar> for ScalarArg {
    fn from(value: Scalar) -> Self {
        ScalarArg::Host(value)
    }
}

impl From<DevicePtr> for ScalarArg {
    fn from(ptr: DevicePtr) -> Self {
        ScalarArg::Device(ptr)
    }
}

/// Arguments of one strided-batched GEMM request.
///
/// `D_i = alpha * op(A_i) * op(B_i) + beta * C_i` for `i < batch_count`, where `X_i` starts
/// `i * X.stride` elements past `X.ptr`. D may alias C.
#[derive(Debug, Clone)]
pub struct GemmStridedBatchedEx {
    pub trans_a: Operation,
    pub trans_b: Operation,
    pub m: i64,
    pub n: i64,
    pub k: i64,
    pub alpha: ScalarArg,
    pub a: MatrixArg,
    pub b: MatrixArg,
    pub beta: ScalarArg,
    pub c: MatrixArg,
    pub d: MatrixArg,
    pub batch_count: i64,
    pub compute_type: DataType,
}

impl GemmStridedBatchedEx {
    pub fn types(&self) -> GemmTypes {
        GemmTypes {
            a: self.a.dtype,
            b: self.b.dtype,
            c: self.c.dtype,
            d: self.d.dtype,
            compute: self.compute_type,
        }
    }

    /// Rows and columns of the stored A matrix (before `op`).
    pub fn a_shape(&self) -> (i64, i64) {
        if self.trans_a.is_transposed() {
            (self.k, self.m)
        } else {
            (self.m, self.k)
        }
    }

    /// Rows and columns of the stored B matrix (before `op`).
    pub fn b_shape(&self) -> (i64, i64) {
        if self.trans_b.is_transposed() {
            (self.n, self.k)
        } else {
            (self.k, self.n)
        }
    }
}
