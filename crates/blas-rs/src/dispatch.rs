use std::fmt;

use crate::status::{BlasError, BlasResult};
use crate::types::{DataType, Operation};

/// Closed set of numeric GEMM paths the library can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GemmFamily {
    /// f16 storage, f16 accumulation.
    Hgemm,
    /// f16 storage, f32 accumulation and f32 scalars.
    HgemmHpa,
    Sgemm,
    Dgemm,
}

impl GemmFamily {
    /// Element type of A, B, C and D.
    pub fn storage_type(self) -> DataType {
        match self {
            GemmFamily::Hgemm | GemmFamily::HgemmHpa => DataType::F16,
            GemmFamily::Sgemm => DataType::F32,
            GemmFamily::Dgemm => DataType::F64,
        }
    }

    /// Accumulation type; alpha and beta are taken in this precision.
    pub fn compute_type(self) -> DataType {
        match self {
            GemmFamily::Hgemm => DataType::F16,
            GemmFamily::HgemmHpa | GemmFamily::Sgemm => DataType::F32,
            GemmFamily::Dgemm => DataType::F64,
        }
    }

    pub fn storage_bytes(self) -> usize {
        self.storage_type().size_in_bytes()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GemmFamily::Hgemm => "hgemm",
            GemmFamily::HgemmHpa => "hgemm_hpa",
            GemmFamily::Sgemm => "sgemm",
            GemmFamily::Dgemm => "dgemm",
        }
    }
}

impl fmt::Display for GemmFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operand, result and accumulation types of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GemmTypes {
    pub a: DataType,
    pub b: DataType,
    pub c: DataType,
    pub d: DataType,
    pub compute: DataType,
}

impl GemmTypes {
    /// All five positions set to `dtype`.
    pub fn uniform(dtype: DataType) -> Self {
        Self {
            a: dtype,
            b: dtype,
            c: dtype,
            d: dtype,
            compute: dtype,
        }
    }

    /// Uniform storage with a different accumulation type.
    pub fn with_compute(storage: DataType, compute: DataType) -> Self {
        Self {
            compute,
            ..Self::uniform(storage)
        }
    }
}

impl fmt::Display for GemmTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "a={} b={} c={} d={} compute={}",
            self.a, self.b, self.c, self.d, self.compute
        )
    }
}

/// Resolved execution path with transposes normalized for the family's element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GemmDispatch {
    pub family: GemmFamily,
    pub trans_a: Operation,
    pub trans_b: Operation,
}

/// Maps the type tuple and transpose pair to a kernel family.
///
/// Unsupported tuples fail with `InvalidValue`. Every supported family is real-valued, so
/// `ConjugateTranspose` is executed as `Transpose`.
pub fn dispatch_gemm(
    types: GemmTypes,
    trans_a: Operation,
    trans_b: Operation,
) -> BlasResult<GemmDispatch> {
    let storage_uniform = types.a == types.b && types.b == types.c && types.c == types.d;
    let family = match (storage_uniform, types.a, types.compute) {
        (true, DataType::F16, DataType::F16) => GemmFamily::Hgemm,
        (true, DataType::F16, DataType::F32) => GemmFamily::HgemmHpa,
        (true, DataType::F32, DataType::F32) => GemmFamily::Sgemm,
        (true, DataType::F64, DataType::F64) => GemmFamily::Dgemm,
        _ => {
            return Err(BlasError::invalid_value(format!(
                "unsupported gemm type combination ({types})"
            )))
        }
    };
    let dispatch = GemmDispatch {
        family,
        trans_a: trans_a.for_real(),
        trans_b: trans_b.for_real(),
    };
    log::debug!(
        "gemm dispatch: {types} {}{} -> {family}",
        trans_a.as_char(),
        trans_b.as_char()
    );
    Ok(dispatch)
}
