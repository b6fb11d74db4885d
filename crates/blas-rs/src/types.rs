use std::fmt;

use half::f16;

/// Element types a matrix operand or compute type can declare.
///
/// Only the real floating types take part in a supported GEMM tuple; the rest exist so callers can
/// describe operands the dispatcher must reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    I8,
    I32,
    Bf16,
    F16,
    F32,
    F64,
    Cf32,
    Cf64,
}

impl DataType {
    /// Returns `true` when the type is a real or complex floating-point representation.
    pub fn is_float(self) -> bool {
        matches!(
            self,
            DataType::Bf16
                | DataType::F16
                | DataType::F32
                | DataType::F64
                | DataType::Cf32
                | DataType::Cf64
        )
    }

    pub fn is_complex(self) -> bool {
        matches!(self, DataType::Cf32 | DataType::Cf64)
    }

    /// Storage width of one element in bytes.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DataType::I8 => 1,
            DataType::Bf16 | DataType::F16 => 2,
            DataType::I32 | DataType::F32 => 4,
            DataType::F64 | DataType::Cf32 => 8,
            DataType::Cf64 => 16,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataType::I8 => "i8",
            DataType::I32 => "i32",
            DataType::Bf16 => "bf16",
            DataType::F16 => "f16",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
            DataType::Cf32 => "cf32",
            DataType::Cf64 => "cf64",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an operand enters the product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Operation {
    #[default]
    NoTranspose,
    Transpose,
    ConjugateTranspose,
}

impl Operation {
    pub fn is_transposed(self) -> bool {
        !matches!(self, Operation::NoTranspose)
    }

    /// Collapses conjugate-transpose onto transpose; conjugation is the identity on real data.
    pub fn for_real(self) -> Operation {
        match self {
            Operation::ConjugateTranspose => Operation::Transpose,
            other => other,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Operation::NoTranspose => 'N',
            Operation::Transpose => 'T',
            Operation::ConjugateTranspose => 'C',
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Where scalar arguments and scalar results live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PointerMode {
    #[default]
    Host,
    Device,
}

/// Reported residency of an address; host residency is never confirmable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerLocation {
    Device,
    Unknown,
}

/// Argument validation strictness for a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ValidationMode {
    /// Zero-stride outputs with `batch_count > 1` are accepted; the last batch element wins.
    #[default]
    Permissive,
    /// Zero-stride outputs with `batch_count > 1` are rejected with `InvalidSize`.
    Strict,
}

/// A host-resident scalar value tagged with its precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    F16(f16),
    F32(f32),
    F64(f64),
}

impl Scalar {
    pub fn dtype(self) -> DataType {
        match self {
            Scalar::F16(_) => DataType::F16,
            Scalar::F32(_) => DataType::F32,
            Scalar::F64(_) => DataType::F64,
        }
    }

    pub fn to_f64(self) -> f64 {
        match self {
            Scalar::F16(v) => v.to_f64(),
            Scalar::F32(v) => f64::from(v),
            Scalar::F64(v) => v,
        }
    }

    pub fn to_f32(self) -> f32 {
        match self {
            Scalar::F16(v) => v.to_f32(),
            Scalar::F32(v) => v,
            Scalar::F64(v) => v as f32,
        }
    }

    pub fn to_f16(self) -> f16 {
        match self {
            Scalar::F16(v) => v,
            Scalar::F32(v) => f16::from_f32(v),
            Scalar::F64(v) => f16::from_f64(v),
        }
    }

    pub fn is_zero(self) -> bool {
        self.to_f64() == 0.0
    }
}

impl From<f16> for Scalar {
    fn from(value: f16) -> Self {
        Scalar::F16(value)
    }
}

impl From<f32> for Scalar {
    fn from(value: f32) -> Self {
        Scalar::F32(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::F64(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conjugate_transpose_collapses_for_real_operands() {
        assert_eq!(
            Operation::ConjugateTranspose.for_real(),
            Operation::Transpose
        );
        assert_eq!(Operation::NoTranspose.for_real(), Operation::NoTranspose);
        assert!(Operation::ConjugateTranspose.is_transposed());
    }

    #[test]
    fn scalar_conversions_preserve_exact_values() {
        let s = Scalar::from(f16::from_f32(0.5));
        assert_eq!(s.to_f64(), 0.5);
        assert_eq!(Scalar::F64(-2.0).to_f32(), -2.0);
        assert!(Scalar::F32(0.0).is_zero());
        assert!(Scalar::F32(-0.0).is_zero());
    }
}
