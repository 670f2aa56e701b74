//! Log-space arithmetic shared by every lattice pass.
//!
//! Probabilities never leave log space inside the passes. Unreachable nodes
//! carry `-inf`, which `log_add` treats as the additive identity, so the
//! recursions need no special casing at the lattice border.

use std::fmt::{Debug, Display};

use num_traits::Float;
use numr::dtype::DType;

use crate::error::{Error, Result};

/// Floating-point width a loss call runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Precision {
    /// 32-bit floats
    Single,
    /// 64-bit floats
    Double,
}

impl Precision {
    /// Element width in bytes.
    pub fn bytes(self) -> usize {
        match self {
            Precision::Single => 4,
            Precision::Double => 8,
        }
    }

    pub fn from_bytes(bytes: usize) -> Result<Self> {
        match bytes {
            4 => Ok(Precision::Single),
            8 => Ok(Precision::Double),
            _ => Err(Error::UnsupportedPrecision { bytes }),
        }
    }

    /// Precision for an activation dtype; anything but F32/F64 is rejected.
    pub fn from_dtype(dtype: DType, op: &'static str) -> Result<Self> {
        match dtype {
            DType::F32 => Ok(Precision::Single),
            DType::F64 => Ok(Precision::Double),
            dtype => Err(Error::UnsupportedDType { op, dtype }),
        }
    }

    pub fn dtype(self) -> DType {
        match self {
            Precision::Single => DType::F32,
            Precision::Double => DType::F64,
        }
    }
}

/// Float types the loss kernels are instantiated for (`f32`, `f64`).
pub trait LossFloat:
    Float + bytemuck::Pod + Send + Sync + Debug + Display + Default + 'static
{
    const PRECISION: Precision;
}

impl LossFloat for f32 {
    const PRECISION: Precision = Precision::Single;
}

impl LossFloat for f64 {
    const PRECISION: Precision = Precision::Double;
}

/// `log(exp(a) + exp(b))` without leaving log space.
///
/// `log_add(-inf, x) == x` for every `x`, including `-inf`.
#[inline]
pub fn log_add<T: LossFloat>(a: T, b: T) -> T {
    let neg_inf = T::neg_infinity();
    if a == neg_inf {
        return b;
    }
    if b == neg_inf {
        return a;
    }
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

/// `log(sum(exp(x)))` over a slice; `-inf` for an empty slice.
pub fn log_sum_exp<T: LossFloat>(xs: &[T]) -> T {
    let max = xs.iter().copied().fold(T::neg_infinity(), T::max);
    if !max.is_finite() {
        return max;
    }
    let sum = xs.iter().fold(T::zero(), |acc, &x| acc + (x - max).exp());
    max + sum.ln()
}
