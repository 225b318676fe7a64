use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, Mul, Neg, Sub, SubAssign},
};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::op;

pub const CNY_CURRENCY_CODE: &str = "CNY";
pub const CNY_CURRENCY_CODE_LOWER: &str = "cny";

//--------------------------------------        Fen           ---------------------------------------------------------

/// A monetary amount in fen, the minor unit of the renminbi (1 yuan = 100 fen).
/// All amounts sent to and received from the payment gateway are integer fen.
#[derive(Debug, Clone, Copy, Default, Type, Ord, PartialOrd, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct Fen(i64);

op!(binary Fen, Add, add);
op!(binary Fen, Sub, sub);
op!(inplace Fen, SubAssign, sub_assign);
op!(unary Fen, Neg, neg);

impl Mul<i64> for Fen {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        Self::from(self.value() * rhs)
    }
}

impl Sum for Fen {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Value cannot be represented in fen: {0}")]
pub struct FenConversionError(String);

impl From<i64> for Fen {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl PartialEq for Fen {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Fen {}

impl TryFrom<u64> for Fen {
    type Error = FenConversionError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value > i64::MAX as u64 {
            Err(FenConversionError(format!("Value {} is too large to convert to Fen", value)))
        } else {
            #[allow(clippy::cast_possible_wrap)]
            Ok(Self(value as i64))
        }
    }
}

impl Display for Fen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 < 100 {
            write!(f, "{}分", self.0)
        } else {
            let yuan = self.0 as f64 / 100.0;
            write!(f, "¥{yuan:0.2}")
        }
    }
}

impl Fen {
    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn from_yuan(yuan: i64) -> Self {
        Self(yuan * 100)
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }
}
