use crate::error::{EngineError, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// A monetary value in minor currency units (cents). Signed so that ledger
/// deltas can be expressed directly; user-facing operation amounts go through
/// [`Amount`] instead.
///
/// Balances are never floating point. Fractional arithmetic only happens in
/// commission computation, via `rust_decimal`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash, Serialize, Deserialize,
)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Self = Self(0);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub fn minor(&self) -> i64 {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn checked_mul(&self, factor: i64) -> Option<Self> {
        self.0.checked_mul(factor).map(Self)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Neg for Money {
    type Output = Self;
    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

/// A strictly positive monetary amount, validated at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount(Money);

impl Amount {
    pub fn new(value: Money) -> Result<Self> {
        if value.is_positive() {
            Ok(Self(value))
        } else {
            Err(EngineError::Validation(format!(
                "amount must be positive, got {value}"
            )))
        }
    }

    pub fn from_minor(minor: i64) -> Result<Self> {
        Self::new(Money::from_minor(minor))
    }

    pub fn value(&self) -> Money {
        self.0
    }
}

impl TryFrom<Money> for Amount {
    type Error = EngineError;

    fn try_from(value: Money) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for Money {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

/// The platform's cut of a completed transaction, as a decimal fraction in
/// `[0, 1)`. Frozen into each order at creation time so later configuration
/// changes never retroactively affect existing orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionRate(Decimal);

impl CommissionRate {
    pub fn new(rate: Decimal) -> Result<Self> {
        if rate >= Decimal::ZERO && rate < Decimal::ONE {
            Ok(Self(rate))
        } else {
            Err(EngineError::Validation(format!(
                "commission rate must be in [0, 1), got {rate}"
            )))
        }
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Commission on `amount`, rounded to minor units with banker's rounding
    /// so that repeated settlements carry no systemic bias.
    pub fn commission_on(&self, amount: Money) -> Result<Money> {
        let gross = Decimal::from(amount.minor()) * self.0;
        let rounded = gross.round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
        let minor = rounded.to_i64().ok_or_else(|| {
            EngineError::Validation(format!("commission overflows minor units: {rounded}"))
        })?;
        Ok(Money::from_minor(minor))
    }
}
