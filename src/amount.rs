use rust_decimal::{prelude::ToPrimitive, Decimal};
use std::{convert::TryFrom, fmt, ops::Deref, str::FromStr};
use thiserror::Error;

/// A positive amount of rupees entered by the user for a deposit or withdrawal.
///
/// Amounts are always strictly greater than zero. They may carry a fractional part,
/// although such an amount can never be matched by a selection of whole notes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Amount(Decimal);

#[derive(Error, Debug, Eq, PartialEq)]
pub enum AmountError {
    #[error("'{0}' is not a valid amount")]
    Invalid(String),
    #[error("amounts must be greater than zero")]
    NotPositive,
}

impl Amount {
    /// Parse user input. Surrounding whitespace is ignored; anything else that isn't a
    /// plain decimal number is rejected.
    pub fn parse(input: &str) -> Result<Self, AmountError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(AmountError::Invalid(input.into()));
        }

        let value =
            Decimal::from_str(trimmed).map_err(|_| AmountError::Invalid(input.into()))?;
        Amount::try_from(value)
    }

    /// Returns the amount as a count of whole rupees, or `None` if it has a fractional
    /// part.
    pub fn whole_rupees(&self) -> Option<u64> {
        if self.0.fract().is_zero() {
            self.0.to_u64()
        } else {
            None
        }
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        if value <= Decimal::ZERO {
            return Err(AmountError::NotPositive);
        }

        // Strip trailing zeros so "130.00" displays the same as "130"
        Ok(Amount(value.normalize()))
    }
}

impl TryFrom<u64> for Amount {
    type Error = AmountError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Amount::try_from(Decimal::from(value))
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amount::parse(s)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Decimal {
        amount.0
    }
}

impl Deref for Amount {
    type Target = Decimal;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
