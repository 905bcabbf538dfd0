use crate::amount::Amount;
use log::{debug, trace};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, convert::TryFrom, fmt};
use thiserror::Error;

/// The note values dispensed by the ATM, largest first.
pub const DEFAULT_DENOMINATIONS: [u32; 6] = [500, 200, 100, 50, 20, 10];

/// A fixed, ordered set of note values.
///
/// The order is the order in which denominations are presented to the user. It is
/// immutable once constructed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DenominationSet(Vec<u32>);

/// The number of notes chosen for each denomination. Only non-zero counts are stored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selection(BTreeMap<u32, u32>);

#[derive(Error, Debug, Eq, PartialEq)]
pub enum DenominationError {
    #[error("a denomination set must contain at least one note value")]
    Empty,
    #[error("note values must be greater than zero")]
    ZeroValue,
    #[error("the note value {0} appears more than once")]
    Duplicate(u32),
    #[error("{0} is not an available denomination")]
    Unknown(u32),
    #[error("selected total {total} does not equal the requested amount {required}")]
    Mismatch { total: Decimal, required: Decimal },
}

impl DenominationSet {
    pub fn new(values: Vec<u32>) -> Result<Self, DenominationError> {
        if values.is_empty() {
            return Err(DenominationError::Empty);
        }

        for (i, v) in values.iter().enumerate() {
            if *v == 0 {
                return Err(DenominationError::ZeroValue);
            }
            if values[..i].contains(v) {
                return Err(DenominationError::Duplicate(*v));
            }
        }

        Ok(DenominationSet(values))
    }

    pub fn values(&self) -> &[u32] {
        &self.0
    }

    pub fn contains(&self, denomination: u32) -> bool {
        self.0.contains(&denomination)
    }

    /// Check that every note in `selection` belongs to this set and that the notes add
    /// up to exactly `amount`.
    pub fn validate(
        &self,
        selection: &Selection,
        amount: Amount,
    ) -> Result<(), DenominationError> {
        if let Some(d) = selection.denominations().find(|d| !self.contains(*d)) {
            return Err(DenominationError::Unknown(d));
        }

        let total = selection.total();
        if total != *amount {
            debug!("selection {} totals {}, expected {}", selection, total, amount);
            return Err(DenominationError::Mismatch {
                total,
                required: *amount,
            });
        }

        Ok(())
    }

    /// Break `amount` down largest note first.
    ///
    /// Returns `None` when the amount has a fractional part or leaves a remainder that
    /// no note can cover. Greedy is not exhaustive: for unusual sets a valid selection
    /// may exist even though this returns `None`.
    pub fn greedy(&self, amount: Amount) -> Option<Selection> {
        let mut remaining = amount.whole_rupees()?;

        let mut ordered = self.0.clone();
        ordered.sort_unstable_by(|a, b| b.cmp(a));

        let mut selection = Selection::default();
        for d in ordered {
            let count = remaining / d as u64;
            if count > 0 {
                // A count too large for u32 is not a withdrawal we can represent
                let count = u32::try_from(count).ok()?;
                selection.set(d, count);
                remaining -= count as u64 * d as u64;
            }
            trace!("greedy [{}]: remaining {}", d, remaining);
        }

        if remaining != 0 {
            debug!("greedy breakdown of {} leaves {} unallocated", amount, remaining);
            return None;
        }

        Some(selection)
    }
}

impl Default for DenominationSet {
    fn default() -> Self {
        DenominationSet(DEFAULT_DENOMINATIONS.to_vec())
    }
}

impl Selection {
    /// Set the count for a denomination. A count of zero removes the entry.
    pub fn set(&mut self, denomination: u32, count: u32) -> &mut Self {
        if count == 0 {
            self.0.remove(&denomination);
        } else {
            self.0.insert(denomination, count);
        }
        self
    }

    pub fn count(&self, denomination: u32) -> u32 {
        self.0.get(&denomination).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Denominations with a non-zero count, largest first
    pub fn denominations(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.keys().rev().copied()
    }

    /// (denomination, count) pairs, largest denomination first
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.0.iter().rev().map(|(d, c)| (*d, *c))
    }

    /// The weighted sum of every note in this selection
    pub fn total(&self) -> Decimal {
        self.0
            .iter()
            .map(|(d, c)| Decimal::from(*d as u64 * *c as u64))
            .sum()
    }

    /// A short summary such as `2x500, 1x20`, largest note first.
    pub fn memo(&self) -> String {
        self.iter()
            .map(|(d, c)| format!("{}x{}", c, d))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.memo())
    }
}
