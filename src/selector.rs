use crate::{
    amount::Amount,
    denomination::{DenominationSet, Selection},
    DEFAULT_CURRENCY_SYMBOL,
};
use log::{debug, trace};
use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;

/// Continuation fired with the final selection once the total matches the request.
pub type OnConfirm = Box<dyn FnOnce(Selection)>;

/// Lifecycle of a single selector. `Open` is the only state that accepts input; the
/// other two are terminal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SelectorState {
    Open,
    Confirmed,
    Cancelled,
}

#[derive(Error, Debug, Eq, PartialEq)]
pub enum SelectorError {
    #[error("Selected total must equal the requested amount ({currency}{required})")]
    AmountMismatch { required: Amount, currency: String },
    #[error("{0} is not an available denomination")]
    UnknownDenomination(u32),
    #[error("too many {0} notes requested")]
    CountTooLarge(u32),
    #[error("the denomination selector is closed")]
    Closed,
}

/// Lets the user split a withdrawal across a fixed set of notes.
///
/// Every denomination starts at a count of zero. Counts can be changed freely while the
/// selector is open, and the running total is always the weighted sum of all counts.
/// Confirming only succeeds when that total equals the requested amount exactly, at
/// which point the selector closes and hands the non-zero counts to the completion
/// callback. Cancelling closes the selector without calling it.
pub struct DenominationSelector {
    amount: Amount,
    denominations: DenominationSet,
    // Parallel to `denominations.values()`
    counts: Vec<u32>,
    currency: String,
    state: SelectorState,
    on_confirm: Option<OnConfirm>,
}

impl DenominationSelector {
    pub fn open<F>(amount: Amount, denominations: DenominationSet, on_confirm: F) -> Self
    where
        F: FnOnce(Selection) + 'static,
    {
        debug!(
            "opening selector for {} over {:?}",
            amount,
            denominations.values()
        );

        let counts = vec![0; denominations.values().len()];
        DenominationSelector {
            amount,
            denominations,
            counts,
            currency: DEFAULT_CURRENCY_SYMBOL.into(),
            state: SelectorState::Open,
            on_confirm: Some(Box::new(on_confirm)),
        }
    }

    /// Prefix amounts in the title and mismatch message with `symbol`
    pub fn with_currency<S: Into<String>>(mut self, symbol: S) -> Self {
        self.currency = symbol.into();
        self
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn denominations(&self) -> &DenominationSet {
        &self.denominations
    }

    pub fn state(&self) -> SelectorState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SelectorState::Open
    }

    pub fn title(&self) -> String {
        format!("Select denominations for {}{}", self.currency, self.amount)
    }

    pub fn count(&self, denomination: u32) -> u32 {
        self.position(denomination)
            .map(|i| self.counts[i])
            .unwrap_or(0)
    }

    /// Update the count for one denomination from raw user input and return the new
    /// running total. Blank or non-numeric input counts as zero. A count that doesn't fit
    /// in a `u32` is rejected and the previous count is kept.
    pub fn set_count(
        &mut self,
        denomination: u32,
        input: &str,
    ) -> Result<Decimal, SelectorError> {
        self.ensure_open()?;

        let i = self
            .position(denomination)
            .ok_or(SelectorError::UnknownDenomination(denomination))?;
        self.counts[i] =
            parse_count(input).ok_or(SelectorError::CountTooLarge(denomination))?;

        let total = self.total();
        trace!(
            "count for {} set to {} from {:?}, total {}",
            denomination,
            self.counts[i],
            input,
            total
        );

        Ok(total)
    }

    /// Σ(denomination × count) over every denomination, zero counts included
    pub fn total(&self) -> Decimal {
        self.denominations
            .values()
            .iter()
            .zip(self.counts.iter())
            .map(|(d, c)| Decimal::from(*d as u64 * *c as u64))
            .sum()
    }

    pub fn total_line(&self) -> String {
        format!("Total selected: {}", self.total())
    }

    /// The current non-zero counts
    pub fn selection(&self) -> Selection {
        let mut selection = Selection::default();
        for (d, c) in self.denominations.values().iter().zip(self.counts.iter()) {
            selection.set(*d, *c);
        }
        selection
    }

    /// Close the selector and fire the completion callback if the total matches the
    /// requested amount. On a mismatch nothing changes and the user may correct the
    /// counts and try again.
    pub fn confirm(&mut self) -> Result<(), SelectorError> {
        self.ensure_open()?;

        let total = self.total();
        if total != *self.amount {
            debug!(
                "selection totals {} but {} was requested - keeping selector open",
                total, self.amount
            );
            return Err(SelectorError::AmountMismatch {
                required: self.amount,
                currency: self.currency.clone(),
            });
        }

        let selection = self.selection();
        debug!("selection {} confirmed for {}", selection, self.amount);

        self.state = SelectorState::Confirmed;
        if let Some(on_confirm) = self.on_confirm.take() {
            on_confirm(selection);
        }

        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), SelectorError> {
        self.ensure_open()?;

        debug!("selector for {} cancelled", self.amount);
        self.state = SelectorState::Cancelled;
        self.on_confirm = None;

        Ok(())
    }

    fn ensure_open(&self) -> Result<(), SelectorError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(SelectorError::Closed)
        }
    }

    fn position(&self, denomination: u32) -> Option<usize> {
        self.denominations
            .values()
            .iter()
            .position(|d| *d == denomination)
    }
}

impl fmt::Debug for DenominationSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DenominationSelector")
            .field("amount", &self.amount)
            .field("denominations", &self.denominations)
            .field("counts", &self.counts)
            .field("currency", &self.currency)
            .field("state", &self.state)
            .finish()
    }
}

/// Holds at most one open selector. Opening a new selector discards the previous one
/// without firing its callback.
#[derive(Debug, Default)]
pub struct SelectorSlot {
    current: Option<DenominationSelector>,
}

impl SelectorSlot {
    pub fn open(&mut self, selector: DenominationSelector) -> &mut DenominationSelector {
        if let Some(prev) = self.current.take() {
            if prev.is_open() {
                debug!("discarding unfinished selector for {}", prev.amount());
            }
        }

        self.current.get_or_insert(selector)
    }

    /// The selector awaiting input, if any
    pub fn current(&self) -> Option<&DenominationSelector> {
        self.current.as_ref().filter(|s| s.is_open())
    }

    pub fn current_mut(&mut self) -> Option<&mut DenominationSelector> {
        self.current.as_mut().filter(|s| s.is_open())
    }

    pub fn is_open(&self) -> bool {
        self.current().is_some()
    }

    /// Drop whatever is in the slot without firing any callback
    pub fn clear(&mut self) {
        self.current = None;
    }
}

// Mirrors `parseInt(input) || 0`: an optional sign followed by a run of digits, ignoring
// anything after. Negative counts make no sense for notes so they become zero. `None`
// means the digits overflow a `u32`.
fn parse_count(input: &str) -> Option<u32> {
    let trimmed = input.trim_start();
    let (negative, rest) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() || negative {
        return Some(0);
    }

    // The only way a run of digits fails to parse is overflow
    digits.parse().ok()
}
