//! Client-side model of a simulated ATM.
//!
//! A `Teller` drives login, deposits, balance checks and withdrawals against a
//! `Backend`. Withdrawals are split into notes by a `DenominationSelector`, which only
//! releases a selection once the notes add up to exactly the requested amount.

mod amount;
mod denomination;
mod selector;
mod session;
mod teller;

pub use amount::{Amount, AmountError};
pub use denomination::{DenominationError, DenominationSet, Selection, DEFAULT_DENOMINATIONS};
pub use selector::{DenominationSelector, OnConfirm, SelectorError, SelectorSlot, SelectorState};
pub use session::{Session, SessionError};
pub use teller::{
    Account, Backend, BackendError, Receipt, Teller, TellerConfig, TellerError, TransactionKind,
    WithdrawalRequest,
};

// Prefix for amounts shown to the customer unless `TellerConfig` says otherwise
const DEFAULT_CURRENCY_SYMBOL: &str = "₹";
