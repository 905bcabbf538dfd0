use crate::{
    amount::{Amount, AmountError},
    denomination::{DenominationError, DenominationSet, Selection},
    selector::{DenominationSelector, SelectorError, SelectorSlot},
    session::{Session, SessionError},
    DEFAULT_CURRENCY_SYMBOL,
};
use chrono::{DateTime, Utc};
use log::{debug, error};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::mpsc::{self, Receiver},
};
use thiserror::Error;

// Number of history lines shown on a mini statement
const STATEMENT_ROWS: usize = 5;

/// The server that owns accounts and balances.
///
/// Implementations are expected to wrap the HTTP endpoints of the ATM service. The
/// session is passed to every call; implementations must not cache it.
pub trait Backend {
    /// Look up the account for a PIN
    fn login(&mut self, session: &Session) -> Result<Account, BackendError>;

    fn balance(&mut self, session: &Session) -> Result<Decimal, BackendError>;

    fn deposit(&mut self, session: &Session, amount: Amount) -> Result<Account, BackendError>;

    fn withdraw(
        &mut self,
        session: &Session,
        request: &WithdrawalRequest,
    ) -> Result<Account, BackendError>;

    /// Where the customer's PDF mini statement can be downloaded from
    fn statement_url(&self, session: &Session) -> String;
}

#[derive(Error, Debug, Eq, PartialEq)]
pub enum BackendError {
    #[error("User does not exist")]
    UserNotFound,
    #[error("{0}")]
    Rejected(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

/// The customer's account as reported by the backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub balance: Decimal,
    #[serde(default)]
    pub transactions: Vec<String>,
}

/// Body of a withdrawal call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub pin: String,
    pub amount: Decimal,
    pub denominations: Selection,
}

impl WithdrawalRequest {
    pub fn new(session: &Session, amount: Amount, denominations: Selection) -> Self {
        WithdrawalRequest {
            pin: session.pin().into(),
            amount: amount.into(),
            denominations,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Deposit => write!(f, "deposit"),
            TransactionKind::Withdrawal => write!(f, "withdrawal"),
        }
    }
}

/// Confirmation of a completed deposit or withdrawal
#[derive(Clone, Debug, PartialEq)]
pub struct Receipt {
    pub kind: TransactionKind,
    pub amount: Amount,
    pub notes: Option<Selection>,
    pub balance: Decimal,
    pub currency: String,
    pub issued: DateTime<Utc>,
}

impl Receipt {
    fn new(
        kind: TransactionKind,
        amount: Amount,
        notes: Option<Selection>,
        balance: Decimal,
        currency: &str,
    ) -> Self {
        Receipt {
            kind,
            amount,
            notes,
            balance,
            currency: currency.into(),
            issued: Utc::now(),
        }
    }

    /// One-line summary, e.g. `Withdraw ₹130 [1x50, 4x20]`
    pub fn line(&self) -> String {
        match (self.kind, &self.notes) {
            (TransactionKind::Deposit, _) => {
                format!("Deposit {}{}", self.currency, self.amount)
            }
            (TransactionKind::Withdrawal, Some(notes)) => {
                format!("Withdraw {}{} {}", self.currency, self.amount, notes)
            }
            (TransactionKind::Withdrawal, None) => {
                format!("Withdraw {}{}", self.currency, self.amount)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TellerConfig {
    pub denominations: DenominationSet,
    /// Prefix for every amount shown to the customer
    pub currency_symbol: String,
    pub statement_rows: usize,
}

impl Default for TellerConfig {
    fn default() -> Self {
        TellerConfig {
            denominations: DenominationSet::default(),
            currency_symbol: DEFAULT_CURRENCY_SYMBOL.into(),
            statement_rows: STATEMENT_ROWS,
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum TellerError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("no customer is logged in")]
    NotLoggedIn,
    #[error("{0}")]
    LoginFailed(BackendError),
    #[error("Please enter a valid {kind} amount")]
    InvalidAmount { kind: TransactionKind, source: AmountError },
    #[error(transparent)]
    Selector(#[from] SelectorError),
    #[error("no withdrawal is awaiting confirmation")]
    NoWithdrawalInProgress,
    #[error("{currency}{amount} cannot be dispensed with the available notes")]
    NoBreakdown { amount: Amount, currency: String },
    #[error(transparent)]
    Denomination(#[from] DenominationError),
    #[error("Invalid amount / insufficient balance")]
    WithdrawalRefused(BackendError),
    #[error("Unable to fetch balance")]
    BalanceUnavailable(BackendError),
    #[error("Transaction failed")]
    Backend(#[from] BackendError),
}

/// Drives the customer-facing ATM flow on top of a `Backend`.
///
/// Withdrawals go through a `DenominationSelector`: `begin_withdrawal` opens it,
/// `set_count` edits it, and `confirm_withdrawal` forwards the confirmed selection to
/// the backend.
pub struct Teller<B: Backend> {
    backend: B,
    config: TellerConfig,
    session: Option<Session>,
    account: Option<Account>,
    selector: SelectorSlot,
    confirmed: Option<Receiver<Selection>>,
}

impl<B: Backend> Teller<B> {
    pub fn new(backend: B, config: TellerConfig) -> Self {
        Teller {
            backend,
            config,
            session: None,
            account: None,
            selector: SelectorSlot::default(),
            confirmed: None,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn account(&self) -> Option<&Account> {
        self.account.as_ref()
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.is_some()
    }

    /// Authenticate with a PIN and return the welcome line
    pub fn login(&mut self, pin: &str) -> Result<String, TellerError> {
        let session = Session::new(pin)?;

        let account = self.backend.login(&session).map_err(|e| {
            error!("login failed: {}", e);
            TellerError::LoginFailed(e)
        })?;
        debug!("logged in as {}", account.username);

        let welcome = format!("Welcome, {}", account.username);
        self.session = Some(session);
        self.account = Some(account);

        Ok(welcome)
    }

    pub fn logout(&mut self) {
        debug!("logging out");
        self.session = None;
        self.account = None;
        self.selector.clear();
        self.confirmed = None;
    }

    pub fn balance_line(&self) -> Option<String> {
        let symbol = &self.config.currency_symbol;
        self.account
            .as_ref()
            .map(|a| format!("Balance: {}{}", symbol, a.balance))
    }

    pub fn refresh_balance(&mut self) -> Result<Decimal, TellerError> {
        let session = self.session()?;

        let balance = self.backend.balance(&session).map_err(|e| {
            error!("unable to fetch balance: {}", e);
            TellerError::BalanceUnavailable(e)
        })?;
        if let Some(account) = self.account.as_mut() {
            account.balance = balance;
        }

        Ok(balance)
    }

    pub fn deposit(&mut self, input: &str) -> Result<Receipt, TellerError> {
        let session = self.session()?;
        let amount = parse_amount(input, TransactionKind::Deposit)?;

        let account = self.backend.deposit(&session, amount).map_err(|e| {
            error!("deposit of {} failed: {}", amount, e);
            e
        })?;
        let receipt = Receipt::new(
            TransactionKind::Deposit,
            amount,
            None,
            account.balance,
            &self.config.currency_symbol,
        );
        debug!("{}", receipt.line());
        self.account = Some(account);

        Ok(receipt)
    }

    /// Validate the amount and open a selector for it, replacing any selector that is
    /// still open.
    pub fn begin_withdrawal(
        &mut self,
        input: &str,
    ) -> Result<&DenominationSelector, TellerError> {
        self.session()?;
        let amount = parse_amount(input, TransactionKind::Withdrawal)?;

        let (tx, rx) = mpsc::channel();
        self.confirmed = Some(rx);

        let selector = DenominationSelector::open(
            amount,
            self.config.denominations.clone(),
            move |selection| {
                // The receiver only goes away if the teller was reset mid-withdrawal
                let _ = tx.send(selection);
            },
        )
        .with_currency(self.config.currency_symbol.as_str());

        Ok(&*self.selector.open(selector))
    }

    /// The selector awaiting input, if a withdrawal is in progress
    pub fn selector(&self) -> Option<&DenominationSelector> {
        self.selector.current()
    }

    pub fn set_count(&mut self, denomination: u32, input: &str) -> Result<Decimal, TellerError> {
        let selector = self
            .selector
            .current_mut()
            .ok_or(TellerError::NoWithdrawalInProgress)?;

        Ok(selector.set_count(denomination, input)?)
    }

    pub fn selected_total(&self) -> Option<Decimal> {
        self.selector.current().map(|s| s.total())
    }

    /// Confirm the open selector and send the withdrawal to the backend.
    ///
    /// If the selected notes don't add up to the amount the selector stays open and
    /// `TellerError::Selector` is returned so the customer can correct it.
    pub fn confirm_withdrawal(&mut self) -> Result<Receipt, TellerError> {
        let session = self.session()?;

        let selector = self
            .selector
            .current_mut()
            .ok_or(TellerError::NoWithdrawalInProgress)?;
        let amount = selector.amount();
        selector.confirm()?;

        let selection = self
            .confirmed
            .take()
            .and_then(|rx| rx.try_recv().ok())
            .ok_or(TellerError::NoWithdrawalInProgress)?;
        self.selector.clear();

        self.send_withdrawal(&session, amount, selection)
    }

    pub fn cancel_withdrawal(&mut self) -> Result<(), TellerError> {
        let selector = self
            .selector
            .current_mut()
            .ok_or(TellerError::NoWithdrawalInProgress)?;
        selector.cancel()?;

        self.selector.clear();
        self.confirmed = None;

        Ok(())
    }

    /// Withdraw without the selector, letting the largest notes cover the amount
    pub fn fast_cash(&mut self, input: &str) -> Result<Receipt, TellerError> {
        let session = self.session()?;
        let amount = parse_amount(input, TransactionKind::Withdrawal)?;

        let selection = self
            .config
            .denominations
            .greedy(amount)
            .ok_or_else(|| TellerError::NoBreakdown {
                amount,
                currency: self.config.currency_symbol.clone(),
            })?;
        self.config.denominations.validate(&selection, amount)?;

        self.send_withdrawal(&session, amount, selection)
    }

    pub fn statement_url(&self) -> Result<String, TellerError> {
        let session = self.session.as_ref().ok_or(TellerError::NotLoggedIn)?;
        Ok(self.backend.statement_url(session))
    }

    /// The most recent history lines from the last known account state, oldest first
    pub fn mini_statement(&self) -> Result<&[String], TellerError> {
        let account = self.account.as_ref().ok_or(TellerError::NotLoggedIn)?;
        let txns = &account.transactions;
        let start = txns.len().saturating_sub(self.config.statement_rows);

        Ok(&txns[start..])
    }

    fn send_withdrawal(
        &mut self,
        session: &Session,
        amount: Amount,
        selection: Selection,
    ) -> Result<Receipt, TellerError> {
        let request = WithdrawalRequest::new(session, amount, selection);

        let account = self.backend.withdraw(session, &request).map_err(|e| {
            error!("withdrawal of {} refused: {}", amount, e);
            TellerError::WithdrawalRefused(e)
        })?;
        let receipt = Receipt::new(
            TransactionKind::Withdrawal,
            amount,
            Some(request.denominations),
            account.balance,
            &self.config.currency_symbol,
        );
        debug!("{}", receipt.line());
        self.account = Some(account);

        Ok(receipt)
    }

    fn session(&self) -> Result<Session, TellerError> {
        self.session.clone().ok_or(TellerError::NotLoggedIn)
    }
}

fn parse_amount(input: &str, kind: TransactionKind) -> Result<Amount, TellerError> {
    Amount::parse(input).map_err(|source| TellerError::InvalidAmount { kind, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    // Behaves like the ATM service: integer withdrawals only, no overdrafts, and a
    // history line per transaction.
    #[derive(Default)]
    struct MemoryBackend {
        accounts: HashMap<String, Account>,
        withdrawals: Vec<WithdrawalRequest>,
        balance_offline: bool,
    }

    impl MemoryBackend {
        fn with_account(pin: &str, username: &str, balance: Decimal) -> Self {
            let mut backend = MemoryBackend::default();
            backend.accounts.insert(
                pin.into(),
                Account {
                    username: username.into(),
                    balance,
                    transactions: Vec::new(),
                },
            );
            backend
        }

        fn account(&mut self, session: &Session) -> Result<&mut Account, BackendError> {
            self.accounts
                .get_mut(session.pin())
                .ok_or(BackendError::UserNotFound)
        }
    }

    impl Backend for MemoryBackend {
        fn login(&mut self, session: &Session) -> Result<Account, BackendError> {
            Ok(self.account(session)?.clone())
        }

        fn balance(&mut self, session: &Session) -> Result<Decimal, BackendError> {
            if self.balance_offline {
                return Err(BackendError::Transport("connection refused".into()));
            }
            Ok(self.account(session)?.balance)
        }

        fn deposit(&mut self, session: &Session, amount: Amount) -> Result<Account, BackendError> {
            let account = self.account(session)?;
            account.balance += *amount;
            account.transactions.push(format!("Deposit ₹{}", amount));
            Ok(account.clone())
        }

        fn withdraw(
            &mut self,
            session: &Session,
            request: &WithdrawalRequest,
        ) -> Result<Account, BackendError> {
            self.withdrawals.push(request.clone());

            let account = self.account(session)?;
            if request.amount > account.balance || request.denominations.total() != request.amount {
                return Err(BackendError::Rejected(
                    "Invalid denomination or insufficient balance".into(),
                ));
            }

            account.balance -= request.amount;
            account.transactions.push(format!(
                "Withdraw ₹{} {}",
                request.amount, request.denominations
            ));
            Ok(account.clone())
        }

        fn statement_url(&self, session: &Session) -> String {
            format!("http://localhost:8080/api/atm/statement/pdf?pin={}", session.pin())
        }
    }

    fn teller(balance: Decimal) -> Teller<MemoryBackend> {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut teller = Teller::new(
            MemoryBackend::with_account("1234", "asha", balance),
            TellerConfig::default(),
        );
        teller.login("1234").unwrap();
        teller
    }

    #[test]
    fn login_blank_pin() {
        let mut teller = Teller::new(MemoryBackend::default(), TellerConfig::default());
        assert_eq!(
            teller.login(" "),
            Err(TellerError::Session(SessionError::EmptyPin))
        );
        assert!(!teller.is_logged_in());
    }

    #[test]
    fn login_unknown_user() {
        let mut teller = Teller::new(MemoryBackend::default(), TellerConfig::default());
        let err = teller.login("0000").unwrap_err();

        assert_eq!(err, TellerError::LoginFailed(BackendError::UserNotFound));
        assert_eq!(err.to_string(), "User does not exist");
        assert!(!teller.is_logged_in());
    }

    #[test]
    fn login_welcome_and_balance() {
        let mut teller = Teller::new(
            MemoryBackend::with_account("1234", "asha", dec!(1000)),
            TellerConfig::default(),
        );

        assert_eq!(teller.login("1234").unwrap(), "Welcome, asha");
        assert_eq!(teller.balance_line().unwrap(), "Balance: ₹1000");
    }

    #[test]
    fn actions_require_login() {
        let mut teller = Teller::new(MemoryBackend::default(), TellerConfig::default());

        assert_eq!(teller.deposit("100"), Err(TellerError::NotLoggedIn));
        assert_eq!(teller.refresh_balance(), Err(TellerError::NotLoggedIn));
        assert_eq!(teller.statement_url(), Err(TellerError::NotLoggedIn));
        assert!(matches!(
            teller.begin_withdrawal("100"),
            Err(TellerError::NotLoggedIn)
        ));
    }

    #[test]
    fn deposit_updates_balance() {
        let mut teller = teller(dec!(1000));
        let receipt = teller.deposit("250").unwrap();

        assert_eq!(receipt.balance, dec!(1250));
        assert_eq!(receipt.line(), "Deposit ₹250");
        assert_eq!(teller.balance_line().unwrap(), "Balance: ₹1250");
    }

    #[test]
    fn deposit_invalid_amount() {
        let mut teller = teller(dec!(1000));
        let err = teller.deposit("").unwrap_err();

        assert_eq!(err.to_string(), "Please enter a valid deposit amount");
        assert_eq!(teller.account().unwrap().balance, dec!(1000));
    }

    #[test]
    fn withdrawal_through_selector() {
        let mut teller = teller(dec!(1000));

        let selector = teller.begin_withdrawal("130").unwrap();
        assert_eq!(selector.title(), "Select denominations for ₹130");

        teller.set_count(100, "1").unwrap();
        assert_eq!(teller.set_count(20, "1").unwrap(), dec!(120));
        let err = teller.confirm_withdrawal().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Selected total must equal the requested amount (₹130)"
        );
        assert!(teller.selector().is_some());
        assert!(teller.backend().withdrawals.is_empty());

        teller.set_count(100, "").unwrap();
        teller.set_count(50, "1").unwrap();
        teller.set_count(20, "4").unwrap();
        assert_eq!(teller.selected_total(), Some(dec!(130)));

        let receipt = teller.confirm_withdrawal().unwrap();
        assert_eq!(receipt.line(), "Withdraw ₹130 [1x50, 4x20]");
        assert_eq!(receipt.balance, dec!(870));
        assert!(teller.selector().is_none());

        let sent = &teller.backend().withdrawals;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].pin, "1234");
        assert_eq!(sent[0].denominations.memo(), "1x50, 4x20");
    }

    #[test]
    fn withdrawal_invalid_amount() {
        let mut teller = teller(dec!(1000));
        let err = teller.begin_withdrawal("-5").unwrap_err();

        assert_eq!(err.to_string(), "Please enter a valid withdrawal amount");
        assert!(teller.selector().is_none());
    }

    #[test]
    fn cancel_withdrawal_sends_nothing() {
        let mut teller = teller(dec!(1000));

        teller.begin_withdrawal("500").unwrap();
        teller.set_count(500, "1").unwrap();
        teller.cancel_withdrawal().unwrap();

        assert!(teller.selector().is_none());
        assert_eq!(
            teller.confirm_withdrawal(),
            Err(TellerError::NoWithdrawalInProgress)
        );
        assert!(teller.backend().withdrawals.is_empty());
        assert_eq!(teller.account().unwrap().balance, dec!(1000));
    }

    #[test]
    fn new_withdrawal_replaces_open_one() {
        let mut teller = teller(dec!(1000));

        teller.begin_withdrawal("500").unwrap();
        teller.set_count(500, "1").unwrap();
        teller.begin_withdrawal("200").unwrap();
        assert_eq!(teller.selected_total(), Some(Decimal::ZERO));

        teller.set_count(200, "1").unwrap();
        let receipt = teller.confirm_withdrawal().unwrap();

        assert_eq!(receipt.line(), "Withdraw ₹200 [1x200]");
        assert_eq!(teller.backend().withdrawals.len(), 1);
    }

    #[test]
    fn withdrawal_refused_by_backend() {
        let mut teller = teller(dec!(100));

        teller.begin_withdrawal("500").unwrap();
        teller.set_count(500, "1").unwrap();
        let err = teller.confirm_withdrawal().unwrap_err();

        assert_eq!(err.to_string(), "Invalid amount / insufficient balance");
        assert_eq!(teller.account().unwrap().balance, dec!(100));
        assert!(teller.selector().is_none());
    }

    #[test]
    fn fast_cash_uses_largest_notes() {
        let mut teller = teller(dec!(2000));
        let receipt = teller.fast_cash("780").unwrap();

        assert_eq!(receipt.line(), "Withdraw ₹780 [1x500, 1x200, 1x50, 1x20, 1x10]");
        assert_eq!(receipt.balance, dec!(1220));
    }

    #[test]
    fn fast_cash_without_breakdown() {
        let mut teller = teller(dec!(2000));

        let err = teller.fast_cash("125").unwrap_err();
        assert_eq!(
            err.to_string(),
            "₹125 cannot be dispensed with the available notes"
        );
        assert!(teller.backend().withdrawals.is_empty());
    }

    #[test]
    fn refresh_balance_and_statement() {
        let mut teller = teller(dec!(1000));
        teller.deposit("10").unwrap();

        assert_eq!(teller.refresh_balance().unwrap(), dec!(1010));
        assert_eq!(
            teller.statement_url().unwrap(),
            "http://localhost:8080/api/atm/statement/pdf?pin=1234"
        );
    }

    #[test]
    fn refresh_balance_unavailable() {
        let mut backend = MemoryBackend::with_account("1234", "asha", dec!(1000));
        backend.balance_offline = true;
        let mut teller = Teller::new(backend, TellerConfig::default());
        teller.login("1234").unwrap();

        let err = teller.refresh_balance().unwrap_err();
        assert_eq!(
            err,
            TellerError::BalanceUnavailable(BackendError::Transport("connection refused".into()))
        );
        assert_eq!(err.to_string(), "Unable to fetch balance");
        assert_eq!(teller.balance_line().unwrap(), "Balance: ₹1000");
    }

    #[test]
    fn currency_symbol_from_config() {
        let config = TellerConfig {
            currency_symbol: "Rs ".into(),
            ..TellerConfig::default()
        };
        let mut teller = Teller::new(
            MemoryBackend::with_account("1234", "asha", dec!(1000)),
            config,
        );
        teller.login("1234").unwrap();
        assert_eq!(teller.balance_line().unwrap(), "Balance: Rs 1000");

        let selector = teller.begin_withdrawal("130").unwrap();
        assert_eq!(selector.title(), "Select denominations for Rs 130");
        assert_eq!(
            teller.confirm_withdrawal().unwrap_err().to_string(),
            "Selected total must equal the requested amount (Rs 130)"
        );

        teller.set_count(100, "1").unwrap();
        teller.set_count(10, "3").unwrap();
        let receipt = teller.confirm_withdrawal().unwrap();
        assert_eq!(receipt.line(), "Withdraw Rs 130 [1x100, 3x10]");
        assert_eq!(teller.deposit("5").unwrap().line(), "Deposit Rs 5");

        assert_eq!(
            teller.fast_cash("15").unwrap_err().to_string(),
            "Rs 15 cannot be dispensed with the available notes"
        );
    }

    #[test]
    fn mini_statement_shows_recent_rows() {
        let mut teller = teller(dec!(1000));
        for i in 1..=7 {
            teller.deposit(&i.to_string()).unwrap();
        }

        let rows = teller.mini_statement().unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0], "Deposit ₹3");
        assert_eq!(rows[4], "Deposit ₹7");
    }

    #[test]
    fn logout_clears_state() {
        let mut teller = teller(dec!(1000));
        teller.begin_withdrawal("100").unwrap();
        teller.logout();

        assert!(!teller.is_logged_in());
        assert!(teller.selector().is_none());
        assert_eq!(teller.balance_line(), None);
        assert_eq!(teller.deposit("100"), Err(TellerError::NotLoggedIn));
    }

    #[test]
    fn withdrawal_request_json() {
        let session = Session::new("1234").unwrap();
        let mut notes = Selection::default();
        notes.set(50, 1).set(20, 4);
        let request = WithdrawalRequest::new(&session, Amount::parse("130").unwrap(), notes);

        let json: serde_json::Value = serde_json::from_str(&request.to_json().unwrap()).unwrap();
        assert_eq!(json["pin"], "1234");
        assert_eq!(json["amount"], 130.0);
        assert_eq!(json["denominations"], serde_json::json!({"50": 1, "20": 4}));
    }
}
