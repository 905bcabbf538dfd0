use std::fmt;
use thiserror::Error;

/// The credential for an authenticated customer.
///
/// Every backend call takes the session explicitly; there is no ambient "current PIN".
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pin: String,
}

#[derive(Error, Debug, Eq, PartialEq)]
pub enum SessionError {
    #[error("Please enter PIN")]
    EmptyPin,
}

impl Session {
    pub fn new<S: Into<String>>(pin: S) -> Result<Self, SessionError> {
        let pin = pin.into();
        if pin.trim().is_empty() {
            return Err(SessionError::EmptyPin);
        }

        Ok(Session { pin })
    }

    pub fn pin(&self) -> &str {
        &self.pin
    }
}

// Keep the PIN out of logs and panic messages
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("pin", &"****").finish()
    }
}
