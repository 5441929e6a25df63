use thiserror::Error;

use crate::coordinator::RegisterValue;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Gateway(#[from] systemair_save::Error),

    #[error("Value must be a boolean")]
    InvalidBooleanValue,

    #[error("Value must be a finite number, got {0:?}")]
    InvalidNumericValue(RegisterValue),

    #[error("Unknown register {0:?}")]
    UnknownRegister(String),

    #[error("Register {0:?} is read-only")]
    ReadOnlyRegister(String),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    JSONError(#[from] serde_json::Error),

    #[error("{0}")]
    Other(std::borrow::Cow<'static, str>),
}

impl Error {
    /// Failures to reach the unit which are expected to go away on their own.
    pub fn is_communication(&self) -> bool {
        matches!(self, Error::Gateway(e) if e.is_communication())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Self::Other(s.into())
    }
}
impl From<&'static str> for Error {
    fn from(s: &'static str) -> Self {
        Self::Other(s.into())
    }
}
