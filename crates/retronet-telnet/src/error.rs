use retronet_core::{ErrorKind, Kinded};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelnetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection is closed")]
    Closed,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Kinded for TelnetError {
    fn kind(&self) -> ErrorKind {
        match self {
            TelnetError::Io(_) => ErrorKind::Io,
            TelnetError::Closed => ErrorKind::Closed,
            TelnetError::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }
}

pub type Result<T> = std::result::Result<T, TelnetError>;
