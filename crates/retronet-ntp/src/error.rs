use retronet_core::{ErrorKind, Kinded};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NtpError {
    #[error("malformed NTP datagram: {0}")]
    Protocol(String),

    #[error("no response from server within {0:?}")]
    Timeout(std::time::Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Kinded for NtpError {
    fn kind(&self) -> ErrorKind {
        match self {
            NtpError::Protocol(_) => ErrorKind::Protocol,
            NtpError::Timeout(_) => ErrorKind::Timeout,
            NtpError::Io(_) => ErrorKind::Io,
        }
    }
}

pub type Result<T> = std::result::Result<T, NtpError>;
