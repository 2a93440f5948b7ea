use retronet_core::wire::WireError;
use retronet_core::{ErrorKind, Kinded};
use thiserror::Error;

use crate::packet::ErrorCode;

#[derive(Error, Debug)]
pub enum TftpError {
    #[error("malformed TFTP packet: {0}")]
    Protocol(String),

    #[error("peer error {code:?}: {message}")]
    Peer { code: ErrorCode, message: String },

    #[error("transfer timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("access violation: {0}")]
    Policy(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("server is closed")]
    Closed,
}

impl Kinded for TftpError {
    fn kind(&self) -> ErrorKind {
        match self {
            TftpError::Protocol(_) => ErrorKind::Protocol,
            TftpError::Peer { .. } => ErrorKind::Peer,
            TftpError::Timeout { .. } => ErrorKind::Timeout,
            TftpError::Io(_) => ErrorKind::Io,
            TftpError::Policy(_) => ErrorKind::Policy,
            TftpError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            TftpError::Closed => ErrorKind::Closed,
        }
    }
}

impl From<WireError> for TftpError {
    fn from(err: WireError) -> Self {
        TftpError::Protocol(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TftpError>;
