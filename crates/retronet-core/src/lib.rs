//! Shared pieces of the retronet protocol family: the error-kind
//! taxonomy every protocol crate classifies into, and the
//! NUL-terminated wire-string helpers used by the datagram codecs.

pub mod error;
pub mod wire;

pub use error::{ErrorKind, Kinded};
pub use wire::{get_cstring, put_cstring};
