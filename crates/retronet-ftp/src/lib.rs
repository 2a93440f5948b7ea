//! FTP listing support: the RFC 3659 MLST/MLSD fact-list parser
//! producing typed listing entries.

pub mod mlsx;

pub use mlsx::{Access, EntryKind, MlsxEntry, MlsxError, Permission, parse_mlsx_line};
