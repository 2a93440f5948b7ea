//! RFC 1350 TFTP: packet codec, netascii translation, a lockstep
//! client, and a concurrent server.
//!
//! Transfers are strictly lockstep: one DATA packet of at most 512
//! bytes per acknowledged block, block numbers wrapping modulo 65536,
//! end of transfer signalled by a short final block. Each endpoint
//! picks a fresh UDP port (its TID) per transfer; the well-known port
//! only ever sees the initial request.

pub mod client;
pub mod config;
pub mod error;
pub mod netascii;
pub mod packet;
pub mod server;

pub use client::TftpClient;
pub use config::{LogFormat, LoggingConfig, ServerMode, TftpConfig};
pub use error::{Result, TftpError};
pub use packet::{BLOCK_SIZE, ErrorCode, MAX_PACKET_SIZE, Mode, TFTP_PORT, TftpPacket};
pub use server::TftpServer;

/// Per-packet receive timeout applied by both sides of a transfer.
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Consecutive receive timeouts tolerated before a transfer aborts.
pub const DEFAULT_MAX_TIMEOUTS: u32 = 5;
