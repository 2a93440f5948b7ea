//! NTPv3 (RFC 1305) client-side timing: the 64-bit fixed-point
//! timestamp format, the 48-byte message codec, and the round-trip
//! delay / clock offset computation over the four message timestamps.

pub mod client;
pub mod error;
pub mod message;
pub mod time_info;
pub mod timestamp;

pub use client::NtpClient;
pub use error::{NtpError, Result};
pub use message::{Mode, NtpMessage, NTP_PACKET_SIZE, NTP_PORT};
pub use time_info::TimeInfo;
pub use timestamp::NtpTimestamp;
