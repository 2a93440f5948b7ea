//! RFC 854 Telnet: the inline byte-stream state machine that separates
//! data from IAC command sequences, RFC 1143 Q-method option
//! negotiation with pluggable per-option handlers, and a client that
//! couples a blocking transport to the caller either through a
//! dedicated reader thread and a bounded ring buffer or by driving the
//! state machine inline.

pub mod client;
pub mod command;
pub mod engine;
pub mod error;
pub mod option;
pub mod ring;

pub use client::TelnetClient;
pub use engine::{NegotiationState, SUBNEGOTIATION_MAX, TelnetEngine};
pub use error::{Result, TelnetError};
pub use option::{
    EchoHandler, SimpleOptionHandler, SuppressGoAheadHandler, TelnetOptionHandler,
    TerminalTypeHandler,
};
pub use ring::RingBuffer;
