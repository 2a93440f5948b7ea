//! Telnet option codes and the per-option handler contract.

/// IANA option codes this crate has built-in or commonly-seen support
/// for.
pub mod codes {
    /// Binary transmission (RFC 856); disables CR NUL processing.
    pub const BINARY: u8 = 0;
    /// Echo (RFC 857).
    pub const ECHO: u8 = 1;
    /// Suppress go ahead (RFC 858).
    pub const SUPPRESS_GO_AHEAD: u8 = 3;
    /// Status (RFC 859).
    pub const STATUS: u8 = 5;
    /// Timing mark (RFC 860).
    pub const TIMING_MARK: u8 = 6;
    /// Terminal type (RFC 1091).
    pub const TERMINAL_TYPE: u8 = 24;
    /// Negotiate about window size (RFC 1073).
    pub const NAWS: u8 = 31;
}

/// Terminal-type subnegotiation commands (RFC 1091).
pub const TERMINAL_TYPE_IS: u8 = 0;
pub const TERMINAL_TYPE_SEND: u8 = 1;

/// Per-option behavior plugged into the negotiation engine.
///
/// The four predicates drive the Q-method: the `init` pair asks the
/// engine to open negotiation for the option when the connection
/// starts, the `accept` pair decides how to answer the peer's DO /
/// WILL. Subnegotiation buffers are delivered whole, option code
/// first; a returned payload (also option code first) is framed and
/// IAC-escaped by the engine.
pub trait TelnetOptionHandler: Send {
    /// Option code this handler owns.
    fn option_code(&self) -> u8;

    /// Ask the peer for permission to enable the option locally
    /// (send WILL) when negotiation starts.
    fn init_local(&self) -> bool {
        false
    }

    /// Ask the peer to enable the option on its side (send DO) when
    /// negotiation starts.
    fn init_remote(&self) -> bool {
        false
    }

    /// Whether a peer DO is accepted (we agree to enable locally).
    fn accept_local(&self) -> bool {
        false
    }

    /// Whether a peer WILL is accepted (we agree the peer enables).
    fn accept_remote(&self) -> bool {
        false
    }

    /// React to a subnegotiation from the peer. `data` starts with the
    /// option code. A `Some` return is sent back as a subnegotiation.
    fn answer_subnegotiation(&mut self, data: &[u8]) -> Option<Vec<u8>> {
        let _ = data;
        None
    }

    /// Subnegotiation to send once the option becomes enabled locally.
    fn start_subnegotiation_local(&mut self) -> Option<Vec<u8>> {
        None
    }
}

/// Generic handler for options that only need the four negotiation
/// predicates, e.g. BINARY.
pub struct SimpleOptionHandler {
    code: u8,
    init_local: bool,
    init_remote: bool,
    accept_local: bool,
    accept_remote: bool,
}

impl SimpleOptionHandler {
    pub fn new(
        code: u8,
        init_local: bool,
        init_remote: bool,
        accept_local: bool,
        accept_remote: bool,
    ) -> Self {
        Self {
            code,
            init_local,
            init_remote,
            accept_local,
            accept_remote,
        }
    }
}

impl TelnetOptionHandler for SimpleOptionHandler {
    fn option_code(&self) -> u8 {
        self.code
    }

    fn init_local(&self) -> bool {
        self.init_local
    }

    fn init_remote(&self) -> bool {
        self.init_remote
    }

    fn accept_local(&self) -> bool {
        self.accept_local
    }

    fn accept_remote(&self) -> bool {
        self.accept_remote
    }
}

/// Echo option (RFC 857). A typical client accepts the server's WILL
/// and never offers to echo itself.
pub struct EchoHandler {
    init_local: bool,
    init_remote: bool,
    accept_local: bool,
    accept_remote: bool,
}

impl EchoHandler {
    pub fn new(
        init_local: bool,
        init_remote: bool,
        accept_local: bool,
        accept_remote: bool,
    ) -> Self {
        Self {
            init_local,
            init_remote,
            accept_local,
            accept_remote,
        }
    }
}

impl Default for EchoHandler {
    fn default() -> Self {
        Self::new(false, false, false, true)
    }
}

impl TelnetOptionHandler for EchoHandler {
    fn option_code(&self) -> u8 {
        codes::ECHO
    }

    fn init_local(&self) -> bool {
        self.init_local
    }

    fn init_remote(&self) -> bool {
        self.init_remote
    }

    fn accept_local(&self) -> bool {
        self.accept_local
    }

    fn accept_remote(&self) -> bool {
        self.accept_remote
    }
}

/// Suppress go ahead (RFC 858); on by default in both directions for
/// anything resembling a modern connection.
pub struct SuppressGoAheadHandler {
    init_local: bool,
    init_remote: bool,
    accept_local: bool,
    accept_remote: bool,
}

impl SuppressGoAheadHandler {
    pub fn new(
        init_local: bool,
        init_remote: bool,
        accept_local: bool,
        accept_remote: bool,
    ) -> Self {
        Self {
            init_local,
            init_remote,
            accept_local,
            accept_remote,
        }
    }
}

impl Default for SuppressGoAheadHandler {
    fn default() -> Self {
        Self::new(true, true, true, true)
    }
}

impl TelnetOptionHandler for SuppressGoAheadHandler {
    fn option_code(&self) -> u8 {
        codes::SUPPRESS_GO_AHEAD
    }

    fn init_local(&self) -> bool {
        self.init_local
    }

    fn init_remote(&self) -> bool {
        self.init_remote
    }

    fn accept_local(&self) -> bool {
        self.accept_local
    }

    fn accept_remote(&self) -> bool {
        self.accept_remote
    }
}

/// Terminal type (RFC 1091): answers the server's SEND request with
/// `IS <name>`.
pub struct TerminalTypeHandler {
    terminal: String,
}

impl TerminalTypeHandler {
    pub fn new(terminal: impl Into<String>) -> Self {
        Self {
            terminal: terminal.into(),
        }
    }
}

impl TelnetOptionHandler for TerminalTypeHandler {
    fn option_code(&self) -> u8 {
        codes::TERMINAL_TYPE
    }

    fn accept_local(&self) -> bool {
        true
    }

    fn answer_subnegotiation(&mut self, data: &[u8]) -> Option<Vec<u8>> {
        if data.len() >= 2 && data[0] == codes::TERMINAL_TYPE && data[1] == TERMINAL_TYPE_SEND {
            let mut reply = vec![codes::TERMINAL_TYPE, TERMINAL_TYPE_IS];
            reply.extend_from_slice(self.terminal.as_bytes());
            Some(reply)
        } else {
            None
        }
    }
}
