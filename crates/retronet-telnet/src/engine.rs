//! The Telnet byte state machine and RFC 1143 Q-method negotiation.
//!
//! [`TelnetEngine::process`] consumes raw transport bytes and splits
//! them into data for the caller and replies for the wire. It owns no
//! I/O, which is what lets the threaded and inline readers share it.

use tracing::debug;

use crate::command::{DO, DONT, IAC, SB, SE, WILL, WONT};
use crate::option::{TelnetOptionHandler, codes};

/// Subnegotiation buffer cap; bytes past it are dropped without
/// aborting the sequence.
pub const SUBNEGOTIATION_MAX: usize = 512;

/// RFC 1143 per-side option state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiationState {
    #[default]
    No,
    Yes,
    WantNo,
    WantYes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Data,
    Cr,
    Iac,
    Will,
    Wont,
    Do,
    Dont,
    Sb,
    IacSb,
}

#[derive(Default)]
struct OptionEntry {
    local: NegotiationState,
    remote: NegotiationState,
    /// RFC 1143 queue bits: a request in the opposite direction is
    /// parked while the current negotiation settles.
    local_queue: bool,
    remote_queue: bool,
    handler: Option<Box<dyn TelnetOptionHandler>>,
}

pub struct TelnetEngine {
    state: State,
    options: Vec<OptionEntry>,
    subnegotiation: Vec<u8>,
    command_callback: Option<Box<dyn FnMut(u8) + Send>>,
}

impl Default for TelnetEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TelnetEngine {
    pub fn new() -> Self {
        Self {
            state: State::Data,
            options: (0..=255).map(|_| OptionEntry::default()).collect(),
            subnegotiation: Vec::with_capacity(SUBNEGOTIATION_MAX),
            command_callback: None,
        }
    }

    /// Register the handler for its option code, replacing any
    /// previous one.
    pub fn register_handler(&mut self, handler: Box<dyn TelnetOptionHandler>) {
        let code = handler.option_code();
        self.options[code as usize].handler = Some(handler);
    }

    /// Callback invoked for IAC commands that are neither negotiation
    /// nor subnegotiation (AYT, NOP, ...).
    pub fn set_command_callback(&mut self, callback: Box<dyn FnMut(u8) + Send>) {
        self.command_callback = Some(callback);
    }

    /// Open negotiation for every handler that asked for it, appending
    /// the initial WILL/DO volley to `replies`.
    pub fn begin_negotiation(&mut self, replies: &mut Vec<u8>) {
        for code in 0..=255u8 {
            let (init_local, init_remote) = match &self.options[code as usize].handler {
                Some(h) => (h.init_local(), h.init_remote()),
                None => continue,
            };
            if init_local {
                self.request_local_enable(code, replies);
            }
            if init_remote {
                self.request_remote_enable(code, replies);
            }
        }
    }

    pub fn local_state(&self, option: u8) -> NegotiationState {
        self.options[option as usize].local
    }

    pub fn remote_state(&self, option: u8) -> NegotiationState {
        self.options[option as usize].remote
    }

    /// Run `input` through the state machine. Data bytes land in
    /// `data` in wire order with escapes resolved; anything the engine
    /// wants to say back lands in `replies`.
    pub fn process(&mut self, input: &[u8], data: &mut Vec<u8>, replies: &mut Vec<u8>) {
        for &byte in input {
            match self.state {
                State::Data => self.handle_data_byte(byte, data),
                State::Cr => {
                    self.state = State::Data;
                    if byte != 0 {
                        // Anything but the CR NUL filler is processed
                        // as if it arrived in the data state.
                        self.handle_data_byte(byte, data);
                    }
                }
                State::Iac => match byte {
                    WILL => self.state = State::Will,
                    WONT => self.state = State::Wont,
                    DO => self.state = State::Do,
                    DONT => self.state = State::Dont,
                    SB => {
                        self.subnegotiation.clear();
                        self.state = State::Sb;
                    }
                    SE => self.state = State::Data, // stray SE
                    IAC => {
                        data.push(IAC);
                        self.state = State::Data;
                    }
                    command => {
                        if let Some(callback) = &mut self.command_callback {
                            callback(command);
                        }
                        self.state = State::Data;
                    }
                },
                State::Will => {
                    self.state = State::Data;
                    self.receive_will(byte, replies);
                }
                State::Wont => {
                    self.state = State::Data;
                    self.receive_wont(byte, replies);
                }
                State::Do => {
                    self.state = State::Data;
                    self.receive_do(byte, replies);
                }
                State::Dont => {
                    self.state = State::Data;
                    self.receive_dont(byte, replies);
                }
                State::Sb => {
                    if byte == IAC {
                        self.state = State::IacSb;
                    } else if self.subnegotiation.len() < SUBNEGOTIATION_MAX {
                        self.subnegotiation.push(byte);
                    }
                }
                State::IacSb => match byte {
                    SE => {
                        self.state = State::Data;
                        self.deliver_subnegotiation(replies);
                    }
                    IAC => {
                        // Doubled IAC inside the subnegotiation.
                        if self.subnegotiation.len() < SUBNEGOTIATION_MAX {
                            self.subnegotiation.push(IAC);
                        }
                        self.state = State::Sb;
                    }
                    _ => {
                        // Malformed; stay in the subnegotiation.
                        self.state = State::Sb;
                    }
                },
            }
        }
    }

    /// Encode caller data for the wire: IAC doubled, and unless BINARY
    /// is on locally, LF expanded to CR LF and bare CR to CR NUL.
    pub fn encode_output(&self, input: &[u8], out: &mut Vec<u8>) {
        let binary = self.options[codes::BINARY as usize].local == NegotiationState::Yes;
        for &byte in input {
            match byte {
                IAC => out.extend_from_slice(&[IAC, IAC]),
                b'\n' if !binary => out.extend_from_slice(b"\r\n"),
                b'\r' if !binary => out.extend_from_slice(b"\r\0"),
                b => out.push(b),
            }
        }
    }

    fn handle_data_byte(&mut self, byte: u8, data: &mut Vec<u8>) {
        if byte == IAC {
            self.state = State::Iac;
        } else if byte == b'\r' && !self.remote_binary() {
            // Outside binary mode CR may be followed by a NUL filler
            // that must not reach the caller.
            data.push(b'\r');
            self.state = State::Cr;
        } else {
            data.push(byte);
            self.state = State::Data;
        }
    }

    fn remote_binary(&self) -> bool {
        self.options[codes::BINARY as usize].remote == NegotiationState::Yes
    }

    fn deliver_subnegotiation(&mut self, replies: &mut Vec<u8>) {
        let buffer = std::mem::take(&mut self.subnegotiation);
        let Some(&option) = buffer.first() else {
            return; // IAC SB IAC SE carries nothing
        };
        if let Some(handler) = self.options[option as usize].handler.as_mut()
            && let Some(payload) = handler.answer_subnegotiation(&buffer)
        {
            encode_subnegotiation(&payload, replies);
        }
        self.subnegotiation = buffer;
        self.subnegotiation.clear();
    }

    fn accepts_local(&self, option: u8) -> bool {
        self.options[option as usize]
            .handler
            .as_ref()
            .is_some_and(|h| h.accept_local())
    }

    fn accepts_remote(&self, option: u8) -> bool {
        self.options[option as usize]
            .handler
            .as_ref()
            .is_some_and(|h| h.accept_remote())
    }

    /// Ask the peer to enable `option` on its side (DO).
    pub fn request_remote_enable(&mut self, option: u8, replies: &mut Vec<u8>) {
        let entry = &mut self.options[option as usize];
        match entry.remote {
            NegotiationState::No => {
                entry.remote = NegotiationState::WantYes;
                send_negotiation(replies, DO, option);
            }
            NegotiationState::Yes => {}
            NegotiationState::WantNo => entry.remote_queue = true,
            NegotiationState::WantYes => entry.remote_queue = false,
        }
    }

    /// Ask the peer for permission to enable `option` locally (WILL).
    pub fn request_local_enable(&mut self, option: u8, replies: &mut Vec<u8>) {
        let entry = &mut self.options[option as usize];
        match entry.local {
            NegotiationState::No => {
                entry.local = NegotiationState::WantYes;
                send_negotiation(replies, WILL, option);
            }
            NegotiationState::Yes => {}
            NegotiationState::WantNo => entry.local_queue = true,
            NegotiationState::WantYes => entry.local_queue = false,
        }
    }

    // RFC 1143 §7. A steady-state confirmation is never answered,
    // which is what makes negotiation loops impossible.

    fn receive_will(&mut self, option: u8, replies: &mut Vec<u8>) {
        let accept = self.accepts_remote(option);
        let entry = &mut self.options[option as usize];
        match entry.remote {
            NegotiationState::No => {
                if accept {
                    entry.remote = NegotiationState::Yes;
                    send_negotiation(replies, DO, option);
                } else {
                    send_negotiation(replies, DONT, option);
                }
            }
            NegotiationState::Yes => {}
            NegotiationState::WantNo => {
                debug!(option, "DONT answered by WILL");
                if entry.remote_queue {
                    entry.remote = NegotiationState::Yes;
                    entry.remote_queue = false;
                } else {
                    entry.remote = NegotiationState::No;
                }
            }
            NegotiationState::WantYes => {
                if entry.remote_queue {
                    entry.remote = NegotiationState::WantNo;
                    entry.remote_queue = false;
                    send_negotiation(replies, DONT, option);
                } else {
                    entry.remote = NegotiationState::Yes;
                }
            }
        }
    }

    fn receive_wont(&mut self, option: u8, replies: &mut Vec<u8>) {
        let entry = &mut self.options[option as usize];
        match entry.remote {
            NegotiationState::No => {}
            NegotiationState::Yes => {
                entry.remote = NegotiationState::No;
                send_negotiation(replies, DONT, option);
            }
            NegotiationState::WantNo => {
                if entry.remote_queue {
                    entry.remote = NegotiationState::WantYes;
                    entry.remote_queue = false;
                    send_negotiation(replies, DO, option);
                } else {
                    entry.remote = NegotiationState::No;
                }
            }
            NegotiationState::WantYes => {
                if entry.remote_queue {
                    entry.remote_queue = false;
                }
                entry.remote = NegotiationState::No;
            }
        }
    }

    fn receive_do(&mut self, option: u8, replies: &mut Vec<u8>) {
        let accept = self.accepts_local(option);
        let mut enabled = false;
        {
            let entry = &mut self.options[option as usize];
            match entry.local {
                NegotiationState::No => {
                    if accept {
                        entry.local = NegotiationState::Yes;
                        send_negotiation(replies, WILL, option);
                        enabled = true;
                    } else {
                        send_negotiation(replies, WONT, option);
                    }
                }
                NegotiationState::Yes => {}
                NegotiationState::WantNo => {
                    debug!(option, "WONT answered by DO");
                    if entry.local_queue {
                        entry.local = NegotiationState::Yes;
                        entry.local_queue = false;
                        enabled = true;
                    } else {
                        entry.local = NegotiationState::No;
                    }
                }
                NegotiationState::WantYes => {
                    if entry.local_queue {
                        entry.local = NegotiationState::WantNo;
                        entry.local_queue = false;
                        send_negotiation(replies, WONT, option);
                    } else {
                        entry.local = NegotiationState::Yes;
                        enabled = true;
                    }
                }
            }
        }
        if enabled {
            self.start_local_subnegotiation(option, replies);
        }
    }

    fn receive_dont(&mut self, option: u8, replies: &mut Vec<u8>) {
        let entry = &mut self.options[option as usize];
        match entry.local {
            NegotiationState::No => {}
            NegotiationState::Yes => {
                entry.local = NegotiationState::No;
                send_negotiation(replies, WONT, option);
            }
            NegotiationState::WantNo => {
                if entry.local_queue {
                    entry.local = NegotiationState::WantYes;
                    entry.local_queue = false;
                    send_negotiation(replies, WILL, option);
                } else {
                    entry.local = NegotiationState::No;
                }
            }
            NegotiationState::WantYes => {
                if entry.local_queue {
                    entry.local_queue = false;
                }
                entry.local = NegotiationState::No;
            }
        }
    }

    fn start_local_subnegotiation(&mut self, option: u8, replies: &mut Vec<u8>) {
        if let Some(handler) = self.options[option as usize].handler.as_mut()
            && let Some(payload) = handler.start_subnegotiation_local()
        {
            encode_subnegotiation(&payload, replies);
        }
    }
}

/// Frame `payload` as `IAC SB ... IAC SE` with interior IACs doubled.
pub fn encode_subnegotiation(payload: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&[IAC, SB]);
    for &byte in payload {
        if byte == IAC {
            out.extend_from_slice(&[IAC, IAC]);
        } else {
            out.push(byte);
        }
    }
    out.extend_from_slice(&[IAC, SE]);
}

fn send_negotiation(out: &mut Vec<u8>, verb: u8, option: u8) {
    out.extend_from_slice(&[IAC, verb, option]);
}
