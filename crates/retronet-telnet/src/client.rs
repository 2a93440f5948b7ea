//! Telnet client over a blocking transport, in one of two coupling
//! modes.
//!
//! * **Threaded**: a dedicated reader thread pulls transport bytes
//!   through the engine and parks data bytes in a bounded
//!   [`RingBuffer`]; the caller reads from the ring.
//! * **Inline**: no thread; each `read` drives the transport and the
//!   engine until at least one data byte is available.
//!
//! Negotiation replies and application writes go through one shared
//! writer mutex, so option answers never interleave mid-packet with
//! caller data. The engine has its own lock; whoever takes both takes
//! the engine lock first.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::debug;

use crate::command::IAC;
use crate::engine::{TelnetEngine, encode_subnegotiation};
use crate::error::{Result, TelnetError};
use crate::ring::RingBuffer;

pub struct TelnetClient<R: Read, W: Write> {
    engine: Arc<Mutex<TelnetEngine>>,
    writer: Arc<Mutex<W>>,
    reader: ReaderMode<R>,
    closed: bool,
}

enum ReaderMode<R> {
    Inline {
        transport: R,
        pending: VecDeque<u8>,
    },
    Threaded {
        ring: Arc<RingBuffer>,
        _handle: JoinHandle<()>,
    },
}

impl<R: Read, W: Write> TelnetClient<R, W> {
    /// Inline coupling: the caller's own `read` calls drive the state
    /// machine. Sends the initial negotiation volley before returning.
    pub fn inline(reader: R, writer: W, mut engine: TelnetEngine) -> Result<Self> {
        let writer = Arc::new(Mutex::new(writer));
        open_negotiation(&mut engine, &writer)?;

        Ok(Self {
            engine: Arc::new(Mutex::new(engine)),
            writer,
            reader: ReaderMode::Inline {
                transport: reader,
                pending: VecDeque::new(),
            },
            closed: false,
        })
    }

    /// Read decoded data bytes. Blocks until data is available; after
    /// [`TelnetClient::close`] the remaining buffered bytes drain and
    /// then reads return 0.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.reader {
            ReaderMode::Threaded { ring, .. } => ring.read(buf),
            ReaderMode::Inline { transport, pending } => {
                loop {
                    if !pending.is_empty() {
                        let n = buf.len().min(pending.len());
                        for slot in buf[..n].iter_mut() {
                            *slot = pending.pop_front().expect("pending not empty");
                        }
                        return Ok(n);
                    }
                    if self.closed {
                        return Ok(0);
                    }

                    // Drive the state machine until it produces data,
                    // hits EOF, or the transport would block.
                    let mut chunk = [0u8; 512];
                    let n = transport.read(&mut chunk)?;
                    if n == 0 {
                        return Ok(0);
                    }

                    let mut data = Vec::new();
                    let mut replies = Vec::new();
                    self.engine
                        .lock()
                        .unwrap()
                        .process(&chunk[..n], &mut data, &mut replies);
                    if !replies.is_empty() {
                        let mut writer = self.writer.lock().unwrap();
                        writer.write_all(&replies)?;
                        writer.flush()?;
                    }
                    pending.extend(data);
                }
            }
        }
    }

    /// Data bytes ready to read right now. Never performs I/O.
    pub fn available(&self) -> usize {
        match &self.reader {
            ReaderMode::Threaded { ring, .. } => ring.available(),
            ReaderMode::Inline { pending, .. } => pending.len(),
        }
    }

    /// Write application data, IAC-escaped and line-ending translated
    /// per the current BINARY state.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(TelnetError::Closed);
        }
        let mut encoded = Vec::with_capacity(data.len() + 8);
        self.engine.lock().unwrap().encode_output(data, &mut encoded);

        let mut writer = self.writer.lock().unwrap();
        writer.write_all(&encoded)?;
        writer.flush()?;
        Ok(())
    }

    /// Send a bare `IAC <command>` (AYT, NOP, ...).
    pub fn send_command(&mut self, command: u8) -> Result<()> {
        if self.closed {
            return Err(TelnetError::Closed);
        }
        let mut writer = self.writer.lock().unwrap();
        writer.write_all(&[IAC, command])?;
        writer.flush()?;
        Ok(())
    }

    /// Send a subnegotiation; `payload` starts with the option code.
    pub fn send_subnegotiation(&mut self, payload: &[u8]) -> Result<()> {
        if self.closed {
            return Err(TelnetError::Closed);
        }
        if payload.is_empty() {
            return Err(TelnetError::InvalidArgument(
                "empty subnegotiation".to_string(),
            ));
        }
        let mut encoded = Vec::with_capacity(payload.len() + 4);
        encode_subnegotiation(payload, &mut encoded);

        let mut writer = self.writer.lock().unwrap();
        writer.write_all(&encoded)?;
        writer.flush()?;
        Ok(())
    }

    /// Ask the peer to enable an option on its side (DO).
    pub fn request_remote_enable(&mut self, option: u8) -> Result<()> {
        self.negotiate(|engine, replies| engine.request_remote_enable(option, replies))
    }

    /// Offer to enable an option locally (WILL).
    pub fn request_local_enable(&mut self, option: u8) -> Result<()> {
        self.negotiate(|engine, replies| engine.request_local_enable(option, replies))
    }

    fn negotiate(&mut self, f: impl FnOnce(&mut TelnetEngine, &mut Vec<u8>)) -> Result<()> {
        if self.closed {
            return Err(TelnetError::Closed);
        }
        let mut replies = Vec::new();
        f(&mut self.engine.lock().unwrap(), &mut replies);
        if !replies.is_empty() {
            let mut writer = self.writer.lock().unwrap();
            writer.write_all(&replies)?;
            writer.flush()?;
        }
        Ok(())
    }

    /// Shut the client down. Idempotent; never blocks on the reader
    /// thread, and never holds the engine and writer locks at once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let ReaderMode::Threaded { ring, .. } = &self.reader {
            ring.close();
        }
        debug!("telnet client closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<R, W> TelnetClient<R, W>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    /// Threaded coupling: spawn the reader thread and return
    /// immediately. Sends the initial negotiation volley first so the
    /// thread never races it.
    pub fn threaded(reader: R, writer: W, mut engine: TelnetEngine) -> Result<Self> {
        let writer = Arc::new(Mutex::new(writer));
        open_negotiation(&mut engine, &writer)?;

        let engine = Arc::new(Mutex::new(engine));
        let ring = Arc::new(RingBuffer::new());
        let handle = {
            let engine = engine.clone();
            let writer = writer.clone();
            let ring = ring.clone();
            std::thread::Builder::new()
                .name("telnet-reader".to_string())
                .spawn(move || reader_loop(reader, engine, writer, ring))
                .map_err(TelnetError::Io)?
        };

        Ok(Self {
            engine,
            writer,
            reader: ReaderMode::Threaded {
                ring,
                _handle: handle,
            },
            closed: false,
        })
    }
}

fn open_negotiation<W: Write>(engine: &mut TelnetEngine, writer: &Arc<Mutex<W>>) -> Result<()> {
    let mut replies = Vec::new();
    engine.begin_negotiation(&mut replies);
    if !replies.is_empty() {
        let mut writer = writer.lock().unwrap();
        writer.write_all(&replies)?;
        writer.flush()?;
    }
    Ok(())
}

fn reader_loop<R: Read, W: Write>(
    mut transport: R,
    engine: Arc<Mutex<TelnetEngine>>,
    writer: Arc<Mutex<W>>,
    ring: Arc<RingBuffer>,
) {
    let mut chunk = [0u8; 1024];
    loop {
        if ring.is_closed() {
            break;
        }
        let n = match transport.read(&mut chunk) {
            Ok(0) => {
                ring.close();
                break;
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                ring.fail(e);
                break;
            }
        };

        let mut data = Vec::new();
        let mut replies = Vec::new();
        engine.lock().unwrap().process(&chunk[..n], &mut data, &mut replies);

        if !replies.is_empty() {
            let mut writer = writer.lock().unwrap();
            if let Err(e) = writer.write_all(&replies).and_then(|()| writer.flush()) {
                debug!(error = %e, "failed to send negotiation replies");
                ring.fail(e);
                break;
            }
        }

        if !data.is_empty() && ring.write(&data).is_err() {
            // Closed underneath us; drained bytes already delivered.
            break;
        }
    }
    debug!("telnet reader thread exiting");
}

impl<R: Read, W: Write> Read for TelnetClient<R, W> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        TelnetClient::read(self, buf)
    }
}
