//! Bounded byte queue between the reader thread and the caller.
//!
//! One mutex guards head/tail/count, the EOF flag, and a stored I/O
//! error; two condvars wake the waiting side. `close` takes the lock,
//! flips the flag, and signals both condvars -- it never holds more
//! than this one lock, so it cannot deadlock against a stuck reader
//! or writer.

use std::io;
use std::sync::{Condvar, Mutex};

/// Queue capacity in bytes.
pub const RING_CAPACITY: usize = 2048;

pub struct RingBuffer {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
}

struct Inner {
    buf: Box<[u8; RING_CAPACITY]>,
    head: usize,
    tail: usize,
    count: usize,
    closed: bool,
    error: Option<io::Error>,
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl RingBuffer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                buf: Box::new([0u8; RING_CAPACITY]),
                head: 0,
                tail: 0,
                count: 0,
                closed: false,
                error: None,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Append all of `data`, blocking while the queue is full.
    /// Returns `BrokenPipe` once the buffer is closed.
    pub fn write(&self, data: &[u8]) -> io::Result<()> {
        let mut remaining = data;
        let mut inner = self.inner.lock().unwrap();

        while !remaining.is_empty() {
            while inner.count == RING_CAPACITY && !inner.closed {
                inner = self.not_full.wait(inner).unwrap();
            }
            if inner.closed {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "queue closed"));
            }

            let n = remaining.len().min(RING_CAPACITY - inner.count);
            for &byte in &remaining[..n] {
                let tail = inner.tail;
                inner.buf[tail] = byte;
                inner.tail = (tail + 1) % RING_CAPACITY;
            }
            inner.count += n;
            remaining = &remaining[n..];
            self.not_empty.notify_one();
        }
        Ok(())
    }

    /// Pop up to `out.len()` bytes, blocking while the queue is empty.
    /// After close the remaining bytes drain first, then a stored
    /// error surfaces once, then reads return 0 (EOF).
    pub fn read(&self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let mut inner = self.inner.lock().unwrap();

        while inner.count == 0 && !inner.closed {
            inner = self.not_empty.wait(inner).unwrap();
        }
        if inner.count == 0 {
            if let Some(error) = inner.error.take() {
                return Err(error);
            }
            return Ok(0);
        }

        let n = out.len().min(inner.count);
        for slot in out[..n].iter_mut() {
            let head = inner.head;
            *slot = inner.buf[head];
            inner.head = (head + 1) % RING_CAPACITY;
        }
        inner.count -= n;
        self.not_full.notify_one();
        Ok(n)
    }

    /// Bytes ready without blocking.
    pub fn available(&self) -> usize {
        self.inner.lock().unwrap().count
    }

    /// Record a transport error to be surfaced to the reader after the
    /// buffered bytes drain; also closes the queue.
    pub fn fail(&self, error: io::Error) {
        let mut inner = self.inner.lock().unwrap();
        inner.error.get_or_insert(error);
        inner.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Mark the queue closed and wake both sides. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn bytes_come_out_in_fifo_order() {
        let ring = RingBuffer::new();
        ring.write(b"hello").unwrap();
        ring.write(b" world").unwrap();

        let mut out = [0u8; 16];
        let n = ring.read(&mut out).unwrap();
        assert_eq!(&out[..n], b"hello world");
    }

    #[test]
    fn available_reports_without_consuming() {
        let ring = RingBuffer::new();
        assert_eq!(ring.available(), 0);
        ring.write(&[1, 2, 3]).unwrap();
        assert_eq!(ring.available(), 3);
        assert_eq!(ring.available(), 3);
    }

    #[test]
    fn writer_blocks_on_full_queue_until_reader_drains() {
        let ring = Arc::new(RingBuffer::new());
        ring.write(&vec![0u8; RING_CAPACITY]).unwrap();

        let writer = {
            let ring = ring.clone();
            thread::spawn(move || ring.write(&[42u8; 100]))
        };

        // Give the writer time to block on the full queue.
        thread::sleep(Duration::from_millis(50));
        assert!(!writer.is_finished());

        let mut out = vec![0u8; RING_CAPACITY];
        ring.read(&mut out).unwrap();
        writer.join().unwrap().unwrap();
        assert_eq!(ring.available(), 100);
    }

    #[test]
    fn reader_blocks_until_data_arrives() {
        let ring = Arc::new(RingBuffer::new());
        let reader = {
            let ring = ring.clone();
            thread::spawn(move || {
                let mut out = [0u8; 4];
                let n = ring.read(&mut out).unwrap();
                out[..n].to_vec()
            })
        };

        thread::sleep(Duration::from_millis(50));
        ring.write(b"ping").unwrap();
        assert_eq!(reader.join().unwrap(), b"ping");
    }

    #[test]
    fn close_drains_then_eof() {
        let ring = RingBuffer::new();
        ring.write(b"tail").unwrap();
        ring.close();
        ring.close(); // idempotent

        let mut out = [0u8; 16];
        let n = ring.read(&mut out).unwrap();
        assert_eq!(&out[..n], b"tail");
        assert_eq!(ring.read(&mut out).unwrap(), 0);
        assert_eq!(ring.read(&mut out).unwrap(), 0);
    }

    #[test]
    fn close_wakes_blocked_reader() {
        let ring = Arc::new(RingBuffer::new());
        let reader = {
            let ring = ring.clone();
            thread::spawn(move || ring.read(&mut [0u8; 4]))
        };

        thread::sleep(Duration::from_millis(50));
        ring.close();
        assert_eq!(reader.join().unwrap().unwrap(), 0);
    }

    #[test]
    fn stored_error_surfaces_after_drain() {
        let ring = RingBuffer::new();
        ring.write(b"ok").unwrap();
        ring.fail(io::Error::new(io::ErrorKind::ConnectionReset, "boom"));

        let mut out = [0u8; 16];
        let n = ring.read(&mut out).unwrap();
        assert_eq!(&out[..n], b"ok");
        let err = ring.read(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        // The error is one-shot; afterwards it is plain EOF.
        assert_eq!(ring.read(&mut out).unwrap(), 0);
    }

    #[test]
    fn write_after_close_is_refused() {
        let ring = RingBuffer::new();
        ring.close();
        assert!(ring.write(b"x").is_err());
    }
}
