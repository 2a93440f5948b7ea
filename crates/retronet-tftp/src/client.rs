use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Result, TftpError};
use crate::netascii;
use crate::packet::{BLOCK_SIZE, ErrorCode, MAX_PACKET_SIZE, Mode, TftpPacket};
use crate::{DEFAULT_MAX_TIMEOUTS, DEFAULT_TIMEOUT_SECS};

/// Lockstep TFTP client.
///
/// Both operations speak to the server's well-known port only for the
/// initial request; the first reply establishes the server's transfer
/// TID and every later packet must come from it (RFC 1350 §4).
#[derive(Debug, Clone)]
pub struct TftpClient {
    timeout: Duration,
    max_timeouts: u32,
}

impl Default for TftpClient {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_timeouts: DEFAULT_MAX_TIMEOUTS,
        }
    }
}

impl TftpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-packet receive timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Consecutive timeouts tolerated before the transfer aborts.
    pub fn with_max_timeouts(mut self, max_timeouts: u32) -> Self {
        self.max_timeouts = max_timeouts;
        self
    }

    /// Download `filename` from `server`, writing its contents to
    /// `output`. Returns the number of bytes written.
    pub async fn receive_file<W>(
        &self,
        filename: &str,
        mode: Mode,
        output: &mut W,
        server: SocketAddr,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        if filename.is_empty() {
            return Err(TftpError::InvalidArgument("empty file name".to_string()));
        }

        let socket = bind_for(server).await?;
        let rrq = TftpPacket::Rrq {
            filename: filename.to_string(),
            mode,
        }
        .encode();
        socket.send_to(&rrq, server).await?;
        debug!(filename, mode = mode.as_str(), %server, "sent RRQ");

        // The last RRQ or ACK we sent, resent when the peer goes quiet.
        let mut last_control = rrq;
        let mut peer: Option<SocketAddr> = None;
        let mut decoder = netascii::Decoder::new();
        let mut expected_block: u16 = 1;
        let mut bytes_written: u64 = 0;
        let mut timeouts: u32 = 0;
        let mut buf = vec![0u8; MAX_PACKET_SIZE + 1];

        loop {
            let (len, from) = match timeout(self.timeout, socket.recv_from(&mut buf)).await {
                Ok(received) => received?,
                Err(_) => {
                    timeouts += 1;
                    if timeouts >= self.max_timeouts {
                        return Err(TftpError::Timeout { attempts: timeouts });
                    }
                    let target = peer.unwrap_or(server);
                    socket.send_to(&last_control, target).await?;
                    debug!(attempt = timeouts, "receive timeout, resent last control packet");
                    continue;
                }
            };

            match peer {
                None => {
                    // RFC 1350: the server must answer from a freshly
                    // chosen TID, never the request port. A changed
                    // address is adopted along with the port.
                    if from.port() == server.port() {
                        return Err(TftpError::Protocol(
                            "server replied from its request port instead of a new TID"
                                .to_string(),
                        ));
                    }
                    peer = Some(from);
                    debug!(tid = %from, "bound server TID");
                }
                Some(p) if from == p => {}
                Some(_) => {
                    warn!(%from, "packet from unknown TID");
                    socket
                        .send_to(&TftpPacket::error(ErrorCode::UnknownTid).encode(), from)
                        .await?;
                    continue;
                }
            }
            timeouts = 0;
            let bound_peer = peer.expect("peer TID bound above");

            match TftpPacket::decode(&buf[..len])? {
                TftpPacket::Data { block, payload } if block == expected_block => {
                    bytes_written += self
                        .write_payload(output, &payload, mode, &mut decoder)
                        .await?;

                    let ack = TftpPacket::Ack { block }.encode();
                    socket.send_to(&ack, bound_peer).await?;
                    last_control = ack;

                    if payload.len() < BLOCK_SIZE {
                        if mode == Mode::Netascii {
                            let mut tail = Vec::new();
                            decoder.finish(&mut tail);
                            if !tail.is_empty() {
                                output.write_all(&tail).await?;
                                bytes_written += tail.len() as u64;
                            }
                        }
                        output.flush().await?;
                        debug!(blocks = block, bytes = bytes_written, "transfer complete");
                        return Ok(bytes_written);
                    }
                    expected_block = expected_block.wrapping_add(1);
                }
                TftpPacket::Data { block, .. } if block == expected_block.wrapping_sub(1) => {
                    // Duplicate of the block we already took: re-ACK it
                    // but do not advance. Only the immediately previous
                    // block is answered, which keeps a duplicated DATA
                    // from spawning a second packet train.
                    debug!(block, "duplicate data block, re-acknowledging");
                    socket
                        .send_to(&TftpPacket::Ack { block }.encode(), bound_peer)
                        .await?;
                }
                TftpPacket::Data { block, .. } => {
                    debug!(block, expected_block, "discarding out-of-order data block");
                }
                TftpPacket::Error { code, message } => {
                    return Err(TftpError::Peer { code, message });
                }
                other => {
                    return Err(TftpError::Protocol(format!(
                        "unexpected packet while expecting data: {other:?}"
                    )));
                }
            }
        }
    }

    /// Upload `input` to `server` as `filename`. Returns the number of
    /// payload bytes sent.
    pub async fn send_file<R>(
        &self,
        filename: &str,
        mode: Mode,
        input: &mut R,
        server: SocketAddr,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        if filename.is_empty() {
            return Err(TftpError::InvalidArgument("empty file name".to_string()));
        }

        let socket = bind_for(server).await?;
        let wrq = TftpPacket::Wrq {
            filename: filename.to_string(),
            mode,
        }
        .encode();
        socket.send_to(&wrq, server).await?;
        debug!(filename, mode = mode.as_str(), %server, "sent WRQ");

        let mut peer: Option<SocketAddr> = None;
        self.await_ack(&socket, server, &mut peer, 0, &wrq).await?;

        let mut pending: Vec<u8> = Vec::new();
        let mut staging = vec![0u8; BLOCK_SIZE];
        let mut eof = false;
        let mut block: u16 = 0;
        let mut bytes_sent: u64 = 0;

        loop {
            while !eof && pending.len() < BLOCK_SIZE {
                let n = input.read(&mut staging).await?;
                if n == 0 {
                    eof = true;
                    break;
                }
                if mode == Mode::Netascii {
                    netascii::encode(&staging[..n], &mut pending);
                } else {
                    pending.extend_from_slice(&staging[..n]);
                }
            }

            let take = pending.len().min(BLOCK_SIZE);
            let chunk: Vec<u8> = pending.drain(..take).collect();
            block = block.wrapping_add(1);

            let data = TftpPacket::Data {
                block,
                payload: Bytes::from(chunk),
            }
            .encode();
            let bound_peer = peer.expect("peer TID bound by ACK 0");
            socket.send_to(&data, bound_peer).await?;
            self.await_ack(&socket, server, &mut peer, block, &data).await?;
            bytes_sent += take as u64;

            // A short block is the end-of-transfer marker; its ACK has
            // just been received.
            if take < BLOCK_SIZE {
                debug!(blocks = block, bytes = bytes_sent, "transfer complete");
                return Ok(bytes_sent);
            }
        }
    }

    async fn write_payload<W>(
        &self,
        output: &mut W,
        payload: &[u8],
        mode: Mode,
        decoder: &mut netascii::Decoder,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        if mode == Mode::Netascii {
            let mut decoded = Vec::with_capacity(payload.len());
            decoder.push(payload, &mut decoded);
            output.write_all(&decoded).await?;
            Ok(decoded.len() as u64)
        } else {
            output.write_all(payload).await?;
            Ok(payload.len() as u64)
        }
    }

    /// Wait for the ACK of `expected_block`, resending `last_packet`
    /// on timeout and answering unknown TIDs with ERROR 5.
    async fn await_ack(
        &self,
        socket: &UdpSocket,
        server: SocketAddr,
        peer: &mut Option<SocketAddr>,
        expected_block: u16,
        last_packet: &[u8],
    ) -> Result<()> {
        let mut timeouts: u32 = 0;
        let mut buf = vec![0u8; MAX_PACKET_SIZE];

        loop {
            let (len, from) = match timeout(self.timeout, socket.recv_from(&mut buf)).await {
                Ok(received) => received?,
                Err(_) => {
                    timeouts += 1;
                    if timeouts >= self.max_timeouts {
                        return Err(TftpError::Timeout { attempts: timeouts });
                    }
                    let target = peer.unwrap_or(server);
                    socket.send_to(last_packet, target).await?;
                    debug!(
                        attempt = timeouts,
                        expected_block, "ack timeout, resent last packet"
                    );
                    continue;
                }
            };

            match peer {
                None => {
                    if from.port() == server.port() {
                        return Err(TftpError::Protocol(
                            "server replied from its request port instead of a new TID"
                                .to_string(),
                        ));
                    }
                    *peer = Some(from);
                    debug!(tid = %from, "bound server TID");
                }
                Some(p) if from == *p => {}
                Some(_) => {
                    warn!(%from, "packet from unknown TID");
                    socket
                        .send_to(&TftpPacket::error(ErrorCode::UnknownTid).encode(), from)
                        .await?;
                    continue;
                }
            }
            timeouts = 0;

            match TftpPacket::decode(&buf[..len])? {
                TftpPacket::Ack { block } if block == expected_block => return Ok(()),
                TftpPacket::Ack { block } => {
                    // A stale ACK means our DATA got duplicated in the
                    // network; resending here would double the traffic,
                    // so just keep waiting.
                    debug!(block, expected_block, "ignoring stale ack");
                }
                TftpPacket::Error { code, message } => {
                    return Err(TftpError::Peer { code, message });
                }
                other => {
                    return Err(TftpError::Protocol(format!(
                        "unexpected packet while expecting ack: {other:?}"
                    )));
                }
            }
        }
    }
}

async fn bind_for(server: SocketAddr) -> std::io::Result<UdpSocket> {
    let bind_addr = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    UdpSocket::bind(bind_addr).await
}
