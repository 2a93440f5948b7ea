use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{ServerMode, TftpConfig};
use crate::error::{Result, TftpError};
use crate::netascii;
use crate::packet::{BLOCK_SIZE, ErrorCode, MAX_PACKET_SIZE, Mode, TftpPacket};

/// Concurrent TFTP server: one accept loop on the well-known port, one
/// spawned task per transfer, each on its own ephemeral socket (the
/// server's TID for that transfer).
pub struct TftpServer {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    policy: Arc<Policy>,
    timeout: Duration,
    max_timeouts: u32,
    shutdown: CancellationToken,
}

/// Per-request access policy, fixed at bind time. The served
/// directories are canonicalized once so containment checks compare
/// like with like.
struct Policy {
    root_dir: Option<PathBuf>,
    write_dir: Option<PathBuf>,
    mode: ServerMode,
    allow_overwrite: bool,
}

impl Policy {
    fn resolve_read(&self, filename: &str) -> Result<PathBuf> {
        let root = self
            .root_dir
            .as_deref()
            .ok_or_else(|| TftpError::Policy("reads are not enabled".to_string()))?;
        resolve_within(root, filename)
    }

    fn resolve_write(&self, filename: &str) -> Result<PathBuf> {
        let dir = self
            .write_dir
            .as_deref()
            .ok_or_else(|| TftpError::Policy("writes are not enabled".to_string()))?;
        resolve_within(dir, filename)
    }
}

impl TftpServer {
    /// Bind the well-known socket and fix the access policy. The
    /// served directories must exist; they are canonicalized here.
    pub async fn bind(config: &TftpConfig) -> Result<Self> {
        let root_dir = if config.mode.allows_read() {
            Some(config.root_dir.canonicalize().map_err(|e| {
                TftpError::InvalidArgument(format!(
                    "root_dir {}: {e}",
                    config.root_dir.display()
                ))
            })?)
        } else {
            None
        };
        let write_dir = if config.mode.allows_write() {
            Some(config.write_dir.canonicalize().map_err(|e| {
                TftpError::InvalidArgument(format!(
                    "write_dir {}: {e}",
                    config.write_dir.display()
                ))
            })?)
        } else {
            None
        };

        let socket = create_server_socket(config.bind_addr)?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
            policy: Arc::new(Policy {
                root_dir,
                write_dir,
                mode: config.mode,
                allow_overwrite: config.allow_overwrite,
            }),
            timeout: Duration::from_secs(config.timeout_secs),
            max_timeouts: config.max_timeouts,
            shutdown: CancellationToken::new(),
        })
    }

    /// Address the request socket is bound to (useful when binding to
    /// port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the accept loop until [`TftpServer::close`] is called.
    pub async fn serve(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(TftpError::Closed);
        }
        info!("TFTP server listening on {}", self.local_addr);

        let mut buf = vec![0u8; MAX_PACKET_SIZE + 1];
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("TFTP server shutting down");
                    return Ok(());
                }
                received = self.socket.recv_from(&mut buf) => {
                    let (len, peer) = match received {
                        Ok(received) => received,
                        Err(e) => {
                            error!("error receiving request: {e}");
                            continue;
                        }
                    };

                    let data = buf[..len].to_vec();
                    let policy = self.policy.clone();
                    let timeout = self.timeout;
                    let max_timeouts = self.max_timeouts;
                    let cancel = self.shutdown.child_token();

                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_request(data, peer, policy, timeout, max_timeouts, cancel).await
                        {
                            warn!(%peer, error = %e, "transfer failed");
                        }
                    });
                }
            }
        }
    }

    /// Stop accepting requests and interrupt in-flight transfers.
    /// Safe to call more than once.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Well-known-port socket with address reuse, built the long way round
/// so restarts do not trip over TIME_WAIT-style lingering.
fn create_server_socket(bind_addr: SocketAddr) -> Result<UdpSocket> {
    let domain = if bind_addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&bind_addr.into())?;
    socket.set_nonblocking(true)?;

    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}

async fn handle_request(
    data: Vec<u8>,
    peer: SocketAddr,
    policy: Arc<Policy>,
    timeout: Duration,
    max_timeouts: u32,
    cancel: CancellationToken,
) -> Result<()> {
    let packet = match TftpPacket::decode(&data) {
        Ok(packet) => packet,
        Err(e) => {
            warn!(%peer, error = %e, "undecodable request");
            send_error(peer, ErrorCode::IllegalOperation, "Malformed request").await?;
            return Ok(());
        }
    };

    let transfer = Uuid::new_v4();
    match packet {
        TftpPacket::Rrq { filename, mode } => {
            handle_read(
                &filename, mode, peer, &policy, timeout, max_timeouts, cancel, transfer,
            )
            .await
        }
        TftpPacket::Wrq { filename, mode } => {
            handle_write(
                &filename, mode, peer, &policy, timeout, max_timeouts, cancel, transfer,
            )
            .await
        }
        other => {
            warn!(%peer, packet = ?other, "unexpected opcode on request port");
            send_error(peer, ErrorCode::IllegalOperation, "Unexpected opcode").await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_read(
    filename: &str,
    mode: Mode,
    peer: SocketAddr,
    policy: &Policy,
    timeout: Duration,
    max_timeouts: u32,
    cancel: CancellationToken,
    transfer: Uuid,
) -> Result<()> {
    // RFC 1350: every transfer runs on a fresh TID.
    let socket = transfer_socket(peer).await?;

    if mode == Mode::Mail {
        send_error_on(&socket, ErrorCode::IllegalOperation, "MAIL mode not supported").await?;
        return Ok(());
    }
    if !policy.mode.allows_read() {
        warn!(%transfer, %peer, "RRQ refused: reads disabled");
        send_error_on(&socket, ErrorCode::AccessViolation, "Access violation").await?;
        return Ok(());
    }

    let path = match policy.resolve_read(filename) {
        Ok(path) => path,
        Err(e) => {
            warn!(%transfer, %peer, filename, error = %e, "RRQ refused");
            send_error_on(&socket, ErrorCode::AccessViolation, "Access violation").await?;
            return Ok(());
        }
    };

    let mut file = match File::open(&path).await {
        Ok(file) => file,
        Err(_) => {
            debug!(%transfer, %peer, path = %path.display(), "file not found");
            send_error_on(&socket, ErrorCode::FileNotFound, "File not found").await?;
            return Ok(());
        }
    };

    info!(%transfer, %peer, path = %path.display(), mode = mode.as_str(), "read transfer started");

    let mut pending: Vec<u8> = Vec::new();
    let mut staging = vec![0u8; BLOCK_SIZE];
    let mut eof = false;
    let mut block: u16 = 0;
    let mut bytes_sent: u64 = 0;
    let mut buf = vec![0u8; MAX_PACKET_SIZE];

    loop {
        while !eof && pending.len() < BLOCK_SIZE {
            let n = file.read(&mut staging).await?;
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
        socket.send(&data).await?;

        // Lockstep: this block must be acknowledged before the next.
        let mut attempts: u32 = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(%transfer, "transfer cancelled by shutdown");
                    return Err(TftpError::Closed);
                }
                received = tokio::time::timeout(timeout, socket.recv(&mut buf)) => {
                    match received {
                        Err(_) => {
                            attempts += 1;
                            if attempts >= max_timeouts {
                                return Err(TftpError::Timeout { attempts });
                            }
                            debug!(%transfer, block, attempt = attempts, "ack timeout, resending data");
                            socket.send(&data).await?;
                        }
                        Ok(Err(e)) => return Err(e.into()),
                        Ok(Ok(len)) => match TftpPacket::decode(&buf[..len]) {
                            Ok(TftpPacket::Ack { block: acked }) if acked == block => break,
                            Ok(TftpPacket::Ack { block: acked }) => {
                                debug!(%transfer, acked, block, "ignoring stale ack");
                            }
                            Ok(TftpPacket::Error { code, message }) => {
                                return Err(TftpError::Peer { code, message });
                            }
                            Ok(other) => {
                                warn!(%transfer, packet = ?other, "unexpected packet, dropping");
                            }
                            Err(e) => {
                                warn!(%transfer, error = %e, "undecodable packet, dropping");
                            }
                        },
                    }
                }
            }
        }
        bytes_sent += take as u64;

        if take < BLOCK_SIZE {
            info!(%transfer, blocks = block, bytes = bytes_sent, "read transfer complete");
            return Ok(());
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_write(
    filename: &str,
    mode: Mode,
    peer: SocketAddr,
    policy: &Policy,
    timeout: Duration,
    max_timeouts: u32,
    cancel: CancellationToken,
    transfer: Uuid,
) -> Result<()> {
    let socket = transfer_socket(peer).await?;

    if mode == Mode::Mail {
        send_error_on(&socket, ErrorCode::IllegalOperation, "MAIL mode not supported").await?;
        return Ok(());
    }
    if !policy.mode.allows_write() {
        warn!(%transfer, %peer, "WRQ refused: writes disabled");
        send_error_on(&socket, ErrorCode::AccessViolation, "Access violation").await?;
        return Ok(());
    }

    let path = match policy.resolve_write(filename) {
        Ok(path) => path,
        Err(e) => {
            warn!(%transfer, %peer, filename, error = %e, "WRQ refused");
            send_error_on(&socket, ErrorCode::AccessViolation, "Access violation").await?;
            return Ok(());
        }
    };

    if path.exists() && !policy.allow_overwrite {
        warn!(%transfer, %peer, path = %path.display(), "WRQ refused: file exists");
        send_error_on(&socket, ErrorCode::FileExists, "File already exists").await?;
        return Ok(());
    }

    info!(%transfer, %peer, path = %path.display(), mode = mode.as_str(), "write transfer started");

    // Collect into a temp file, rename on success: a transfer that
    // dies halfway never leaves a partial file at the final path.
    let temp_path = path.with_extension("tftp-tmp");
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut temp = File::create(&temp_path).await?;

    let result = receive_into(
        &socket,
        &mut temp,
        mode,
        timeout,
        max_timeouts,
        &cancel,
        transfer,
    )
    .await;

    match result {
        Ok((bytes_written, blocks)) => {
            temp.flush().await?;
            drop(temp);
            tokio::fs::rename(&temp_path, &path).await?;
            info!(%transfer, blocks, bytes = bytes_written, path = %path.display(), "write transfer complete");
            Ok(())
        }
        Err(e) => {
            drop(temp);
            let _ = tokio::fs::remove_file(&temp_path).await;
            Err(e)
        }
    }
}

/// Lockstep receive loop shared by the write handler: ACK 0 first,
/// then one DATA per ACK until a short block arrives.
async fn receive_into(
    socket: &UdpSocket,
    sink: &mut File,
    mode: Mode,
    timeout: Duration,
    max_timeouts: u32,
    cancel: &CancellationToken,
    transfer: Uuid,
) -> Result<(u64, u16)> {
    let mut last_ack = TftpPacket::Ack { block: 0 }.encode();
    socket.send(&last_ack).await?;

    let mut decoder = netascii::Decoder::new();
    let mut expected_block: u16 = 1;
    let mut bytes_written: u64 = 0;
    let mut attempts: u32 = 0;
    let mut buf = vec![0u8; MAX_PACKET_SIZE + 1];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(%transfer, "transfer cancelled by shutdown");
                return Err(TftpError::Closed);
            }
            received = tokio::time::timeout(timeout, socket.recv(&mut buf)) => {
                let len = match received {
                    Err(_) => {
                        attempts += 1;
                        if attempts >= max_timeouts {
                            return Err(TftpError::Timeout { attempts });
                        }
                        debug!(%transfer, expected_block, attempt = attempts, "data timeout, resending ack");
                        socket.send(&last_ack).await?;
                        continue;
                    }
                    Ok(Err(e)) => return Err(e.into()),
                    Ok(Ok(len)) => len,
                };
                attempts = 0;

                match TftpPacket::decode(&buf[..len]) {
                    Ok(TftpPacket::Data { block, payload }) if block == expected_block => {
                        if mode == Mode::Netascii {
                            let mut decoded = Vec::with_capacity(payload.len());
                            decoder.push(&payload, &mut decoded);
                            sink.write_all(&decoded).await?;
                            bytes_written += decoded.len() as u64;
                        } else {
                            sink.write_all(&payload).await?;
                            bytes_written += payload.len() as u64;
                        }

                        last_ack = TftpPacket::Ack { block }.encode();
                        socket.send(&last_ack).await?;

                        if payload.len() < BLOCK_SIZE {
                            if mode == Mode::Netascii {
                                let mut tail = Vec::new();
                                decoder.finish(&mut tail);
                                if !tail.is_empty() {
                                    sink.write_all(&tail).await?;
                                    bytes_written += tail.len() as u64;
                                }
                            }
                            return Ok((bytes_written, block));
                        }
                        expected_block = expected_block.wrapping_add(1);
                    }
                    Ok(TftpPacket::Data { block, .. }) if block == expected_block.wrapping_sub(1) => {
                        // Duplicate of the previous block: answer it once
                        // more, nothing else.
                        debug!(%transfer, block, "duplicate data block, re-acknowledging");
                        socket.send(&TftpPacket::Ack { block }.encode()).await?;
                    }
                    Ok(TftpPacket::Data { block, .. }) => {
                        debug!(%transfer, block, expected_block, "discarding out-of-order data block");
                    }
                    Ok(TftpPacket::Error { code, message }) => {
                        return Err(TftpError::Peer { code, message });
                    }
                    Ok(other) => {
                        warn!(%transfer, packet = ?other, "unexpected packet, dropping");
                    }
                    Err(e) => {
                        warn!(%transfer, error = %e, "undecodable packet, dropping");
                    }
                }
            }
        }
    }
}

/// Ephemeral socket connected to the requesting client; the kernel
/// filters foreign TIDs for us from then on.
async fn transfer_socket(peer: SocketAddr) -> Result<UdpSocket> {
    let bind_addr = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(peer).await?;
    Ok(socket)
}

async fn send_error(peer: SocketAddr, code: ErrorCode, message: &str) -> Result<()> {
    let socket = transfer_socket(peer).await?;
    send_error_on(&socket, code, message).await
}

async fn send_error_on(socket: &UdpSocket, code: ErrorCode, message: &str) -> Result<()> {
    let packet = TftpPacket::Error {
        code,
        message: message.to_string(),
    };
    socket.send(&packet.encode()).await?;
    debug!(code = ?code, message, "sent error packet");
    Ok(())
}

/// Resolve `filename` inside `base` (already canonical), refusing
/// traversal, symlinks, and anything that escapes after
/// canonicalization.
fn resolve_within(base: &Path, filename: &str) -> Result<PathBuf> {
    let filename = filename.replace('\\', "/");
    if filename.contains("..") {
        return Err(TftpError::Policy("path traversal attempt".to_string()));
    }
    if filename.trim_start_matches('/').is_empty() {
        return Err(TftpError::InvalidArgument("empty file name".to_string()));
    }

    let path = base.join(filename.trim_start_matches('/'));

    match std::fs::symlink_metadata(&path) {
        Ok(metadata) if metadata.file_type().is_symlink() => {
            return Err(TftpError::Policy("symlinks are not allowed".to_string()));
        }
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            // Fine for writes; reads will fail at open.
        }
        Err(_) => {
            return Err(TftpError::Policy("access denied".to_string()));
        }
    }

    // Containment check against the canonical base, whether or not the
    // file exists yet.
    if let Ok(canonical) = path.canonicalize() {
        if !canonical.starts_with(base) {
            return Err(TftpError::Policy("path escapes served directory".to_string()));
        }
    } else if let Some(parent) = path.parent()
        && let Ok(canonical_parent) = parent.canonicalize()
        && !canonical_parent.starts_with(base)
    {
        return Err(TftpError::Policy("path escapes served directory".to_string()));
    }

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_rejects_dot_dot() {
        let base = std::env::temp_dir().canonicalize().unwrap();
        assert!(matches!(
            resolve_within(&base, "../etc/passwd"),
            Err(TftpError::Policy(_))
        ));
        assert!(matches!(
            resolve_within(&base, "a/../../b"),
            Err(TftpError::Policy(_))
        ));
        assert!(matches!(
            resolve_within(&base, "..\\windows"),
            Err(TftpError::Policy(_))
        ));
    }

    #[test]
    fn resolve_rejects_empty_name() {
        let base = std::env::temp_dir().canonicalize().unwrap();
        assert!(matches!(
            resolve_within(&base, "/"),
            Err(TftpError::InvalidArgument(_))
        ));
    }

    #[test]
    fn resolve_keeps_plain_names_inside_base() {
        let base = std::env::temp_dir().canonicalize().unwrap();
        let path = resolve_within(&base, "firmware.bin").unwrap();
        assert!(path.starts_with(&base));
        // Absolute names are reanchored under the base.
        let path = resolve_within(&base, "/boot/firmware.bin").unwrap();
        assert!(path.starts_with(&base));
    }
}
