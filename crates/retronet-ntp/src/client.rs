use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{NtpError, Result};
use crate::message::{NtpMessage, NTP_PACKET_SIZE};
use crate::time_info::TimeInfo;
use crate::timestamp::NtpTimestamp;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Single-shot SNTP-style client: one request datagram, one response,
/// wrapped into a [`TimeInfo`] for delay/offset computation.
#[derive(Debug, Clone)]
pub struct NtpClient {
    timeout: Duration,
}

impl Default for NtpClient {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl NtpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-request receive timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Query `server` once and return the timing info. The transmit
    /// timestamp is stamped immediately before the send; T4 is taken
    /// at receipt.
    pub async fn get_time(&self, server: SocketAddr) -> Result<TimeInfo> {
        let bind_addr = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(server).await?;

        let mut request = NtpMessage::client_request();
        request.transmit_timestamp = NtpTimestamp::from_millis(now_millis());
        socket.send(&request.encode()).await?;
        debug!(%server, "sent NTPv3 client request");

        let mut buf = [0u8; NTP_PACKET_SIZE * 2];
        let len = match timeout(self.timeout, socket.recv(&mut buf)).await {
            Ok(recv) => recv?,
            Err(_) => return Err(NtpError::Timeout(self.timeout)),
        };
        let return_time = now_millis();

        let message = NtpMessage::decode(&buf[..len])?;
        debug!(
            stratum = message.stratum,
            reference = %message.reference_id_string(),
            "received NTP response"
        );

        Ok(TimeInfo::new(message, return_time).with_address(server))
    }
}

fn now_millis() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}
