use std::net::SocketAddr;

use crate::message::NtpMessage;

/// A received NTP message paired with the local destination time, plus
/// the delay/offset details derived from the four message timestamps.
///
/// Construction records the message and T4; [`TimeInfo::compute_details`]
/// fills in delay and offset and is idempotent. Malformed timestamp
/// combinations never fail the computation; they leave the affected
/// field absent and append a human-readable comment instead. The
/// comment list is an ordered log, not an error channel.
#[derive(Debug, Clone)]
pub struct TimeInfo {
    message: NtpMessage,
    return_time: i64,
    address: Option<SocketAddr>,
    delay: Option<i64>,
    offset: Option<i64>,
    comments: Vec<String>,
    computed: bool,
}

impl TimeInfo {
    /// Wrap a received message and the local receipt time T4
    /// (milliseconds since the POSIX epoch, same base as the
    /// timestamp conversions).
    pub fn new(message: NtpMessage, return_time: i64) -> Self {
        Self {
            message,
            return_time,
            address: None,
            delay: None,
            offset: None,
            comments: Vec::new(),
            computed: false,
        }
    }

    pub fn with_address(mut self, address: SocketAddr) -> Self {
        self.address = Some(address);
        self
    }

    pub fn message(&self) -> &NtpMessage {
        &self.message
    }

    /// Local time the response arrived (T4), in milliseconds.
    pub fn return_time(&self) -> i64 {
        self.return_time
    }

    /// Address of the responding server, when known.
    pub fn address(&self) -> Option<SocketAddr> {
        self.address
    }

    /// Round-trip network delay in milliseconds; absent when the
    /// message timestamps do not allow computing it.
    pub fn delay(&self) -> Option<i64> {
        self.delay
    }

    /// Local clock offset in milliseconds; absent when the message
    /// timestamps do not allow computing it.
    pub fn offset(&self) -> Option<i64> {
        self.offset
    }

    /// Validation warnings accumulated during computation, in order.
    pub fn comments(&self) -> &[String] {
        &self.comments
    }

    /// Compute round-trip delay and clock offset from the origin (T1),
    /// receive (T2), transmit (T3), and destination (T4) times.
    /// Calling this again is a no-op.
    pub fn compute_details(&mut self) {
        if self.computed {
            return;
        }
        self.computed = true;

        let orig_ntp = self.message.originate_timestamp;
        let rcv_ntp = self.message.receive_timestamp;
        let xmit_ntp = self.message.transmit_timestamp;

        let orig_time = orig_ntp.as_millis();
        let rcv_time = rcv_ntp.as_millis();
        let xmit_time = xmit_ntp.as_millis();
        let return_time = self.return_time;

        if orig_ntp.is_zero() {
            // Without T1 no delay can be computed; a non-zero T3 still
            // permits a broadcast-style offset estimate.
            if !xmit_ntp.is_zero() {
                self.offset = Some(xmit_time - return_time);
                self.comments
                    .push("Error: zero orig time -- cannot compute delay".to_string());
            } else {
                self.comments
                    .push("Error: zero orig time -- cannot compute delay/offset".to_string());
            }
        } else if rcv_ntp.is_zero() || xmit_ntp.is_zero() {
            self.comments
                .push("Warning: zero rcvNtpTime or xmitNtpTime".to_string());

            // Network delay cannot be negative.
            if orig_time > return_time {
                self.comments
                    .push("Error: OrigTime > DestRcvTime".to_string());
            } else {
                self.delay = Some(return_time - orig_time);
            }

            if !rcv_ntp.is_zero() {
                self.offset = Some(rcv_time - orig_time);
            } else {
                self.offset = Some(xmit_time - return_time);
            }
        } else {
            let mut delay_value = return_time - orig_time;
            if xmit_time < rcv_time {
                // The server cannot send before it receives.
                self.comments.push("Error: xmitTime < rcvTime".to_string());
            } else {
                let delta = xmit_time - rcv_time;
                if delta <= delay_value {
                    delay_value -= delta;
                } else if delta - delay_value == 1 {
                    // Processing time spilled into the next clock tick;
                    // quantization, not an inconsistency.
                    if delay_value != 0 {
                        self.comments.push(
                            "Info: processing time only spans to next nearest second".to_string(),
                        );
                        delay_value = 0;
                    }
                } else {
                    self.comments
                        .push("Warning: processing time > total network time".to_string());
                }
            }
            self.delay = Some(delay_value);

            if orig_time > return_time {
                self.comments
                    .push("Error: OrigTime > DestRcvTime".to_string());
            }

            self.offset = Some(((rcv_time - orig_time) + (xmit_time - return_time)) / 2);
        }
    }
}
