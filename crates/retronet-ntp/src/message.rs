use bytes::{Buf, BufMut, BytesMut};

use crate::error::{NtpError, Result};
use crate::timestamp::NtpTimestamp;

/// RFC 1305 well-known UDP port.
pub const NTP_PORT: u16 = 123;

/// Fixed NTPv3 header size; this implementation neither sends nor
/// inspects the optional authenticator trailer.
pub const NTP_PACKET_SIZE: usize = 48;

pub const VERSION_3: u8 = 3;

/// RFC 1305 association modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    Reserved = 0,
    SymmetricActive = 1,
    SymmetricPassive = 2,
    Client = 3,
    Server = 4,
    Broadcast = 5,
    ControlMessage = 6,
    Private = 7,
}

impl Mode {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            1 => Mode::SymmetricActive,
            2 => Mode::SymmetricPassive,
            3 => Mode::Client,
            4 => Mode::Server,
            5 => Mode::Broadcast,
            6 => Mode::ControlMessage,
            7 => Mode::Private,
            _ => Mode::Reserved,
        }
    }
}

/// A 48-byte NTPv3 message.
///
/// RFC 1305 header layout, all fields big-endian:
/// 1 byte LI|VN|Mode, 1 byte stratum, 1 byte poll, 1 byte precision,
/// 4 bytes root delay (signed 16.16 s), 4 bytes root dispersion
/// (unsigned 16.16 s), 4 bytes reference id, then the reference,
/// originate, receive, and transmit timestamps (8 bytes each).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtpMessage {
    pub leap_indicator: u8,
    pub version: u8,
    pub mode: Mode,
    pub stratum: u8,
    pub poll: i8,
    pub precision: i8,
    pub root_delay: i32,
    pub root_dispersion: u32,
    pub reference_id: u32,
    pub reference_timestamp: NtpTimestamp,
    pub originate_timestamp: NtpTimestamp,
    pub receive_timestamp: NtpTimestamp,
    pub transmit_timestamp: NtpTimestamp,
}

impl NtpMessage {
    /// A version-3 client request with every field zero except the
    /// header byte; the caller stamps the transmit timestamp just
    /// before sending.
    pub fn client_request() -> Self {
        Self {
            leap_indicator: 0,
            version: VERSION_3,
            mode: Mode::Client,
            stratum: 0,
            poll: 0,
            precision: 0,
            root_delay: 0,
            root_dispersion: 0,
            reference_id: 0,
            reference_timestamp: NtpTimestamp::ZERO,
            originate_timestamp: NtpTimestamp::ZERO,
            receive_timestamp: NtpTimestamp::ZERO,
            transmit_timestamp: NtpTimestamp::ZERO,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(NTP_PACKET_SIZE);
        buf.put_u8((self.leap_indicator & 0x03) << 6 | (self.version & 0x07) << 3 | self.mode as u8);
        buf.put_u8(self.stratum);
        buf.put_i8(self.poll);
        buf.put_i8(self.precision);
        buf.put_i32(self.root_delay);
        buf.put_u32(self.root_dispersion);
        buf.put_u32(self.reference_id);
        buf.put_u64(self.reference_timestamp.as_bits());
        buf.put_u64(self.originate_timestamp.as_bits());
        buf.put_u64(self.receive_timestamp.as_bits());
        buf.put_u64(self.transmit_timestamp.as_bits());
        buf.to_vec()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < NTP_PACKET_SIZE {
            return Err(NtpError::Protocol(format!(
                "datagram too short: {} bytes (need {})",
                data.len(),
                NTP_PACKET_SIZE
            )));
        }

        let mut buf = &data[..NTP_PACKET_SIZE];
        let header = buf.get_u8();

        Ok(Self {
            leap_indicator: header >> 6,
            version: (header >> 3) & 0x07,
            mode: Mode::from_bits(header),
            stratum: buf.get_u8(),
            poll: buf.get_i8(),
            precision: buf.get_i8(),
            root_delay: buf.get_i32(),
            root_dispersion: buf.get_u32(),
            reference_id: buf.get_u32(),
            reference_timestamp: NtpTimestamp::from_bits(buf.get_u64()),
            originate_timestamp: NtpTimestamp::from_bits(buf.get_u64()),
            receive_timestamp: NtpTimestamp::from_bits(buf.get_u64()),
            transmit_timestamp: NtpTimestamp::from_bits(buf.get_u64()),
        })
    }

    /// Root delay in milliseconds (the wire value is signed 16.16
    /// fixed-point seconds).
    pub fn root_delay_millis(&self) -> i64 {
        i64::from(self.root_delay) * 1000 / 65_536
    }

    /// Root dispersion in milliseconds.
    pub fn root_dispersion_millis(&self) -> u64 {
        u64::from(self.root_dispersion) * 1000 / 65_536
    }

    /// Printable reference identifier: four ASCII characters for
    /// stratum 0/1 (e.g. "LOCL", "GPS"), dotted-quad otherwise.
    pub fn reference_id_string(&self) -> String {
        let b = self.reference_id.to_be_bytes();
        if self.stratum <= 1 {
            b.iter()
                .take_while(|&&c| c != 0)
                .map(|&c| if c.is_ascii_graphic() { c as char } else { '?' })
                .collect()
        } else {
            format!("{}.{}.{}.{}", b[0], b[1], b[2], b[3])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_is_exactly_48_bytes() {
        assert_eq!(NtpMessage::client_request().encode().len(), NTP_PACKET_SIZE);
    }

    #[test]
    fn client_request_header_byte() {
        let encoded = NtpMessage::client_request().encode();
        // LI=0, VN=3, Mode=3 -> 0b00_011_011
        assert_eq!(encoded[0], 0x1b);
    }

    #[test]
    fn decode_roundtrips_all_fields() {
        let mut msg = NtpMessage::client_request();
        msg.leap_indicator = 1;
        msg.stratum = 2;
        msg.poll = 6;
        msg.precision = -20;
        msg.root_delay = -0x0001_8000; // -1.5 s
        msg.root_dispersion = 0x0002_0000; // 2 s
        msg.reference_id = u32::from_be_bytes(*b"GPS\0");
        msg.originate_timestamp = NtpTimestamp::from_bits(0xc508_6b4c_1234_5678);
        msg.receive_timestamp = NtpTimestamp::from_bits(0xc508_6b4c_8765_4321);
        msg.transmit_timestamp = NtpTimestamp::from_bits(0xc508_6b4d_0000_0001);

        let decoded = NtpMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn decode_rejects_short_datagram() {
        let err = NtpMessage::decode(&[0u8; 12]).unwrap_err();
        assert!(matches!(err, NtpError::Protocol(_)));
    }

    #[test]
    fn fixed_point_root_fields_convert_to_millis() {
        let mut msg = NtpMessage::client_request();
        msg.root_delay = 0x0001_8000; // 1.5 s
        msg.root_dispersion = 0x0000_8000; // 0.5 s
        assert_eq!(msg.root_delay_millis(), 1500);
        assert_eq!(msg.root_dispersion_millis(), 500);
    }

    #[test]
    fn reference_id_renders_by_stratum() {
        let mut msg = NtpMessage::client_request();
        msg.stratum = 1;
        msg.reference_id = u32::from_be_bytes(*b"LOCL");
        assert_eq!(msg.reference_id_string(), "LOCL");

        msg.stratum = 2;
        msg.reference_id = u32::from_be_bytes([192, 168, 1, 1]);
        assert_eq!(msg.reference_id_string(), "192.168.1.1");
    }
}
