use bytes::{Buf, BufMut, Bytes, BytesMut};
use retronet_core::wire::{get_cstring, put_cstring};

use crate::error::{Result, TftpError};

/// RFC 1350 well-known server port.
pub const TFTP_PORT: u16 = 69;

/// Fixed data-block size; a shorter block ends the transfer.
pub const BLOCK_SIZE: usize = 512;

/// Block plus the 4-byte DATA header.
pub const MAX_PACKET_SIZE: usize = BLOCK_SIZE + 4;

// RFC 1350 opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    Rrq = 1,
    Wrq = 2,
    Data = 3,
    Ack = 4,
    Error = 5,
}

impl TryFrom<u16> for Opcode {
    type Error = TftpError;

    fn try_from(value: u16) -> std::result::Result<Self, TftpError> {
        match value {
            1 => Ok(Opcode::Rrq),
            2 => Ok(Opcode::Wrq),
            3 => Ok(Opcode::Data),
            4 => Ok(Opcode::Ack),
            5 => Ok(Opcode::Error),
            _ => Err(TftpError::Protocol(format!("invalid opcode: {value}"))),
        }
    }
}

// RFC 1350 error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    NotDefined = 0,
    FileNotFound = 1,
    AccessViolation = 2,
    DiskFull = 3,
    IllegalOperation = 4,
    UnknownTid = 5,
    FileExists = 6,
    NoSuchUser = 7,
}

impl ErrorCode {
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => ErrorCode::FileNotFound,
            2 => ErrorCode::AccessViolation,
            3 => ErrorCode::DiskFull,
            4 => ErrorCode::IllegalOperation,
            5 => ErrorCode::UnknownTid,
            6 => ErrorCode::FileExists,
            7 => ErrorCode::NoSuchUser,
            _ => ErrorCode::NotDefined,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotDefined => "Not defined",
            ErrorCode::FileNotFound => "File not found",
            ErrorCode::AccessViolation => "Access violation",
            ErrorCode::DiskFull => "Disk full or allocation exceeded",
            ErrorCode::IllegalOperation => "Illegal TFTP operation",
            ErrorCode::UnknownTid => "Unknown transfer ID",
            ErrorCode::FileExists => "File already exists",
            ErrorCode::NoSuchUser => "No such user",
        }
    }
}

// RFC 1350 transfer modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// 8-bit ASCII with CR+LF line endings on the wire.
    Netascii,
    /// Binary transfer, no conversion.
    Octet,
    /// Obsolete mail delivery mode; parsed but refused by the server.
    Mail,
}

impl Mode {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "netascii" => Ok(Mode::Netascii),
            "octet" => Ok(Mode::Octet),
            "mail" => Ok(Mode::Mail),
            _ => Err(TftpError::Protocol(format!("unknown transfer mode: {s}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Netascii => "netascii",
            Mode::Octet => "octet",
            Mode::Mail => "mail",
        }
    }
}

/// One TFTP packet, minus the UDP endpoint it arrived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TftpPacket {
    Rrq { filename: String, mode: Mode },
    Wrq { filename: String, mode: Mode },
    Data { block: u16, payload: Bytes },
    Ack { block: u16 },
    Error { code: ErrorCode, message: String },
}

impl TftpPacket {
    pub fn error(code: ErrorCode) -> Self {
        TftpPacket::Error {
            code,
            message: code.as_str().to_string(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(MAX_PACKET_SIZE);
        match self {
            TftpPacket::Rrq { filename, mode } => {
                buf.put_u16(Opcode::Rrq as u16);
                put_cstring(&mut buf, filename);
                put_cstring(&mut buf, mode.as_str());
            }
            TftpPacket::Wrq { filename, mode } => {
                buf.put_u16(Opcode::Wrq as u16);
                put_cstring(&mut buf, filename);
                put_cstring(&mut buf, mode.as_str());
            }
            TftpPacket::Data { block, payload } => {
                buf.put_u16(Opcode::Data as u16);
                buf.put_u16(*block);
                buf.put_slice(payload);
            }
            TftpPacket::Ack { block } => {
                buf.put_u16(Opcode::Ack as u16);
                buf.put_u16(*block);
            }
            TftpPacket::Error { code, message } => {
                buf.put_u16(Opcode::Error as u16);
                buf.put_u16(*code as u16);
                put_cstring(&mut buf, message);
            }
        }
        buf.to_vec()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(TftpError::Protocol("packet too small".to_string()));
        }

        let mut bytes = BytesMut::from(data);
        let opcode = Opcode::try_from(bytes.get_u16())?;

        match opcode {
            Opcode::Rrq | Opcode::Wrq => {
                let filename = get_cstring(&mut bytes)?;
                let mode = Mode::parse(&get_cstring(&mut bytes)?)?;
                if opcode == Opcode::Rrq {
                    Ok(TftpPacket::Rrq { filename, mode })
                } else {
                    Ok(TftpPacket::Wrq { filename, mode })
                }
            }
            Opcode::Data => {
                let block = bytes.get_u16();
                if bytes.len() > BLOCK_SIZE {
                    return Err(TftpError::Protocol(format!(
                        "data block of {} bytes exceeds the {BLOCK_SIZE}-byte limit",
                        bytes.len()
                    )));
                }
                Ok(TftpPacket::Data {
                    block,
                    payload: bytes.freeze(),
                })
            }
            Opcode::Ack => Ok(TftpPacket::Ack {
                block: bytes.get_u16(),
            }),
            Opcode::Error => {
                let code = ErrorCode::from_u16(bytes.get_u16());
                // Tolerate a missing terminator here: the code already
                // identifies the failure.
                let message = get_cstring(&mut bytes).unwrap_or_default();
                Ok(TftpPacket::Error { code, message })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rrq_encodes_per_rfc_1350() {
        let packet = TftpPacket::Rrq {
            filename: "boot.img".to_string(),
            mode: Mode::Octet,
        };
        let encoded = packet.encode();
        assert_eq!(&encoded[..2], &[0, 1]);
        assert_eq!(&encoded[2..], b"boot.img\0octet\0");
        assert_eq!(TftpPacket::decode(&encoded).unwrap(), packet);
    }

    #[test]
    fn wrq_roundtrips() {
        let packet = TftpPacket::Wrq {
            filename: "upload.txt".to_string(),
            mode: Mode::Netascii,
        };
        assert_eq!(TftpPacket::decode(&packet.encode()).unwrap(), packet);
    }

    #[test]
    fn data_roundtrips_with_payload() {
        let packet = TftpPacket::Data {
            block: 65535,
            payload: Bytes::from(vec![7u8; BLOCK_SIZE]),
        };
        let encoded = packet.encode();
        assert_eq!(encoded.len(), MAX_PACKET_SIZE);
        assert_eq!(TftpPacket::decode(&encoded).unwrap(), packet);
    }

    #[test]
    fn empty_data_block_is_valid() {
        let packet = TftpPacket::Data {
            block: 3,
            payload: Bytes::new(),
        };
        let encoded = packet.encode();
        assert_eq!(encoded.len(), 4);
        assert_eq!(TftpPacket::decode(&encoded).unwrap(), packet);
    }

    #[test]
    fn oversized_data_block_is_rejected() {
        let mut encoded = TftpPacket::Data {
            block: 1,
            payload: Bytes::from(vec![0u8; BLOCK_SIZE]),
        }
        .encode();
        encoded.push(0xAA);
        assert!(matches!(
            TftpPacket::decode(&encoded),
            Err(TftpError::Protocol(_))
        ));
    }

    #[test]
    fn ack_and_error_roundtrip() {
        let ack = TftpPacket::Ack { block: 0 };
        assert_eq!(TftpPacket::decode(&ack.encode()).unwrap(), ack);

        let error = TftpPacket::Error {
            code: ErrorCode::AccessViolation,
            message: "Access violation".to_string(),
        };
        let encoded = error.encode();
        assert_eq!(&encoded[..4], &[0, 5, 0, 2]);
        assert_eq!(TftpPacket::decode(&encoded).unwrap(), error);
    }

    #[test]
    fn unknown_error_codes_collapse_to_not_defined() {
        let encoded = [0u8, 5, 0, 99, b'x', 0];
        match TftpPacket::decode(&encoded).unwrap() {
            TftpPacket::Error { code, message } => {
                assert_eq!(code, ErrorCode::NotDefined);
                assert_eq!(message, "x");
            }
            other => panic!("unexpected packet: {other:?}"),
        }
    }

    #[test]
    fn invalid_opcode_is_rejected() {
        assert!(matches!(
            TftpPacket::decode(&[0, 9, 0, 0]),
            Err(TftpError::Protocol(_))
        ));
        assert!(matches!(
            TftpPacket::decode(&[0, 1]),
            Err(TftpError::Protocol(_))
        ));
    }

    #[test]
    fn mode_parsing_is_case_insensitive() {
        assert_eq!(Mode::parse("OCTET").unwrap(), Mode::Octet);
        assert_eq!(Mode::parse("NetAscii").unwrap(), Mode::Netascii);
        assert_eq!(Mode::parse("mail").unwrap(), Mode::Mail);
        assert!(Mode::parse("binary").is_err());
    }
}
