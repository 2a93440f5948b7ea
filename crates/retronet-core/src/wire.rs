use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// RFC 1350 strings (filenames, modes, error text) are short; a cap
/// keeps a hostile packet from forcing an unbounded scan.
pub const MAX_CSTRING_LENGTH: usize = 255;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("no NUL terminator found")]
    MissingTerminator,

    #[error("string exceeds {MAX_CSTRING_LENGTH} bytes")]
    TooLong,

    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Parse a NUL-terminated string from the front of `bytes`, consuming
/// it together with the terminator.
pub fn get_cstring(bytes: &mut BytesMut) -> Result<String, WireError> {
    let search = &bytes[..bytes.len().min(MAX_CSTRING_LENGTH + 1)];
    let nul_pos = search
        .iter()
        .position(|&b| b == 0)
        .ok_or(if bytes.len() > MAX_CSTRING_LENGTH {
            WireError::TooLong
        } else {
            WireError::MissingTerminator
        })?;

    let string_bytes = bytes.split_to(nul_pos);
    bytes.advance(1); // NUL

    Ok(String::from_utf8(string_bytes.to_vec())?)
}

/// Append `s` to `buf` followed by a NUL terminator.
pub fn put_cstring(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_two_strings() {
        let mut buf = BytesMut::new();
        put_cstring(&mut buf, "firmware.bin");
        put_cstring(&mut buf, "octet");

        assert_eq!(get_cstring(&mut buf).unwrap(), "firmware.bin");
        assert_eq!(get_cstring(&mut buf).unwrap(), "octet");
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_missing_terminator() {
        let mut buf = BytesMut::from(&b"no-nul-here"[..]);
        assert!(matches!(
            get_cstring(&mut buf),
            Err(WireError::MissingTerminator)
        ));
    }

    #[test]
    fn rejects_overlong_string() {
        let mut buf = BytesMut::from(vec![b'a'; 300].as_slice());
        buf.put_u8(0);
        assert!(matches!(get_cstring(&mut buf), Err(WireError::TooLong)));
    }

    #[test]
    fn empty_string_is_valid() {
        let mut buf = BytesMut::from(&[0u8][..]);
        assert_eq!(get_cstring(&mut buf).unwrap(), "");
    }
}
