//! RFC 764 netascii line-ending translation.
//!
//! On the wire every line break is CR+LF and every bare carriage
//! return is CR+NUL. Encoding is stateless per byte; decoding has to
//! remember a trailing CR because the pair may straddle a block
//! boundary.

/// Encode local bytes into netascii: LF becomes CR LF, CR becomes
/// CR NUL.
pub fn encode(data: &[u8], out: &mut Vec<u8>) {
    for &byte in data {
        match byte {
            b'\n' => out.extend_from_slice(b"\r\n"),
            b'\r' => out.extend_from_slice(b"\r\0"),
            _ => out.push(byte),
        }
    }
}

/// Streaming netascii decoder: CR LF becomes LF, CR NUL becomes CR.
#[derive(Debug, Default)]
pub struct Decoder {
    pending_cr: bool,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8], out: &mut Vec<u8>) {
        for &byte in data {
            if self.pending_cr {
                self.pending_cr = false;
                match byte {
                    b'\n' => out.push(b'\n'),
                    0 => out.push(b'\r'),
                    b'\r' => {
                        // Unpaired CR followed by another CR: emit the
                        // first, keep waiting on the second.
                        out.push(b'\r');
                        self.pending_cr = true;
                    }
                    other => {
                        out.push(b'\r');
                        out.push(other);
                    }
                }
            } else if byte == b'\r' {
                self.pending_cr = true;
            } else {
                out.push(byte);
            }
        }
    }

    /// Flush a CR left hanging at end of stream.
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        if self.pending_cr {
            out.push(b'\r');
            self.pending_cr = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(chunks: &[&[u8]]) -> Vec<u8> {
        let mut decoder = Decoder::new();
        let mut out = Vec::new();
        for chunk in chunks {
            decoder.push(chunk, &mut out);
        }
        decoder.finish(&mut out);
        out
    }

    #[test]
    fn encode_expands_line_endings() {
        let mut out = Vec::new();
        encode(b"a\nb\rc", &mut out);
        assert_eq!(out, b"a\r\nb\r\0c");
    }

    #[test]
    fn decode_reverses_encode() {
        let original = b"line one\nline two\nraw \r here\n";
        let mut encoded = Vec::new();
        encode(original, &mut encoded);
        assert_eq!(decode_all(&[&encoded]), original);
    }

    #[test]
    fn crlf_split_across_blocks_decodes_once() {
        assert_eq!(decode_all(&[b"abc\r", b"\ndef"]), b"abc\ndef");
        assert_eq!(decode_all(&[b"abc\r", b"\0def"]), b"abc\rdef");
    }

    #[test]
    fn unpaired_cr_sequences_pass_through() {
        assert_eq!(decode_all(&[b"a\r\rb"]), b"a\r\rb");
        assert_eq!(decode_all(&[b"tail\r"]), b"tail\r");
    }

    #[test]
    fn plain_data_is_untouched() {
        let data = b"no line endings at all";
        assert_eq!(decode_all(&[data]), data);
        let mut out = Vec::new();
        encode(data, &mut out);
        assert_eq!(out, data);
    }
}
