//! ASCII-mode line-ending transforms.
//!
//! Downloads turn CRLF into LF; uploads put a CR in front of every LF.

/// Streaming CRLF → LF converter. A CR split from its LF across two
/// chunks is held back until the next chunk shows what follows it.
#[derive(Debug, Default)]
pub struct AsciiDecoder {
    pending_cr: bool,
    /// LFs that arrived without a CR in front.
    pub bare_lfs: u64,
}

impl AsciiDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, input: &[u8], out: &mut Vec<u8>) {
        out.reserve(input.len() + 1);
        for &b in input {
            if self.pending_cr {
                self.pending_cr = false;
                if b == b'\n' {
                    out.push(b'\n');
                    continue;
                }
                out.push(b'\r');
            }
            match b {
                b'\r' => self.pending_cr = true,
                b'\n' => {
                    self.bare_lfs += 1;
                    out.push(b'\n');
                }
                _ => out.push(b),
            }
        }
    }

    /// Flush a CR that ended the stream.
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        if std::mem::take(&mut self.pending_cr) {
            out.push(b'\r');
        }
    }
}

/// LF → CRLF. A CR already present is left alone, so `\r\n` becomes `\r\r\n`.
pub fn encode_ascii(input: &[u8], out: &mut Vec<u8>) {
    out.reserve(input.len() + input.len() / 16);
    for &b in input {
        if b == b'\n' {
            out.push(b'\r');
        }
        out.push(b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_chunks(chunks: &[&[u8]]) -> (Vec<u8>, u64) {
        let mut dec = AsciiDecoder::new();
        let mut out = Vec::new();
        for c in chunks {
            dec.decode(c, &mut out);
        }
        dec.finish(&mut out);
        (out, dec.bare_lfs)
    }

    #[test]
    fn crlf_becomes_lf() {
        let (out, bare) = decode_chunks(&[b"one\r\ntwo\r\n"]);
        assert_eq!(out, b"one\ntwo\n");
        assert_eq!(bare, 0);
    }

    #[test]
    fn bare_lf_is_counted() {
        let (out, bare) = decode_chunks(&[b"a\nb\r\nc\n"]);
        assert_eq!(out, b"a\nb\nc\n");
        assert_eq!(bare, 2);
    }

    #[test]
    fn split_crlf_across_chunks() {
        let (out, bare) = decode_chunks(&[b"line\r", b"\nnext"]);
        assert_eq!(out, b"line\nnext");
        assert_eq!(bare, 0);
    }

    #[test]
    fn lone_cr_survives_both_directions() {
        let original = b"x\ry\rz\n\r";
        let mut wire = Vec::new();
        encode_ascii(original, &mut wire);
        assert_eq!(wire, b"x\ry\rz\r\n\r");
        let (back, _) = decode_chunks(&[&wire[..3], &wire[3..]]);
        assert_eq!(back, original);
    }
}
