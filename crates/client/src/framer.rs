//! Incremental line framing.
//!
//! Transport chunks arrive at arbitrary byte boundaries: a frame may be
//! split across chunks, several frames may share one, and a multi-byte
//! character may straddle two. The framer buffers raw bytes and only hands
//! out complete lines, decoding each line as a whole.

/// Splits a byte stream on `\n`, keeping the unterminated remainder.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns every line it completed, without terminators.
    /// Blank lines are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buf[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            if let Some(line) = decode(&self.buf[start..end]) {
                lines.push(line);
            }
            start = end + 1;
        }
        self.buf.drain(..start);
        lines
    }

    /// Bytes held back waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// End of stream: return the unterminated tail, if any.
    pub fn finish(&mut self) -> Option<String> {
        let tail = std::mem::take(&mut self.buf);
        decode(&tail)
    }
}

fn decode(bytes: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(bytes);
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_frame_is_held_until_complete() {
        let mut framer = LineFramer::new();
        assert!(framer.push(br#"{"type":"#).is_empty());
        assert_eq!(framer.pending(), 8);

        let lines = framer.push(b"\"delta\",\"content\":\"Hi\"}\n");
        assert_eq!(lines, vec![r#"{"type":"delta","content":"Hi"}"#]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn several_lines_in_one_chunk() {
        let mut framer = LineFramer::new();
        let lines = framer.push(b"a\nb\n\nc");
        assert_eq!(lines, vec!["a", "b"]);
        assert_eq!(framer.finish().as_deref(), Some("c"));
        assert_eq!(framer.finish(), None);
    }

    #[test]
    fn multibyte_character_across_chunks() {
        let text = "{\"content\":\"caf\u{e9} \u{1f4e6}\"}\n".as_bytes();
        let mut framer = LineFramer::new();
        let mut lines = Vec::new();
        for byte in text {
            lines.extend(framer.push(std::slice::from_ref(byte)));
        }
        assert_eq!(lines, vec!["{\"content\":\"caf\u{e9} \u{1f4e6}\"}"]);
    }

    #[test]
    fn crlf_terminators_are_trimmed() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"x\r\ny\r\n"), vec!["x", "y"]);
    }
}
