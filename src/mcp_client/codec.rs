//! Frame codec for newline-delimited JSON-RPC.
//!
//! Bytes arrive in arbitrary chunks. [`FrameCodec::feed`] returns every
//! complete record and keeps only the unterminated tail for the next call.

use super::errors::McpError;
use super::types::JsonRpcMessage;

/// Unterminated records larger than this are discarded.
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Stateful splitter for a newline-delimited record stream.
#[derive(Debug)]
pub struct FrameCodec {
    remainder: Vec<u8>,
    max_frame_bytes: usize,
    /// Set after an oversized record was dropped; bytes are skipped until
    /// the next newline.
    discarding: bool,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame(MAX_FRAME_BYTES)
    }

    pub fn with_max_frame(max_frame_bytes: usize) -> Self {
        Self {
            remainder: Vec::new(),
            max_frame_bytes,
            discarding: false,
        }
    }

    /// Consume a chunk and return the complete records it finishes.
    ///
    /// Records are returned as raw bytes without the terminator. Blank lines
    /// and a trailing `\r` are stripped. Encoding is checked by [`decode`].
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut records = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            let (line, tail) = rest.split_at(pos);
            rest = &tail[1..];

            if self.discarding {
                self.discarding = false;
                self.remainder.clear();
                continue;
            }

            let record = if self.remainder.is_empty() {
                line.to_vec()
            } else {
                let mut joined = std::mem::take(&mut self.remainder);
                joined.extend_from_slice(line);
                joined
            };

            if let Some(record) = finish_record(record) {
                records.push(record);
            }
        }

        if !self.discarding {
            self.remainder.extend_from_slice(rest);
            if self.remainder.len() > self.max_frame_bytes {
                tracing::warn!(
                    buffered = self.remainder.len(),
                    limit = self.max_frame_bytes,
                    "discarding oversized unterminated record"
                );
                self.remainder.clear();
                self.discarding = true;
            }
        }

        records
    }

    /// Bytes of the current unterminated record.
    pub fn remainder(&self) -> &[u8] {
        &self.remainder
    }
}

fn finish_record(mut record: Vec<u8>) -> Option<Vec<u8>> {
    if record.last() == Some(&b'\r') {
        record.pop();
    }
    if record.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        Some(record)
    }
}

/// Parse one record into a JSON-RPC message. Invalid UTF-8 is rejected.
pub fn decode(server: &str, record: &[u8]) -> Result<JsonRpcMessage, McpError> {
    let text = std::str::from_utf8(record).map_err(|e| McpError::FrameDecodeError {
        server: server.to_string(),
        reason: format!("record is not valid UTF-8: {e}"),
    })?;
    let message: JsonRpcMessage =
        serde_json::from_str(text).map_err(|e| McpError::FrameDecodeError {
            server: server.to_string(),
            reason: format!("{e}"),
        })?;
    if message.kind() == super::types::MessageKind::Invalid {
        return Err(McpError::FrameDecodeError {
            server: server.to_string(),
            reason: "record has neither id nor method".into(),
        });
    }
    Ok(message)
}

/// Serialize a message into one terminated record.
pub fn encode(server: &str, message: &JsonRpcMessage) -> Result<Vec<u8>, McpError> {
    let mut bytes = serde_json::to_vec(message).map_err(|e| McpError::TransportError {
        server: server.to_string(),
        reason: format!("failed to serialize message: {e}"),
    })?;
    bytes.push(b'\n');
    Ok(bytes)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = concat!(
        r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#,
        "\n",
        r#"{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info"}}"#,
        "\n",
        r#"{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"a\nb"}]}}"#,
        "\n",
    );

    fn expected() -> Vec<Vec<u8>> {
        STREAM.lines().map(|line| line.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_single_chunk_multiple_records() {
        let mut codec = FrameCodec::new();
        assert_eq!(codec.feed(STREAM.as_bytes()), expected());
        assert!(codec.remainder().is_empty());
    }

    #[test]
    fn test_every_split_point_reconstructs_stream() {
        let bytes = STREAM.as_bytes();
        for split in 0..=bytes.len() {
            let mut codec = FrameCodec::new();
            let mut records = codec.feed(&bytes[..split]);
            records.extend(codec.feed(&bytes[split..]));
            assert_eq!(records, expected(), "split at {split}");
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut codec = FrameCodec::new();
        let mut records = Vec::new();
        for b in STREAM.as_bytes() {
            records.extend(codec.feed(std::slice::from_ref(b)));
        }
        assert_eq!(records, expected());
    }

    #[test]
    fn test_chunk_without_terminator_is_retained() {
        let mut codec = FrameCodec::new();
        assert!(codec.feed(br#"{"jsonrpc":"2.0","#).is_empty());
        assert_eq!(codec.remainder(), br#"{"jsonrpc":"2.0","#);
        let records = codec.feed(b"\"id\":7,\"result\":null}\n");
        assert_eq!(records.len(), 1);
        assert!(codec.remainder().is_empty());
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let mut codec = FrameCodec::new();
        let records = codec.feed(b"\r\n\n{\"id\":1,\"result\":1}\r\n  \n");
        assert_eq!(records, vec![b"{\"id\":1,\"result\":1}".to_vec()]);
    }

    #[test]
    fn test_oversized_record_is_discarded() {
        let mut codec = FrameCodec::with_max_frame(16);
        assert!(codec.feed(&[b'x'; 40]).is_empty());
        assert!(codec.remainder().is_empty());
        // The tail of the oversized record is skipped, the next one survives.
        let records = codec.feed(b"xxxx\n{\"id\":1,\"result\":2}\n");
        assert_eq!(records, vec![b"{\"id\":1,\"result\":2}".to_vec()]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode("srv", b"starting server on stdio...").unwrap_err();
        assert!(matches!(err, McpError::FrameDecodeError { .. }));
        let err = decode("srv", br#"{"hello":"world"}"#).unwrap_err();
        assert!(matches!(err, McpError::FrameDecodeError { .. }));
    }

    #[test]
    fn test_invalid_utf8_record_is_rejected() {
        let mut codec = FrameCodec::new();
        let mut stream = b"{\"jsonrpc\":\"2.0\",\"method\":\"x\",\"params\":{\"t\":\"".to_vec();
        stream.extend_from_slice(&[0xff, 0xfe]);
        stream.extend_from_slice(b"\"}}\n{\"id\":3,\"result\":null}\n");

        let records = codec.feed(&stream);
        assert_eq!(records.len(), 2);
        let err = decode("srv", &records[0]).unwrap_err();
        assert!(err.to_string().contains("UTF-8"));
        assert!(decode("srv", &records[1]).is_ok());
    }

    #[test]
    fn test_encode_terminates_record() {
        let msg = JsonRpcMessage::notification("notifications/initialized", None);
        let bytes = encode("srv", &msg).unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));
        let mut codec = FrameCodec::new();
        let records = codec.feed(&bytes);
        let back = decode("srv", &records[0]).unwrap();
        assert_eq!(back.method.as_deref(), Some("notifications/initialized"));
    }
}
