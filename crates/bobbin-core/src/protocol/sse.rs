//! Buffered decoder for the provider's `event:`/`data:` stream framing
//!
//! Network reads hand the decoder arbitrary byte chunks; it emits one
//! [`SseEvent`] per complete blank-line-terminated block. Blocks split
//! across chunks and UTF-8 sequences split across chunk boundaries are
//! both carried over to the next `feed` call.

/// A parsed event block from the stream
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    /// Value of the `event:` field, when present
    pub event_type: Option<String>,
    /// Joined `data:` payload
    pub data: String,
}

impl SseEvent {
    /// Create an event with type and data (test convenience)
    pub fn with_type(event_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event_type: Some(event_type.into()),
            data: data.into(),
        }
    }
}

/// Buffered SSE decoder tolerant of partial chunks
///
/// Wire format:
/// ```text
/// event: event_type\n
/// data: json_payload\n
/// \n
/// ```
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Accumulated text that has not yet formed a complete block
    buffer: String,
    /// Trailing bytes of an incomplete UTF-8 sequence from the last chunk
    incomplete_utf8: Vec<u8>,
}

impl SseDecoder {
    /// Create a new decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and collect every event completed by them
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let bytes = if self.incomplete_utf8.is_empty() {
            chunk.to_vec()
        } else {
            let mut joined = std::mem::take(&mut self.incomplete_utf8);
            joined.extend_from_slice(chunk);
            joined
        };

        let (text, remainder) = split_utf8_remainder(&bytes);
        self.incomplete_utf8 = remainder;
        self.buffer.push_str(&text);

        let mut events = Vec::new();
        while let Some(end) = self.block_boundary() {
            let block: String = self.buffer.drain(..end).collect();
            self.skip_delimiter();
            if let Some(event) = parse_block(&block) {
                events.push(event);
            }
        }
        events
    }

    /// Drop any buffered state
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.incomplete_utf8.clear();
    }

    /// Check whether unconsumed data is buffered
    pub fn has_remaining(&self) -> bool {
        !self.buffer.is_empty() || !self.incomplete_utf8.is_empty()
    }

    fn block_boundary(&self) -> Option<usize> {
        self.buffer
            .find("\n\n")
            .or_else(|| self.buffer.find("\r\n\r\n"))
    }

    fn skip_delimiter(&mut self) {
        while self.buffer.starts_with('\n') || self.buffer.starts_with('\r') {
            self.buffer.remove(0);
        }
    }
}

/// Split bytes into their decodable text and a trailing remainder of at
/// most one truncated character
///
/// Invalid sequences mid-stream can never be completed by a later chunk
/// and are dropped; only a truncated tail is carried over.
fn split_utf8_remainder(bytes: &[u8]) -> (String, Vec<u8>) {
    let mut text = String::new();
    let mut rest = bytes;
    loop {
        match std::str::from_utf8(rest) {
            Ok(tail) => {
                text.push_str(tail);
                return (text, Vec::new());
            }
            Err(err) => {
                let valid = err.valid_up_to();
                text.push_str(std::str::from_utf8(&rest[..valid]).unwrap_or_default());
                match err.error_len() {
                    None => return (text, rest[valid..].to_vec()),
                    Some(len) => {
                        tracing::warn!(dropped = len, "dropping invalid UTF-8 bytes from stream");
                        rest = &rest[valid + len..];
                    }
                }
            }
        }
    }
}

/// Parse a single `event:`/`data:` block; returns `None` for data-less blocks
fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event_type: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        let line = line.trim_start();
        if line.is_empty() {
            continue;
        }
        if let Some(value) = line.strip_prefix("event:") {
            event_type = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim_start());
        }
        // other fields (id:, retry:, comments) are ignored
    }

    if data_lines.is_empty() {
        return None;
    }

    Some(SseEvent {
        event_type,
        data: data_lines.join("\n"),
    })
}
