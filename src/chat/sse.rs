// Incremental decoder for text/event-stream bodies
// Only the data field matters to us; event, id and retry are accepted and ignored

use log::debug;

/// Feeds raw body chunks in, yields the data payload of each complete event.
#[derive(Debug, Default)]
pub struct SseDecoder {
    // Bytes not yet terminated by a line ending. Kept as bytes so a chunk
    // boundary inside a UTF-8 sequence is harmless.
    pending: Vec<u8>,
    data: Vec<String>,
    // The last line ended in CR; a LF at the start of the next chunk belongs to it
    after_cr: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk of the response body and return every event it completes.
    /// Lines may end in LF, CRLF or a bare CR.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut chunk = chunk;
        if self.after_cr && !chunk.is_empty() {
            self.after_cr = false;
            if chunk[0] == b'\n' {
                chunk = &chunk[1..];
            }
        }
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|&b| b == b'\n' || b == b'\r') {
            let end = start + offset;
            let line = String::from_utf8_lossy(&self.pending[start..end]).into_owned();
            start = end + 1;
            if self.pending[end] == b'\r' {
                match self.pending.get(start) {
                    Some(b'\n') => start += 1,
                    Some(_) => {}
                    None => self.after_cr = true,
                }
            }
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        self.pending.drain(..start);
        events
    }

    /// End of body. A trailing event without its closing blank line is
    /// incomplete and gets discarded.
    pub fn finish(&mut self) {
        if !self.pending.is_empty() || !self.data.is_empty() {
            debug!("Discarding unterminated event at end of stream");
        }
        self.pending.clear();
        self.data.clear();
        self.after_cr = false;
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        Some(payload)
    }
}
