//! Incremental Server-Sent Events parser.

/// Buffers raw bytes and yields the `data:` payload of each complete event.
/// Events are separated by a blank line; carriage returns are dropped so
/// CRLF streams parse the same as LF ones, even when a CRLF pair is split
/// across chunks.
///
/// Decoding happens per event, so a multi-byte character split between
/// network chunks is reassembled before it is turned into text.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the data of every event it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend(chunk.iter().copied().filter(|&b| b != b'\r'));
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let event: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            if let Some(data) = Self::event_data(&String::from_utf8_lossy(&event)) {
                events.push(data);
            }
        }

        events
    }

    /// Data of a trailing event the server did not terminate with a blank
    /// line. Call once the byte stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        Self::event_data(&String::from_utf8_lossy(&rest))
    }

    /// Join the `data:` lines of one event. Comments and other fields are ignored.
    fn event_data(event: &str) -> Option<String> {
        let parts: Vec<&str> = event
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(str::trim_start)
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }

    pub fn has_pending(&self) -> bool {
        self.buffer.iter().any(|b| !b.is_ascii_whitespace())
    }
}
