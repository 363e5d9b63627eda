//! SSE (Server-Sent Events) framing for streamed completions.
//!
//! Providers stream lines like:
//!
//! ```text
//! data: {"candidates":[{"content":{"parts":[{"text":"Hello"}]}}]}
//!
//! data: {"candidates":[{"content":{"parts":[{"text":" world"}]},"finishReason":"STOP"}]}
//! ```
//!
//! [`LineBuffer`] turns arbitrary byte chunks into complete lines and
//! [`data_payload`] extracts the payload of a `data:` line.

/// Sentinel some providers send instead of a final JSON object.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Payload of a `data:` line, or `None` for blank lines, comments,
/// other fields and empty payloads.
pub fn data_payload(line: &str) -> Option<&str> {
    let line = line.trim_end();

    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    let payload = line.strip_prefix("data:")?.trim_start();
    if payload.is_empty() {
        None
    } else {
        Some(payload)
    }
}

/// Accumulates raw bytes and hands out complete `\n`-terminated lines.
///
/// Works on bytes so a multi-byte character split across two network
/// chunks is decoded only once it is whole.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Next complete line, without its terminator.
    pub fn next_line(&mut self) -> Option<String> {
        let newline = self.pending.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=newline).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Whatever is left once the byte stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&rest).into_owned();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}
