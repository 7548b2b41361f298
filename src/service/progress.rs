//! Download progress snapshots and the NDJSON decoder producing them

use serde::Deserialize;
use tracing::debug;

/// Status phrase that ends a pull successfully
pub const SUCCESS_STATUS: &str = "success";

/// One progress snapshot of an asset download
#[derive(Debug, Clone, PartialEq)]
pub struct PullProgress {
    /// Phase reported by the service ("pulling manifest", "verifying digest", ...)
    pub status: String,
    /// Bytes downloaded so far
    pub completed: u64,
    /// Bytes expected in total
    pub total: u64,
    /// `completed / total` as a percentage; 0 when the total is unknown
    pub percent: f64,
}

impl PullProgress {
    pub fn new(status: impl Into<String>, completed: u64, total: u64) -> Self {
        let percent = if total == 0 {
            0.0
        } else {
            (completed as f64 / total as f64 * 100.0).min(100.0)
        };
        Self {
            status: status.into(),
            completed,
            total,
            percent,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SUCCESS_STATUS
    }
}

/// What one decoded NDJSON object means to the caller
#[derive(Debug, Clone, PartialEq)]
pub enum PullMessage {
    Progress(PullProgress),
    /// The service reported an error; the pull is over
    Failed(String),
}

#[derive(Debug, Deserialize)]
struct PullLine {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    completed: Option<u64>,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

/// Incremental decoder for a newline-delimited JSON body
///
/// Chunks may split lines anywhere, including inside a multi-byte
/// character, so bytes are buffered until a newline arrives.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning the messages of every line it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<PullMessage> {
        self.buffer.extend_from_slice(chunk);

        let mut messages = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            messages.extend(decode_line(&line));
        }
        messages
    }

    /// Decode whatever is left once the body has ended
    pub fn finish(&mut self) -> Vec<PullMessage> {
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&rest).into_iter().collect()
    }
}

fn decode_line(bytes: &[u8]) -> Option<PullMessage> {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let line: PullLine = match serde_json::from_str(text) {
        Ok(line) => line,
        Err(e) => {
            debug!(error = %e, "skipping malformed progress line");
            return None;
        }
    };

    if let Some(error) = line.error {
        return Some(PullMessage::Failed(error));
    }

    Some(PullMessage::Progress(PullProgress::new(
        line.status.unwrap_or_default(),
        line.completed.unwrap_or(0),
        line.total.unwrap_or(0),
    )))
}
