//! Bounded log of lines emitted in a terminal session

use chrono::{DateTime, Local};
use std::collections::VecDeque;

/// What produced a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Echo of the command being run
    Command,
    /// Standard output of a command
    Output,
    /// Standard error, or a failure reported by the session
    Error,
    /// Informational message from the session itself
    Info,
}

impl LineKind {
    /// One-character marker used in transcripts
    fn marker(&self) -> char {
        match self {
            LineKind::Command => '>',
            LineKind::Output => ' ',
            LineKind::Error => '!',
            LineKind::Info => '#',
        }
    }
}

/// One session line and when it arrived
#[derive(Debug, Clone)]
pub struct LogLine {
    pub content: String,
    pub timestamp: DateTime<Local>,
    pub kind: LineKind,
}

/// Session log that forgets its oldest lines past `capacity`
#[derive(Debug)]
pub struct LogBuffer {
    lines: VecDeque<LogLine>,
    capacity: usize,
    evicted: u64,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            evicted: 0,
        }
    }

    /// Append a line, evicting the oldest one at capacity
    pub fn push_line(&mut self, content: &str, kind: LineKind) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
            self.evicted += 1;
        }
        self.lines.push_back(LogLine {
            content: content.to_string(),
            timestamp: Local::now(),
            kind,
        });
    }

    /// Lines oldest first
    pub fn lines(&self) -> impl Iterator<Item = &LogLine> {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Lines lost to the capacity limit since the last clear
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.evicted = 0;
    }

    /// Plain-text transcript, one `[HH:MM:SS] <marker> <content>` per line
    pub fn transcript(&self) -> String {
        let mut out = String::new();
        if self.evicted > 0 {
            out.push_str(&format!("... {} earlier lines dropped\n", self.evicted));
        }
        for line in &self.lines {
            out.push_str(&format!(
                "[{}] {} {}\n",
                line.timestamp.format("%H:%M:%S"),
                line.kind.marker(),
                line.content
            ));
        }
        out
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(10_000)
    }
}
