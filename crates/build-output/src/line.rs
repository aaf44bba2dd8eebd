//! Reassembly of arbitrarily chunked process output into logical lines.

use std::sync::OnceLock;

use regex::Regex;

/// Erase-to-end-of-line sequence cargo writes when it redraws its progress bar.
pub const ERASE_LINE: &str = "\x1b[K";

static ANSI_RE: OnceLock<Regex> = OnceLock::new();

fn ansi_re() -> &'static Regex {
    ANSI_RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").unwrap())
}

/// Accumulates raw bytes and yields complete lines.
///
/// `\n`, `\r\n` and a bare `\r` all terminate a line, including a `\r\n`
/// pair split across two chunks. Splitting happens on bytes, so a chunk
/// boundary inside a multi-byte character is harmless.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    last_was_cr: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, terminators removed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            match byte {
                b'\n' if self.last_was_cr => self.last_was_cr = false,
                b'\n' => lines.push(self.take()),
                b'\r' => {
                    lines.push(self.take());
                    self.last_was_cr = true;
                }
                other => {
                    self.last_was_cr = false;
                    self.pending.push(other);
                }
            }
        }
        lines
    }

    /// Return the unterminated tail, if any. Call at end of stream.
    pub fn flush(&mut self) -> Option<String> {
        self.last_was_cr = false;
        if self.pending.is_empty() {
            return None;
        }
        Some(self.take())
    }

    fn take(&mut self) -> String {
        let bytes = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Drop transient progress text: only the segment after the last erase code survives.
pub fn strip_progress(line: &str) -> &str {
    line.rsplit(ERASE_LINE).next().unwrap_or(line)
}

/// Remove remaining ANSI escape sequences (colors, cursor movement).
pub fn strip_ansi(line: &str) -> String {
    ansi_re().replace_all(line, "").into_owned()
}
