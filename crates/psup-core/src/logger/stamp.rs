//! Timestamp line-framer over a rotating writer.

use std::io;
use std::sync::Arc;

use chrono::Local;

use super::RotatingWriter;

/// Strftime pattern producing ISO-8601 with millisecond precision and a
/// fractional timezone offset, e.g. `2026-08-01T09:15:42.123+02:00`.
const STAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%:z";

/// Frames a byte stream into timestamped lines.
///
/// Bytes without a trailing newline are buffered until the next newline
/// arrives; the combined line is then stamped and written as a single call
/// to the underlying writer. `write` always reports the full input length.
pub struct LineStamper {
    writer: Arc<RotatingWriter>,
    buf: Vec<u8>,
}

impl LineStamper {
    pub fn new(writer: Arc<RotatingWriter>) -> Self {
        Self {
            writer,
            buf: Vec::new(),
        }
    }

    /// Appends `data`, emitting one stamped line per completed newline.
    pub fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let rest = self.buf.split_off(pos + 1);
            let line = std::mem::replace(&mut self.buf, rest);
            self.emit(&line)?;
        }

        Ok(data.len())
    }

    /// Flushes a buffered partial line, terminating it with a newline.
    /// Called when the producing stream reaches end-of-file.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let mut line = std::mem::take(&mut self.buf);
        line.push(b'\n');
        self.emit(&line)
    }

    fn emit(&self, line: &[u8]) -> io::Result<()> {
        let stamp = Local::now().format(STAMP_FORMAT).to_string();
        let mut out = Vec::with_capacity(stamp.len() + 1 + line.len());
        out.extend_from_slice(stamp.as_bytes());
        out.push(b' ');
        out.extend_from_slice(line);
        self.writer.write(&out)?;
        Ok(())
    }
}

impl Drop for LineStamper {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}
