//! Size-rotated append-only log writer.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Append-only writer with size-triggered rollover.
///
/// When a write would push the live file past `max_size`, rotated siblings
/// shift `path.N -> path.(N+1)` up to `depth` (the oldest is dropped), the
/// live file becomes `path.1`, and a fresh live file is opened. Writes from
/// multiple producers are serialised internally.
pub struct RotatingWriter {
    path: PathBuf,
    inner: Mutex<Inner>,
}

struct Inner {
    file: File,
    written: u64,
    max_size: u64,
    depth: u32,
}

impl RotatingWriter {
    /// Opens (or creates) the live file in append mode. The parent directory
    /// must already exist.
    pub fn open(path: impl Into<PathBuf>, max_size: u64, depth: u32) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();

        Ok(Self {
            path,
            inner: Mutex::new(Inner {
                file,
                written,
                max_size,
                depth,
            }),
        })
    }

    /// Path of the live log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `buf` as one operating-system write, rotating first when the
    /// write would exceed the configured maximum.
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().unwrap();

        if inner.written > 0 && inner.written + buf.len() as u64 > inner.max_size {
            self.rotate(&mut inner)?;
        }

        inner.file.write_all(buf)?;
        inner.written += buf.len() as u64;
        Ok(buf.len())
    }

    /// Discards the contents of the live file. Rotated siblings are kept.
    pub fn truncate(&self) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.file.set_len(0)?;
        inner.written = 0;
        Ok(())
    }

    fn rotate(&self, inner: &mut Inner) -> io::Result<()> {
        inner.file.flush()?;

        if inner.depth == 0 {
            // No siblings configured: start over in place.
            inner.file.set_len(0)?;
            inner.written = 0;
            return Ok(());
        }

        // Shift path.N -> path.(N+1), dropping the oldest.
        for n in (1..inner.depth).rev() {
            let from = sibling(&self.path, n);
            let to = sibling(&self.path, n + 1);
            if from.exists() {
                std::fs::rename(&from, &to)?;
            }
        }
        std::fs::rename(&self.path, sibling(&self.path, 1))?;

        inner.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        inner.written = 0;
        Ok(())
    }
}

fn sibling(path: &Path, n: u32) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(format!(".{}", n));
    PathBuf::from(s)
}
