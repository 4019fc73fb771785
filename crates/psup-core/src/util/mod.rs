//! Helper utilities: size/duration string parsing and log tail reading.

use std::path::Path;
use std::time::Duration;

/// Error type for size/duration string parsing failures.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub input: String,
    pub message: String,
}

impl ParseError {
    fn new(input: &str, message: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to parse '{}': {}", self.input, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Parses a human-readable size string (e.g., "1G", "500M", "1024K") into bytes.
///
/// Bare numbers pass through unchanged. Suffixes are case-insensitive.
pub fn parse_size(s: &str) -> Result<u64, ParseError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ParseError::new(s, "empty size string"));
    }

    let (num_str, multiplier) = match s.chars().last() {
        Some('G') | Some('g') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        Some('M') | Some('m') => (&s[..s.len() - 1], 1024 * 1024),
        Some('K') | Some('k') => (&s[..s.len() - 1], 1024),
        _ => (s, 1),
    };

    num_str
        .trim()
        .parse::<u64>()
        .map(|n| n * multiplier)
        .map_err(|e| ParseError::new(s, format!("invalid size: {}", e)))
}

/// Formats a byte count with a binary-unit suffix (`1.5M`, `512B`).
///
/// One decimal below 10 units, none above; keeps table columns narrow.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [(u64, &str); 3] = [(1 << 30, "G"), (1 << 20, "M"), (1 << 10, "K")];

    for (scale, suffix) in UNITS {
        if bytes >= scale {
            let value = bytes as f64 / scale as f64;
            return if value >= 10.0 {
                format!("{:.0}{}", value, suffix)
            } else {
                format!("{:.1}{}", value, suffix)
            };
        }
    }
    format!("{}B", bytes)
}

/// Parses a short-form duration string: `500ms`, `2s`, `5m`, `1h`.
///
/// A bare number is interpreted as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ParseError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ParseError::new(s, "empty duration string"));
    }

    let (num_str, unit_ms) = if let Some(num) = s.strip_suffix("ms") {
        (num, 1u64)
    } else if let Some(num) = s.strip_suffix('h') {
        (num, 3_600_000)
    } else if let Some(num) = s.strip_suffix('m') {
        (num, 60_000)
    } else if let Some(num) = s.strip_suffix('s') {
        (num, 1_000)
    } else {
        (s, 1_000)
    };

    num_str
        .trim()
        .parse::<u64>()
        .map(|n| Duration::from_millis(n.saturating_mul(unit_ms)))
        .map_err(|e| ParseError::new(s, format!("invalid duration: {}", e)))
}

/// Formats whole seconds as a compact uptime string (`3h12m`, `45s`).
pub fn format_uptime(secs: u64) -> String {
    if secs >= 86_400 {
        format!("{}d{}h", secs / 86_400, (secs % 86_400) / 3_600)
    } else if secs >= 3_600 {
        format!("{}h{}m", secs / 3_600, (secs % 3_600) / 60)
    } else if secs >= 60 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

/// Reads the last `n` lines of a file. Missing files yield an empty string.
///
/// Log files are bounded by the rotation cap, so reading the whole live file
/// and trimming in memory is acceptable.
pub fn read_last_lines(path: &Path, n: usize) -> std::io::Result<String> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
        Err(e) => return Err(e),
    };

    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    let mut out = lines[start..].join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_size_suffixes() {
        assert_eq!(parse_size("1M").unwrap(), 1024 * 1024);
        assert_eq!(parse_size("500K").unwrap(), 500 * 1024);
        assert_eq!(parse_size("10M").unwrap(), 10 * 1024 * 1024);
        assert_eq!(parse_size("2G").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("1m").unwrap(), 1024 * 1024);
    }

    #[test]
    fn test_parse_size_rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("abc").is_err());
        assert!(parse_size("12Q").is_err());
    }

    #[test]
    fn test_parse_duration_suffixes() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("ms").is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(2048), "2.0K");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0M");
        // The decimal drops once the value reaches two digits.
        assert_eq!(format_size(10 * 1024 * 1024), "10M");
        assert_eq!(format_size(512 * 1024 * 1024 * 1024), "512G");
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(42), "42s");
        assert_eq!(format_uptime(90), "1m30s");
        assert_eq!(format_uptime(3_720), "1h2m");
        assert_eq!(format_uptime(90_000), "1d1h");
    }

    #[test]
    fn test_read_last_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tail.log");
        let mut f = std::fs::File::create(&path).unwrap();
        for i in 0..10 {
            writeln!(f, "line {}", i).unwrap();
        }
        drop(f);

        let tail = read_last_lines(&path, 3).unwrap();
        assert_eq!(tail, "line 7\nline 8\nline 9\n");

        let all = read_last_lines(&path, 100).unwrap();
        assert!(all.starts_with("line 0\n"));
    }

    #[test]
    fn test_read_last_lines_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let tail = read_last_lines(&dir.path().join("nope.log"), 5).unwrap();
        assert_eq!(tail, "");
    }
}
