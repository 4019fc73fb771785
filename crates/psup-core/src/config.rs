//! Daemon configuration: the home directory layout and tunables.
//!
//! The daemon is configured by flags; a richer config-file loader lives
//! outside the core and reports its origin through `config_file` /
//! `config_source` for the `ping` reply.

use std::path::PathBuf;
use std::time::Duration;

/// Default per-child log size cap.
pub const DEFAULT_LOG_MAX_SIZE: u64 = 10 * 1024 * 1024;
/// Default number of rotated log siblings per file.
pub const DEFAULT_LOG_ROTATE: u32 = 3;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Home directory holding the socket, pid file, dump file, and logs.
    pub home: PathBuf,
    /// Default size cap for per-child log files.
    pub log_max_size: u64,
    /// Default rotation depth for per-child log files.
    pub log_rotate: u32,
    /// Metrics sampler cadence.
    pub sample_interval: Duration,
    /// Sampler ticks between snapshot pushes (one per minute at 2s ticks).
    pub snapshot_every: u32,
    /// Listening-socket scanner cadence.
    pub listener_interval: Duration,
    /// Config file reported by `ping`, when one was used.
    pub config_file: Option<PathBuf>,
    /// Where the configuration came from (`"defaults"`, `"flags"`, ...).
    pub config_source: String,
}

impl DaemonConfig {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            log_max_size: DEFAULT_LOG_MAX_SIZE,
            log_rotate: DEFAULT_LOG_ROTATE,
            sample_interval: Duration::from_secs(2),
            snapshot_every: 30,
            listener_interval: Duration::from_secs(60),
            config_file: None,
            config_source: "defaults".to_string(),
        }
    }

    /// `$PSUP_HOME`, falling back to `~/.psup`, falling back to `./.psup`.
    pub fn default_home() -> PathBuf {
        if let Ok(home) = std::env::var("PSUP_HOME") {
            return PathBuf::from(home);
        }
        match std::env::var("HOME") {
            Ok(home) => PathBuf::from(home).join(".psup"),
            Err(_) => PathBuf::from(".psup"),
        }
    }

    pub fn socket_path(&self) -> PathBuf {
        self.home.join("daemon.sock")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.home.join("daemon.pid")
    }

    pub fn dump_path(&self) -> PathBuf {
        self.home.join("dump.json")
    }

    pub fn daemon_log_path(&self) -> PathBuf {
        self.home.join("daemon.log")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home.join("logs")
    }

    /// Stdout/stderr log paths for a child by name.
    pub fn log_paths_for(&self, name: &str) -> (PathBuf, PathBuf) {
        let dir = self.logs_dir();
        (
            dir.join(format!("{}-out.log", name)),
            dir.join(format!("{}-err.log", name)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let cfg = DaemonConfig::new("/tmp/psup-home");
        assert_eq!(cfg.socket_path(), PathBuf::from("/tmp/psup-home/daemon.sock"));
        assert_eq!(cfg.pid_path(), PathBuf::from("/tmp/psup-home/daemon.pid"));
        assert_eq!(cfg.dump_path(), PathBuf::from("/tmp/psup-home/dump.json"));
        assert_eq!(cfg.daemon_log_path(), PathBuf::from("/tmp/psup-home/daemon.log"));

        let (out, err) = cfg.log_paths_for("web");
        assert_eq!(out, PathBuf::from("/tmp/psup-home/logs/web-out.log"));
        assert_eq!(err, PathBuf::from("/tmp/psup-home/logs/web-err.log"));
    }
}
