//! OS-specific per-PID probing.
//!
//! Two operations are platform-dependent: reading (resident set, cumulative
//! CPU ticks) for a pid, and enumerating a pid's listening sockets. Both sit
//! behind [`SystemProbe`]; unsupported platforms fall back to a stub that
//! returns empty results without failing callers.

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "linux")]
pub use linux::ProcfsProbe;

use std::sync::Arc;

/// One metrics reading for a live pid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeSample {
    /// Resident set size in bytes.
    pub rss_bytes: u64,
    /// Cumulative CPU ticks (user + system).
    pub cpu_ticks: u64,
}

/// Error type for probe failures.
#[derive(Debug)]
pub enum ProbeError {
    /// Process disappeared during probing.
    ProcessGone(u32),
    /// I/O error reading accounting files.
    Io(std::io::Error),
    /// Parse error in accounting files.
    Parse(String),
}

impl std::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeError::ProcessGone(pid) => write!(f, "process {} disappeared", pid),
            ProbeError::Io(e) => write!(f, "I/O error: {}", e),
            ProbeError::Parse(msg) => write!(f, "parse error: {}", msg),
        }
    }
}

impl std::error::Error for ProbeError {}

impl From<std::io::Error> for ProbeError {
    fn from(e: std::io::Error) -> Self {
        ProbeError::Io(e)
    }
}

/// Per-PID accounting interface.
pub trait SystemProbe: Send + Sync {
    /// Whether the OS still reports the pid alive.
    fn alive(&self, pid: u32) -> bool;

    /// Reads resident set and cumulative CPU ticks for the pid.
    fn sample(&self, pid: u32) -> Result<ProbeSample, ProbeError>;

    /// OS clock ticks per second (USER_HZ).
    fn clock_ticks(&self) -> u64;

    /// Listening sockets of the pid, e.g. `tcp:0.0.0.0:8080`.
    fn listening_sockets(&self, pid: u32) -> Vec<String>;
}

/// Probe for the running platform.
#[cfg(target_os = "linux")]
pub fn platform_probe() -> Arc<dyn SystemProbe> {
    Arc::new(ProcfsProbe::new())
}

#[cfg(not(target_os = "linux"))]
pub fn platform_probe() -> Arc<dyn SystemProbe> {
    Arc::new(NullProbe)
}

/// Stub probe for unsupported platforms: assumes pids stay alive and
/// reports empty metrics.
pub struct NullProbe;

impl SystemProbe for NullProbe {
    fn alive(&self, _pid: u32) -> bool {
        true
    }

    fn sample(&self, _pid: u32) -> Result<ProbeSample, ProbeError> {
        Ok(ProbeSample::default())
    }

    fn clock_ticks(&self) -> u64 {
        100
    }

    fn listening_sockets(&self, _pid: u32) -> Vec<String> {
        Vec::new()
    }
}
