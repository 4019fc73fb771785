//! Managed process: declared configuration, live status, and the
//! operator-facing lifecycle operations (`start`, `stop`, `restart`).

pub mod policy;

mod monitor;

pub use policy::{ExitDecision, RestartMode, RestartPolicy, classify_exit};

use std::collections::HashMap;
use std::io::{self, ErrorKind, Read};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Instant;

use chrono::Utc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::{ProcessInfo, RunningInfo};
use crate::logger::{LineStamper, RotatingWriter};
use crate::metrics::MetricsSnapshot;

/// Process states. `stopped` is the initial state and the terminal state
/// for clean non-restarting exits; `errored` is terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Stopped,
    Online,
    Errored,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Stopped => "stopped",
            Status::Online => "online",
            Status::Errored => "errored",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How to launch the child: command path, optional interpreter, arguments,
/// working directory, and environment merged over the inherited one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub command: String,
    #[serde(default)]
    pub interpreter: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Where and how the child's output is logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSpec {
    pub out_path: PathBuf,
    pub err_path: PathBuf,
    pub max_size: u64,
    pub rotate: u32,
}

/// Error type for launch failures.
#[derive(Debug)]
pub enum SpawnError {
    AlreadyOnline(String),
    LogOpen(io::Error),
    Spawn(io::Error),
}

impl std::fmt::Display for SpawnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpawnError::AlreadyOnline(name) => write!(f, "process '{}' is already online", name),
            SpawnError::LogOpen(e) => write!(f, "failed to open log file: {}", e),
            SpawnError::Spawn(e) => write!(f, "failed to spawn process: {}", e),
        }
    }
}

impl std::error::Error for SpawnError {}

/// Mutable fields of a managed process, guarded by its own mutex.
pub(crate) struct ProcState {
    pub(crate) spec: ProcessSpec,
    pub(crate) policy: RestartPolicy,
    pub(crate) logs: LogSpec,
    pub(crate) status: Status,
    pub(crate) reason: String,
    pub(crate) pid: u32,
    pub(crate) restarts: u32,
    pub(crate) exit_code: Option<i32>,
    pub(crate) started_at: Option<Instant>,
    pub(crate) created_at: i64,
    /// Set by `stop`/`delete` so the monitor classifies the next exit as
    /// operator-initiated rather than a failure.
    pub(crate) stopping: bool,
    /// Set by `delete`; the monitor must never re-spawn a retired process.
    pub(crate) retired: bool,
    /// True while a monitor thread is responsible for this process.
    pub(crate) monitor_live: bool,
    pub(crate) cpu: f64,
    pub(crate) memory: u64,
    pub(crate) listeners: Vec<String>,
    pub(crate) cpu_ticks: u64,
    pub(crate) cpu_sampled_at: Option<Instant>,
    pub(crate) out_writer: Option<Arc<RotatingWriter>>,
    pub(crate) err_writer: Option<Arc<RotatingWriter>>,
}

/// One declared program. The registry owns the `Arc`; the monitor holds a
/// clone for the lifetime of the current child.
pub struct ManagedProcess {
    pub id: u64,
    pub name: String,
    pub(crate) state: Mutex<ProcState>,
    /// Signalled on every monitor hand-off and wake-up request.
    pub(crate) events: Condvar,
}

impl ManagedProcess {
    pub fn new(id: u64, name: String, spec: ProcessSpec, policy: RestartPolicy, logs: LogSpec) -> Self {
        Self {
            id,
            name,
            state: Mutex::new(ProcState {
                spec,
                policy,
                logs,
                status: Status::Stopped,
                reason: String::new(),
                pid: 0,
                restarts: 0,
                exit_code: None,
                started_at: None,
                created_at: Utc::now().timestamp(),
                stopping: false,
                retired: false,
                monitor_live: false,
                cpu: 0.0,
                memory: 0,
                listeners: Vec::new(),
                cpu_ticks: 0,
                cpu_sampled_at: None,
                out_writer: None,
                err_writer: None,
            }),
            events: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProcState> {
        self.state.lock().unwrap()
    }

    /// Launches the child and hands it to a fresh monitor.
    ///
    /// Fails without state change when the process is already online or the
    /// launch itself fails; log files opened during a failed attempt are
    /// closed again.
    pub fn spawn(self: &Arc<Self>) -> Result<(), SpawnError> {
        let mut st = self.lock();
        if st.status == Status::Online {
            return Err(SpawnError::AlreadyOnline(self.name.clone()));
        }
        // A previous monitor may still be sleeping out a restart delay;
        // wake it and wait for the hand-off before re-spawning.
        if st.monitor_live {
            st.stopping = true;
            self.events.notify_all();
            st = self.events.wait_while(st, |s| s.monitor_live).unwrap();
        }
        st.stopping = false;

        let child = launch(&mut st)?;
        st.monitor_live = true;
        monitor::spawn_monitor(Arc::clone(self), child);
        Ok(())
    }

    /// Stops the child: polite terminate to the process group, escalation
    /// to a forceful kill after the policy's kill timeout. No-op when
    /// nothing is running. Always waits for the monitor's hand-off.
    pub fn stop(&self) {
        let mut st = self.lock();
        if st.status == Status::Online {
            st.stopping = true;
            let pid = st.pid;
            let timeout = st.policy.kill_timeout;
            let _ = signal::killpg(Pid::from_raw(pid as i32), Signal::SIGTERM);

            let (guard, result) = self
                .events
                .wait_timeout_while(st, timeout, |s| s.monitor_live)
                .unwrap();
            st = guard;
            if result.timed_out() && st.monitor_live {
                debug!("process '{}' ignored SIGTERM, escalating to SIGKILL", self.name);
                let _ = signal::killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
                let _st = self.events.wait_while(st, |s| s.monitor_live).unwrap();
            }
        } else if st.monitor_live {
            // Monitor is sleeping out a restart delay; wake it and let it
            // settle into `stopped` instead of re-spawning.
            st.stopping = true;
            self.events.notify_all();
            let _st = self.events.wait_while(st, |s| s.monitor_live).unwrap();
        }
    }

    /// `stop`, reset the restart counter, `spawn`.
    pub fn restart(self: &Arc<Self>) -> Result<(), SpawnError> {
        self.stop();
        self.lock().restarts = 0;
        self.spawn()
    }

    /// Marks the process deleted, stops it, and releases the log writers.
    pub fn retire(&self) {
        self.lock().retired = true;
        self.stop();
        let mut st = self.lock();
        st.out_writer = None;
        st.err_writer = None;
    }

    /// Forceful kill of the recorded process group. Used by the sampler's
    /// external-death path; the monitor's pending wait then unblocks and
    /// runs the normal exit classification.
    pub fn force_kill_group(&self) {
        let st = self.lock();
        if st.status == Status::Online && st.pid > 0 {
            let _ = signal::killpg(Pid::from_raw(st.pid as i32), Signal::SIGKILL);
        }
    }

    pub fn status(&self) -> Status {
        self.lock().status
    }

    /// The pid, when currently online.
    pub fn online_pid(&self) -> Option<u32> {
        let st = self.lock();
        (st.status == Status::Online && st.pid > 0).then_some(st.pid)
    }

    pub fn log_paths(&self) -> (PathBuf, PathBuf) {
        let st = self.lock();
        (st.logs.out_path.clone(), st.logs.err_path.clone())
    }

    /// Launch spec, policy, log spec, and status for persistence.
    pub fn persist_view(&self) -> (ProcessSpec, RestartPolicy, LogSpec, Status) {
        let st = self.lock();
        (st.spec.clone(), st.policy.clone(), st.logs.clone(), st.status)
    }

    /// Folds one probe reading into the CPU/memory fields. The first sample
    /// after a spawn reports zero CPU (no prior tick cursor).
    pub fn update_metrics(&self, cpu_ticks: u64, rss_bytes: u64, clk_tck: u64) {
        let mut st = self.lock();
        if st.status != Status::Online {
            return;
        }
        let now = Instant::now();
        st.cpu = match st.cpu_sampled_at {
            Some(prev) => {
                let elapsed = now.duration_since(prev).as_secs_f64();
                if elapsed > 0.0 && cpu_ticks >= st.cpu_ticks && clk_tck > 0 {
                    ((cpu_ticks - st.cpu_ticks) as f64 / elapsed / clk_tck as f64 * 100.0).max(0.0)
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        st.cpu_ticks = cpu_ticks;
        st.cpu_sampled_at = Some(now);
        st.memory = rss_bytes;
    }

    pub fn set_listeners(&self, listeners: Vec<String>) {
        let mut st = self.lock();
        if st.status == Status::Online {
            st.listeners = listeners;
        }
    }

    /// One metrics snapshot of the current state.
    pub fn metrics_snapshot(&self, ts: i64) -> MetricsSnapshot {
        let st = self.lock();
        MetricsSnapshot {
            ts,
            cpu: st.cpu,
            memory: st.memory,
            restarts: st.restarts,
            status: st.status,
            uptime: uptime_secs(&st),
        }
    }

    /// Truncates both live log files. Works whether or not writers are
    /// currently open.
    pub fn flush_logs(&self) -> io::Result<()> {
        let (out_w, err_w, out_p, err_p) = {
            let st = self.lock();
            (
                st.out_writer.clone(),
                st.err_writer.clone(),
                st.logs.out_path.clone(),
                st.logs.err_path.clone(),
            )
        };
        match out_w {
            Some(w) => w.truncate()?,
            None => truncate_file(&out_p)?,
        }
        match err_w {
            Some(w) => w.truncate()?,
            None => truncate_file(&err_p)?,
        }
        Ok(())
    }

    pub fn info(&self) -> ProcessInfo {
        let st = self.lock();
        ProcessInfo {
            id: self.id,
            name: self.name.clone(),
            command: st.spec.command.clone(),
            args: st.spec.args.clone(),
            interpreter: st.spec.interpreter.clone(),
            cwd: st.spec.cwd.clone(),
            status: st.status.to_string(),
            reason: st.reason.clone(),
            pid: st.pid,
            restarts: st.restarts,
            exit_code: st.exit_code,
            uptime: uptime_secs(&st),
            cpu: st.cpu,
            memory: st.memory,
            listeners: st.listeners.clone(),
            autorestart: st.policy.mode.to_string(),
            created_at: st.created_at,
        }
    }

    pub fn running_info(&self) -> RunningInfo {
        let st = self.lock();
        RunningInfo {
            name: self.name.clone(),
            running: st.status == Status::Online,
            status: st.status.to_string(),
            pid: st.pid,
            uptime: uptime_secs(&st),
            exit_code: st.exit_code,
            restarts: st.restarts,
        }
    }
}

fn uptime_secs(st: &ProcState) -> u64 {
    match (st.status, st.started_at) {
        (Status::Online, Some(at)) => at.elapsed().as_secs(),
        _ => 0,
    }
}

fn truncate_file(path: &std::path::Path) -> io::Result<()> {
    match std::fs::OpenOptions::new().write(true).truncate(true).open(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Opens the log writers and launches the OS child in a fresh process
/// group, recording the new live fields. Called with the state lock held
/// from both the `start` path and the monitor's re-spawn path.
pub(crate) fn launch(st: &mut ProcState) -> Result<Child, SpawnError> {
    if let Some(dir) = st.logs.out_path.parent() {
        std::fs::create_dir_all(dir).map_err(SpawnError::LogOpen)?;
    }
    let out = Arc::new(
        RotatingWriter::open(&st.logs.out_path, st.logs.max_size, st.logs.rotate)
            .map_err(SpawnError::LogOpen)?,
    );
    let err = Arc::new(
        RotatingWriter::open(&st.logs.err_path, st.logs.max_size, st.logs.rotate)
            .map_err(SpawnError::LogOpen)?,
    );

    let mut cmd = match &st.spec.interpreter {
        Some(interp) if !interp.is_empty() => {
            let mut c = Command::new(interp);
            c.arg(&st.spec.command);
            c
        }
        _ => Command::new(&st.spec.command),
    };
    cmd.args(&st.spec.args)
        .envs(&st.spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Own group so stop/kill reach the whole child tree.
        .process_group(0);
    if let Some(cwd) = &st.spec.cwd {
        cmd.current_dir(cwd);
    }

    // On failure the writers drop here, closing the files opened above.
    let mut child = cmd.spawn().map_err(SpawnError::Spawn)?;

    if let Some(stdout) = child.stdout.take() {
        spawn_pipe_reader(stdout, Arc::clone(&out));
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_pipe_reader(stderr, Arc::clone(&err));
    }

    st.pid = child.id();
    st.status = Status::Online;
    st.reason.clear();
    st.exit_code = None;
    st.started_at = Some(Instant::now());
    st.cpu = 0.0;
    st.memory = 0;
    st.cpu_ticks = 0;
    st.cpu_sampled_at = None;
    st.listeners.clear();
    st.out_writer = Some(out);
    st.err_writer = Some(err);
    Ok(child)
}

/// Copies one child pipe into a stamping writer until end-of-file.
fn spawn_pipe_reader<R: Read + Send + 'static>(mut src: R, writer: Arc<RotatingWriter>) {
    std::thread::spawn(move || {
        let mut stamper = LineStamper::new(writer);
        let mut buf = [0u8; 4096];
        loop {
            match src.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if stamper.write(&buf[..n]).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        // Dropping the stamper flushes a trailing partial line.
    });
}
