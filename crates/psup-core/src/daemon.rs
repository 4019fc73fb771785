//! Daemon lifecycle: startup, resurrect-on-start, scanners, graceful and
//! reboot shutdown.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::api::{ProcessInfo, Request, Response};
use crate::config::DaemonConfig;
use crate::metrics::{spawn_listener_scanner, spawn_sampler};
use crate::probe::{SystemProbe, platform_probe};
use crate::registry::Registry;
use crate::server::{ControlServer, Dispatcher};
use crate::store::StateStore;
use crate::util::format_size;

/// How a shutdown was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownKind {
    /// Signal or `kill`: stop everything, then dump.
    Graceful,
    /// `reboot`: the dump was written while processes were still online,
    /// so the post-stop rewrite is skipped.
    Reboot,
}

/// One-shot shutdown latch shared by the dispatcher, the signal handler,
/// and the main loop. The first request wins.
pub struct ShutdownSignal {
    state: Mutex<Option<ShutdownKind>>,
    cond: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    pub fn request(&self, kind: ShutdownKind) {
        let mut state = self.state.lock().unwrap();
        if state.is_none() {
            *state = Some(kind);
        }
        self.cond.notify_all();
    }

    pub fn requested(&self) -> Option<ShutdownKind> {
        *self.state.lock().unwrap()
    }

    /// Blocks until a shutdown is requested.
    pub fn wait(&self) -> ShutdownKind {
        let state = self.state.lock().unwrap();
        let state = self.cond.wait_while(state, |s| s.is_none()).unwrap();
        state.unwrap_or(ShutdownKind::Graceful)
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Receives the process list and daemon uptime once per sampler tick.
/// Implemented by the out-of-process telemetry emitter.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, processes: &[ProcessInfo], daemon_uptime: Duration);
}

/// In-process view of the daemon handed to host frontends (e.g. an HTTP
/// adapter re-exposing the same operations).
#[derive(Clone)]
pub struct DaemonHandle {
    dispatcher: Arc<Dispatcher>,
}

impl DaemonHandle {
    pub fn handle_request(&self, req: &Request) -> Response {
        self.dispatcher.dispatch(req)
    }

    pub fn process_count(&self) -> usize {
        self.dispatcher.registry().count()
    }

    pub fn uptime(&self) -> Duration {
        self.dispatcher.uptime()
    }

    pub fn pid(&self) -> u32 {
        std::process::id()
    }

    pub fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

/// Error type for fatal startup failures.
#[derive(Debug)]
pub enum DaemonError {
    CreateHome(io::Error),
    WritePid(io::Error),
    Bind(io::Error),
}

impl std::fmt::Display for DaemonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonError::CreateHome(e) => write!(f, "cannot create home directory: {}", e),
            DaemonError::WritePid(e) => write!(f, "cannot write pid file: {}", e),
            DaemonError::Bind(e) => write!(f, "cannot bind control socket: {}", e),
        }
    }
}

impl std::error::Error for DaemonError {}

/// The supervisor: registry, state store, dispatcher, and the periodic
/// scanners, tied to one home directory.
pub struct Daemon {
    config: DaemonConfig,
    registry: Arc<Registry>,
    store: Arc<StateStore>,
    dispatcher: Arc<Dispatcher>,
    shutdown: Arc<ShutdownSignal>,
    probe: Arc<dyn SystemProbe>,
}

impl Daemon {
    pub fn new(config: DaemonConfig) -> Self {
        let registry = Arc::new(Registry::new());
        let store = Arc::new(StateStore::new(config.dump_path()));
        let shutdown = Arc::new(ShutdownSignal::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            config.clone(),
            Arc::clone(&shutdown),
        ));

        Self {
            config,
            registry,
            store,
            dispatcher,
            shutdown,
            probe: platform_probe(),
        }
    }

    /// Replaces the platform probe (tests, unusual platforms).
    pub fn with_probe(mut self, probe: Arc<dyn SystemProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Shared latch for signal handlers: `request(Graceful)` on SIGTERM/SIGINT.
    pub fn shutdown_signal(&self) -> Arc<ShutdownSignal> {
        Arc::clone(&self.shutdown)
    }

    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle {
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Runs the daemon until a shutdown is requested, then tears down.
    ///
    /// Startup order: home and log directories, pid file, banner, control
    /// socket, resurrect, scanners, accept loop.
    pub fn run(&self, telemetry: Option<Arc<dyn TelemetrySink>>) -> Result<(), DaemonError> {
        let started = Instant::now();

        std::fs::create_dir_all(&self.config.home).map_err(DaemonError::CreateHome)?;
        std::fs::create_dir_all(self.config.logs_dir()).map_err(DaemonError::CreateHome)?;
        self.write_pid_file().map_err(DaemonError::WritePid)?;

        self.banner();
        info!(
            "telemetry: {}",
            if telemetry.is_some() { "enabled" } else { "disabled" }
        );

        let server =
            Arc::new(ControlServer::bind(&self.config.socket_path()).map_err(DaemonError::Bind)?);

        let restored = self.dispatcher.resurrect();
        if !restored.is_empty() {
            info!("resurrected {} process(es) from dump", restored.len());
        }

        let running = Arc::new(AtomicBool::new(true));
        let sampler = spawn_sampler(
            Arc::clone(&self.registry),
            Arc::clone(&self.probe),
            &self.config,
            Arc::clone(&running),
            telemetry,
            started,
        );
        let scanner = spawn_listener_scanner(
            Arc::clone(&self.registry),
            Arc::clone(&self.probe),
            &self.config,
            Arc::clone(&running),
        );

        let acceptor = {
            let server = Arc::clone(&server);
            let dispatcher = Arc::clone(&self.dispatcher);
            std::thread::spawn(move || server.serve(dispatcher))
        };

        let kind = self.shutdown.wait();
        info!("shutdown requested ({:?})", kind);

        running.store(false, Ordering::SeqCst);
        server.shutdown();

        // Stop every managed process in parallel; each stop respects its
        // own kill timeout.
        let procs = self.registry.list();
        let stoppers: Vec<_> = procs
            .iter()
            .map(|p| {
                let p = Arc::clone(p);
                std::thread::spawn(move || p.stop())
            })
            .collect();
        for h in stoppers {
            let _ = h.join();
        }

        if kind == ShutdownKind::Graceful {
            if let Err(e) = self.store.save(&self.registry) {
                warn!("final state dump failed: {}", e);
            }
        }

        let _ = acceptor.join();
        let _ = sampler.join();
        let _ = scanner.join();

        server.remove_socket();
        let _ = std::fs::remove_file(self.config.pid_path());

        info!("shutdown complete");
        Ok(())
    }

    fn write_pid_file(&self) -> io::Result<()> {
        let mut f = std::fs::File::create(self.config.pid_path())?;
        writeln!(f, "{}", std::process::id())
    }

    fn banner(&self) {
        info!("psup {} starting", env!("CARGO_PKG_VERSION"));
        info!("pid: {}", std::process::id());
        info!(
            "config: {} ({})",
            self.config
                .config_file
                .as_ref()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_else(|| "none".to_string()),
            self.config.config_source
        );
        info!("home: {}", self.config.home.display());
        info!(
            "logs: {} (max {} x{} rotations per file)",
            self.config.logs_dir().display(),
            format_size(self.config.log_max_size),
            self.config.log_rotate
        );
    }
}
