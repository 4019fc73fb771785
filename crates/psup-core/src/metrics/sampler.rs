//! Periodic scanners: CPU/memory sampling and listening-socket refresh.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, warn};

use crate::api::ProcessInfo;
use crate::config::DaemonConfig;
use crate::daemon::TelemetrySink;
use crate::probe::SystemProbe;
use crate::registry::Registry;

/// Spawns the metrics sampler.
///
/// On every tick it checks liveness of each online pid (sending a forceful
/// kill to the group when the OS reports the pid gone, so the monitor's
/// pending wait unblocks), refreshes CPU/memory, and every
/// `snapshot_every` ticks pushes one snapshot per registered process into
/// its ring. Probe errors are logged and never interrupt the cadence.
pub fn spawn_sampler(
    registry: Arc<Registry>,
    probe: Arc<dyn SystemProbe>,
    config: &DaemonConfig,
    running: Arc<AtomicBool>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    daemon_started: Instant,
) -> JoinHandle<()> {
    let interval = config.sample_interval;
    let snapshot_every = config.snapshot_every.max(1) as u64;

    std::thread::spawn(move || {
        let mut tick: u64 = 0;
        while running.load(Ordering::SeqCst) {
            tick += 1;
            let procs = registry.list();

            for p in &procs {
                let Some(pid) = p.online_pid() else { continue };

                if !probe.alive(pid) {
                    warn!(
                        "process '{}' (pid {}) died outside the supervisor, reaping group",
                        p.name, pid
                    );
                    p.force_kill_group();
                    continue;
                }
                match probe.sample(pid) {
                    Ok(s) => p.update_metrics(s.cpu_ticks, s.rss_bytes, probe.clock_ticks()),
                    Err(e) => debug!("metrics sample for '{}' failed: {}", p.name, e),
                }
            }

            if tick % snapshot_every == 0 {
                let ts = Utc::now().timestamp();
                for p in &procs {
                    registry.push_snapshot(&p.name, p.metrics_snapshot(ts));
                }
            }

            if let Some(sink) = &telemetry {
                let infos: Vec<ProcessInfo> = procs.iter().map(|p| p.info()).collect();
                sink.emit(&infos, daemon_started.elapsed());
            }

            sleep_with_checks(interval, &running);
        }
    })
}

/// Spawns the listening-socket scanner. The first pass runs immediately;
/// subsequent passes follow `listener_interval`.
pub fn spawn_listener_scanner(
    registry: Arc<Registry>,
    probe: Arc<dyn SystemProbe>,
    config: &DaemonConfig,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    let interval = config.listener_interval;

    std::thread::spawn(move || {
        while running.load(Ordering::SeqCst) {
            for p in registry.list() {
                if let Some(pid) = p.online_pid() {
                    p.set_listeners(probe.listening_sockets(pid));
                }
            }
            sleep_with_checks(interval, &running);
        }
    })
}

/// Sleeps in short slices so shutdown is observed promptly.
fn sleep_with_checks(total: Duration, running: &AtomicBool) {
    let slice = Duration::from_millis(100);
    let mut remaining = total;
    while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
        let nap = remaining.min(slice);
        std::thread::sleep(nap);
        remaining = remaining.saturating_sub(nap);
    }
}
