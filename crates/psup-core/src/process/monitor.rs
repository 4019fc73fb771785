//! Per-process monitor: waits for the current child to exit and applies
//! the restart policy.

use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ExitStatus};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::policy::{ExitDecision, classify_exit};
use super::{ManagedProcess, ProcState, Status, launch};

/// Spawns the monitor thread for a freshly launched child.
///
/// The caller must have set `monitor_live` under the state lock before the
/// thread starts. The monitor owns the `Child` until it either classifies
/// a terminal exit or hands off to a re-spawn (which it then monitors in
/// turn); in every terminal path it clears `monitor_live` and notifies
/// waiters.
pub(crate) fn spawn_monitor(proc_: Arc<ManagedProcess>, child: Child) {
    std::thread::spawn(move || run(proc_, child));
}

fn run(proc_: Arc<ManagedProcess>, mut child: Child) {
    loop {
        let code = match child.wait() {
            Ok(status) => exit_code(status),
            Err(e) => {
                warn!("wait for '{}' failed: {}", proc_.name, e);
                -1
            }
        };

        let mut st = proc_.state.lock().unwrap();
        st.pid = 0;
        st.cpu = 0.0;
        st.memory = 0;
        st.listeners.clear();
        st.exit_code = Some(code);
        let ran_for = st.started_at.take().map(|t| t.elapsed()).unwrap_or_default();
        let stopping = std::mem::take(&mut st.stopping);

        if stopping || st.retired {
            st.status = Status::Stopped;
            st.reason = "stopped by operator".to_string();
            debug!("process '{}' stopped (exit code {})", proc_.name, code);
            return finish(&proc_, st);
        }

        match classify_exit(&st.policy, code, ran_for, st.restarts) {
            ExitDecision::Stop => {
                st.status = Status::Stopped;
                st.reason = format!("exited with code {}", code);
                info!("process '{}' exited with code {}, not restarting", proc_.name, code);
                return finish(&proc_, st);
            }
            ExitDecision::Fail => {
                st.status = Status::Errored;
                st.reason = format!("exit code {} after {} restarts", code, st.restarts);
                warn!(
                    "process '{}' errored: exit code {} after {} restarts",
                    proc_.name, code, st.restarts
                );
                return finish(&proc_, st);
            }
            ExitDecision::Restart { delay, reset_counter } => {
                if reset_counter {
                    st.restarts = 0;
                }
                st.status = Status::Stopped;
                st.reason = format!("restarting after exit code {}", code);
                info!(
                    "process '{}' exited with code {}, restarting in {:?}",
                    proc_.name, code, delay
                );

                // Sleep out the delay on the condvar so stop/delete can
                // wake the monitor instead of racing the re-spawn.
                let (guard, _timeout) = proc_
                    .events
                    .wait_timeout_while(st, delay, |s| !s.stopping && !s.retired)
                    .unwrap();
                st = guard;
                if std::mem::take(&mut st.stopping) || st.retired {
                    st.status = Status::Stopped;
                    st.reason = "stopped by operator".to_string();
                    return finish(&proc_, st);
                }

                st.restarts += 1;
                match launch(&mut st) {
                    Ok(new_child) => {
                        info!(
                            "process '{}' re-spawned with pid {} (restart #{})",
                            proc_.name, st.pid, st.restarts
                        );
                        drop(st);
                        child = new_child;
                    }
                    Err(e) => {
                        // The previous exit code stays recorded.
                        st.status = Status::Errored;
                        st.reason = format!("re-spawn failed: {}", e);
                        error!("process '{}' re-spawn failed: {}", proc_.name, e);
                        return finish(&proc_, st);
                    }
                }
            }
        }
    }
}

/// Terminal hand-off: release the monitor slot and wake anyone blocked in
/// `stop`/`spawn`.
fn finish(proc_: &ManagedProcess, mut st: std::sync::MutexGuard<'_, ProcState>) {
    st.monitor_live = false;
    drop(st);
    proc_.events.notify_all();
}

/// Exit code of a terminated child; signal deaths map to `128 + signo`.
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}
