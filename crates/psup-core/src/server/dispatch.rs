//! Method dispatch: maps request envelopes onto supervisor operations.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::api::{LogsParams, ProcessInfo, Request, Response, StartParams, StatsParams, TargetParams};
use crate::config::DaemonConfig;
use crate::daemon::{ShutdownKind, ShutdownSignal};
use crate::process::{LogSpec, ManagedProcess, ProcessSpec, RestartMode, RestartPolicy, Status};
use crate::registry::Registry;
use crate::store::StateStore;
use crate::util::{parse_duration, parse_size, read_last_lines};

/// Default number of log lines returned by `logs`.
const DEFAULT_LOG_LINES: usize = 40;
/// `stats` hours parameter: default and cap.
const STATS_DEFAULT_HOURS: i64 = 6;
const STATS_MAX_HOURS: i64 = 18;

/// Request dispatcher shared by the control socket and any in-process
/// frontend.
pub struct Dispatcher {
    registry: Arc<Registry>,
    store: Arc<StateStore>,
    config: DaemonConfig,
    shutdown: Arc<ShutdownSignal>,
    started_at: Instant,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<StateStore>,
        config: DaemonConfig,
        shutdown: Arc<ShutdownSignal>,
    ) -> Self {
        Self {
            registry,
            store,
            config,
            shutdown,
            started_at: Instant::now(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Dispatches one decoded request to its handler.
    pub fn dispatch(&self, req: &Request) -> Response {
        match req.method.as_str() {
            "ping" => self.ping(),
            "start" => self.start(req),
            "stop" => self.stop(req),
            "restart" => self.restart(req),
            "delete" => self.delete(req),
            "list" => self.list(),
            "describe" => self.describe(req),
            "isrunning" => self.isrunning(req),
            "logs" => self.logs(req),
            "flush" => self.flush(req),
            "save" => self.save(),
            "resurrect" => self.resurrect_op(),
            "kill" => self.kill(),
            "reboot" => self.reboot(),
            "stats" => self.stats(req),
            other => Response::err(format!("unknown method: {}", other)),
        }
    }

    // ------------------------------------------------------------------
    // Handlers
    // ------------------------------------------------------------------

    fn ping(&self) -> Response {
        Response::ok(json!({
            "pid": std::process::id(),
            "uptime": self.started_at.elapsed().as_secs(),
            "uptime_ms": self.started_at.elapsed().as_millis() as u64,
            "version": env!("CARGO_PKG_VERSION"),
            "config_file": self
                .config
                .config_file
                .as_ref()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default(),
            "config_source": self.config.config_source,
        }))
    }

    fn start(&self, req: &Request) -> Response {
        let params: StartParams = match decode_params(req) {
            Ok(p) => p,
            Err(r) => return r,
        };
        match self.create_process(params) {
            Ok(info) => {
                self.autosave();
                Response::ok(json!(info))
            }
            Err(msg) => Response::err(msg),
        }
    }

    fn stop(&self, req: &Request) -> Response {
        self.target_op(req, |p| {
            p.stop();
            Ok(())
        })
    }

    fn restart(&self, req: &Request) -> Response {
        self.target_op(req, |p| p.restart().map_err(|e| e.to_string()))
    }

    fn delete(&self, req: &Request) -> Response {
        let params: TargetParams = match decode_params(req) {
            Ok(p) => p,
            Err(r) => return r,
        };
        let procs = self.registry.resolve(&params.target);
        if procs.is_empty() {
            return Response::err(format!("not found: {}", params.target));
        }
        for p in &procs {
            p.retire();
            self.registry.remove(&p.name);
            info!("deleted process '{}'", p.name);
        }
        self.autosave();
        Response::ok(Value::Null)
    }

    fn list(&self) -> Response {
        let infos: Vec<ProcessInfo> = self.registry.list().iter().map(|p| p.info()).collect();
        Response::ok(json!(infos))
    }

    fn describe(&self, req: &Request) -> Response {
        let params: TargetParams = match decode_params(req) {
            Ok(p) => p,
            Err(r) => return r,
        };
        let procs = self.registry.resolve(&params.target);
        match procs.as_slice() {
            [] => Response::err(format!("not found: {}", params.target)),
            [p] => Response::ok(json!(p.info())),
            many => Response::ok(json!(many.iter().map(|p| p.info()).collect::<Vec<_>>())),
        }
    }

    fn isrunning(&self, req: &Request) -> Response {
        let params: TargetParams = match decode_params(req) {
            Ok(p) => p,
            Err(r) => return r,
        };
        let procs = self.registry.resolve(&params.target);
        match procs.as_slice() {
            [] => Response::err(format!("not found: {}", params.target)),
            [p] => Response::ok(json!(p.running_info())),
            many => Response::ok(json!(many.iter().map(|p| p.running_info()).collect::<Vec<_>>())),
        }
    }

    fn logs(&self, req: &Request) -> Response {
        let params: LogsParams = match decode_params(req) {
            Ok(p) => p,
            Err(r) => return r,
        };
        let lines = params.lines.unwrap_or(DEFAULT_LOG_LINES);
        let procs = self.registry.resolve(&params.target);
        if procs.is_empty() {
            return Response::err(format!("not found: {}", params.target));
        }

        let pick = |p: &Arc<ManagedProcess>| {
            let (out, err) = p.log_paths();
            if params.err_only { err } else { out }
        };

        if let [p] = procs.as_slice() {
            let path = pick(p);
            return match read_last_lines(&path, lines) {
                Ok(content) => Response::ok(json!({
                    "content": content,
                    "log_path": path.to_string_lossy(),
                })),
                Err(e) => Response::err(format!("failed to read log: {}", e)),
            };
        }

        // target == "all": concatenate per-process sections with headers.
        let mut sections = Vec::new();
        let mut paths = Vec::new();
        for p in &procs {
            let path = pick(p);
            paths.push(path.to_string_lossy().to_string());
            match read_last_lines(&path, lines) {
                Ok(content) if !content.is_empty() => {
                    sections.push(format!("==> {} <==\n{}", p.name, content));
                }
                Ok(_) => {}
                Err(e) => warn!("failed to read log for '{}': {}", p.name, e),
            }
        }
        Response::ok(json!({
            "content": sections.join("\n\n"),
            "log_paths": paths,
        }))
    }

    fn flush(&self, req: &Request) -> Response {
        self.target_op(req, |p| p.flush_logs().map_err(|e| e.to_string()))
    }

    fn save(&self) -> Response {
        match self.store.save(&self.registry) {
            Ok(count) => Response::ok(json!({ "saved": true, "count": count })),
            Err(e) => Response::err(format!("save failed: {}", e)),
        }
    }

    fn resurrect_op(&self) -> Response {
        let restored = self.resurrect();
        self.autosave();
        Response::ok(json!(restored))
    }

    fn kill(&self) -> Response {
        let shutdown = Arc::clone(&self.shutdown);
        std::thread::spawn(move || {
            // Let the response reach the client first.
            std::thread::sleep(Duration::from_millis(100));
            shutdown.request(ShutdownKind::Graceful);
        });
        Response::ok(json!({ "status": "daemon stopping" }))
    }

    fn reboot(&self) -> Response {
        // Dump while processes are still online so the next startup's
        // resurrect re-creates them; the post-stop rewrite is skipped.
        let saved = match self.store.save(&self.registry) {
            Ok(count) => count,
            Err(e) => return Response::err(format!("save failed: {}", e)),
        };
        let shutdown = Arc::clone(&self.shutdown);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            shutdown.request(ShutdownKind::Reboot);
        });
        Response::ok(json!({ "status": "rebooting", "saved": saved }))
    }

    fn stats(&self, req: &Request) -> Response {
        let params: StatsParams = match decode_params(req) {
            Ok(p) => p,
            Err(r) => return r,
        };
        let hours = match params.hours {
            Some(h) if h > STATS_MAX_HOURS => STATS_MAX_HOURS,
            Some(h) if h > 0 => h,
            _ => STATS_DEFAULT_HOURS,
        };
        let target = params.target.as_deref().unwrap_or("all");
        let procs = self.registry.resolve(target);
        if procs.is_empty() && target != "all" {
            return Response::err(format!("not found: {}", target));
        }

        let cutoff = Utc::now().timestamp() - hours * 3600;
        let mut out = serde_json::Map::new();
        for p in &procs {
            let snaps = self.registry.snapshots_since(&p.name, cutoff);
            out.insert(p.name.clone(), json!(snaps));
        }
        Response::ok(Value::Object(out))
    }

    // ------------------------------------------------------------------
    // Shared paths
    // ------------------------------------------------------------------

    /// Resolves the target and applies `op` to every selected process.
    /// Successful mutations trigger a dump rewrite.
    fn target_op(
        &self,
        req: &Request,
        op: impl Fn(&Arc<ManagedProcess>) -> Result<(), String>,
    ) -> Response {
        let params: TargetParams = match decode_params(req) {
            Ok(p) => p,
            Err(r) => return r,
        };
        let procs = self.registry.resolve(&params.target);
        if procs.is_empty() {
            return Response::err(format!("not found: {}", params.target));
        }

        for p in &procs {
            if let Err(e) = op(p) {
                self.autosave();
                return Response::err(format!("{}: {}", p.name, e));
            }
        }
        self.autosave();

        match procs.as_slice() {
            [p] => Response::ok(json!(p.info())),
            many => Response::ok(json!(many.iter().map(|p| p.info()).collect::<Vec<_>>())),
        }
    }

    /// The standard `start` path: validate, reserve the name, spawn, insert.
    fn create_process(&self, params: StartParams) -> Result<ProcessInfo, String> {
        if params.command.is_empty() {
            return Err("command is required".to_string());
        }
        let name = match params.name.as_deref().filter(|n| !n.is_empty()) {
            Some(n) => n.to_string(),
            None => basename(&params.command),
        };

        let policy = build_policy(&params)?;
        let max_size = match &params.max_log_size {
            Some(s) => parse_size(s).map_err(|e| e.to_string())?,
            None => self.config.log_max_size,
        };
        let (out_path, err_path) = self.config.log_paths_for(&name);
        let logs = LogSpec {
            out_path,
            err_path,
            max_size,
            rotate: params.log_rotate.unwrap_or(self.config.log_rotate),
        };
        let spec = ProcessSpec {
            command: params.command,
            interpreter: params.interpreter,
            args: params.args,
            cwd: params.cwd,
            env: params.env,
        };

        self.launch_declared(name, spec, policy, logs)
    }

    /// Reserve, spawn, insert. Used by `start` and `resurrect`.
    fn launch_declared(
        &self,
        name: String,
        spec: ProcessSpec,
        policy: RestartPolicy,
        logs: LogSpec,
    ) -> Result<ProcessInfo, String> {
        let id = self.registry.reserve(&name).map_err(|e| e.to_string())?;
        let proc_ = Arc::new(ManagedProcess::new(id, name, spec, policy, logs));

        // The registry lock is not held across the spawn.
        proc_.spawn().map_err(|e| e.to_string())?;

        if let Err(e) = self.registry.insert(Arc::clone(&proc_)) {
            // A same-name create raced in between; undo our spawn.
            proc_.retire();
            return Err(e.to_string());
        }
        info!(
            "started process '{}' (id {}, pid {})",
            proc_.name,
            proc_.id,
            proc_.online_pid().unwrap_or(0)
        );
        Ok(proc_.info())
    }

    /// Re-creates every dumped entry whose persisted status was `online`.
    /// Individual failures are logged and skipped.
    pub fn resurrect(&self) -> Vec<ProcessInfo> {
        let records = match self.store.load() {
            Ok(r) => r,
            Err(e) => {
                warn!("failed to read dump file: {}", e);
                return Vec::new();
            }
        };

        let mut restored = Vec::new();
        for rec in records {
            if rec.status != Status::Online {
                continue;
            }
            match self.launch_declared(rec.name.clone(), rec.spec, rec.policy, rec.logs) {
                Ok(info) => restored.push(info),
                Err(e) => warn!("failed to resurrect '{}': {}", rec.name, e),
            }
        }
        restored
    }

    /// Post-mutation dump rewrite; failures are logged, never surfaced.
    fn autosave(&self) {
        if let Err(e) = self.store.save(&self.registry) {
            warn!("automatic state dump failed: {}", e);
        }
    }
}

fn decode_params<T: DeserializeOwned>(req: &Request) -> Result<T, Response> {
    let value = req.params.clone().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| Response::err(format!("invalid params: {}", e)))
}

fn basename(command: &str) -> String {
    Path::new(command)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| command.to_string())
}

fn build_policy(params: &StartParams) -> Result<RestartPolicy, String> {
    let mut policy = RestartPolicy::default();
    if let Some(mode) = &params.autorestart {
        policy.mode = RestartMode::parse(mode)
            .ok_or_else(|| format!("invalid autorestart '{}' (always, on-failure, never)", mode))?;
    }
    if let Some(n) = params.max_restarts {
        policy.max_restarts = n;
    }
    if let Some(s) = &params.min_uptime {
        policy.min_uptime = parse_duration(s).map_err(|e| e.to_string())?;
    }
    if let Some(s) = &params.restart_delay {
        policy.restart_delay = parse_duration(s).map_err(|e| e.to_string())?;
    }
    if let Some(s) = &params.max_delay {
        policy.max_delay = Some(parse_duration(s).map_err(|e| e.to_string())?);
    }
    if let Some(s) = &params.kill_timeout {
        policy.kill_timeout = parse_duration(s).map_err(|e| e.to_string())?;
    }
    if let Some(b) = params.exp_backoff {
        policy.exp_backoff = b;
    }
    policy.restart_exit_codes = params.restart_exit_codes.clone();
    policy.no_restart_exit_codes = params.no_restart_exit_codes.clone();
    Ok(policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::tests::wait_until;

    pub(crate) fn test_dispatcher(home: &Path) -> Dispatcher {
        let config = DaemonConfig::new(home);
        Dispatcher::new(
            Arc::new(Registry::new()),
            Arc::new(StateStore::new(config.dump_path())),
            config,
            Arc::new(ShutdownSignal::new()),
        )
    }

    fn start_sleep(d: &Dispatcher, name: &str) -> Response {
        d.dispatch(&Request::new(
            "start",
            json!({ "command": "/bin/sleep", "args": ["60"], "name": name }),
        ))
    }

    #[test]
    fn test_unknown_method() {
        let dir = tempfile::tempdir().unwrap();
        let d = test_dispatcher(dir.path());
        let resp = d.dispatch(&Request::bare("frobnicate"));
        assert!(!resp.success);
        assert_eq!(resp.error, "unknown method: frobnicate");
    }

    #[test]
    fn test_ping_reports_pid_and_version() {
        let dir = tempfile::tempdir().unwrap();
        let d = test_dispatcher(dir.path());
        let resp = d.dispatch(&Request::bare("ping"));
        assert!(resp.success);
        assert_eq!(resp.data["pid"], std::process::id());
        assert_eq!(resp.data["version"], env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_start_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let d = test_dispatcher(dir.path());

        let resp = start_sleep(&d, "s1");
        assert!(resp.success, "start failed: {}", resp.error);
        assert_eq!(resp.data["name"], "s1");
        assert_eq!(resp.data["status"], "online");
        assert!(resp.data["pid"].as_u64().unwrap() > 0);

        let list = d.dispatch(&Request::bare("list"));
        let entries = list.data.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["name"], "s1");

        d.dispatch(&Request::new("delete", json!({ "target": "all" })));
    }

    #[test]
    fn test_start_requires_command() {
        let dir = tempfile::tempdir().unwrap();
        let d = test_dispatcher(dir.path());
        let resp = d.dispatch(&Request::new("start", json!({ "command": "" })));
        assert!(!resp.success);
        assert!(resp.error.contains("command is required"));
    }

    #[test]
    fn test_start_name_defaults_to_basename() {
        let dir = tempfile::tempdir().unwrap();
        let d = test_dispatcher(dir.path());

        let resp = d.dispatch(&Request::new(
            "start",
            json!({ "command": "/bin/sleep", "args": ["60"] }),
        ));
        assert!(resp.success);
        assert_eq!(resp.data["name"], "sleep");

        d.dispatch(&Request::new("delete", json!({ "target": "all" })));
    }

    #[test]
    fn test_duplicate_name_reports_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let d = test_dispatcher(dir.path());

        assert!(start_sleep(&d, "dup").success);
        let resp = start_sleep(&d, "dup");
        assert!(!resp.success);
        assert!(resp.error.contains("already exists"));

        d.dispatch(&Request::new("delete", json!({ "target": "all" })));
    }

    #[test]
    fn test_invalid_policy_strings_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let d = test_dispatcher(dir.path());

        let resp = d.dispatch(&Request::new(
            "start",
            json!({ "command": "/bin/sleep", "autorestart": "sometimes" }),
        ));
        assert!(!resp.success);
        assert!(resp.error.contains("invalid autorestart"));

        let resp = d.dispatch(&Request::new(
            "start",
            json!({ "command": "/bin/sleep", "restart_delay": "soon" }),
        ));
        assert!(!resp.success);
    }

    #[test]
    fn test_stop_describe_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let d = test_dispatcher(dir.path());
        start_sleep(&d, "s2");

        let resp = d.dispatch(&Request::new("stop", json!({ "target": "s2" })));
        assert!(resp.success);

        let desc = d.dispatch(&Request::new("describe", json!({ "target": "s2" })));
        assert_eq!(desc.data["status"], "stopped");
        assert_eq!(desc.data["pid"], 0);

        // Stop on an already-stopped process is a no-op that succeeds.
        let again = d.dispatch(&Request::new("stop", json!({ "target": "s2" })));
        assert!(again.success);

        d.dispatch(&Request::new("delete", json!({ "target": "all" })));
    }

    #[test]
    fn test_restart_changes_pid() {
        let dir = tempfile::tempdir().unwrap();
        let d = test_dispatcher(dir.path());
        let first = start_sleep(&d, "s3");
        let old_pid = first.data["pid"].as_u64().unwrap();

        let resp = d.dispatch(&Request::new("restart", json!({ "target": "s3" })));
        assert!(resp.success);
        let new_pid = resp.data["pid"].as_u64().unwrap();
        assert_ne!(old_pid, new_pid);

        d.dispatch(&Request::new("delete", json!({ "target": "all" })));
    }

    #[test]
    fn test_target_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let d = test_dispatcher(dir.path());
        let resp = d.dispatch(&Request::new("stop", json!({ "target": "ghost" })));
        assert!(!resp.success);
        assert!(resp.error.contains("not found"));
    }

    #[test]
    fn test_delete_all_empties_registry() {
        let dir = tempfile::tempdir().unwrap();
        let d = test_dispatcher(dir.path());
        start_sleep(&d, "a");
        start_sleep(&d, "b");

        let resp = d.dispatch(&Request::new("delete", json!({ "target": "all" })));
        assert!(resp.success);

        let list = d.dispatch(&Request::bare("list"));
        assert_eq!(list.data, json!([]));
    }

    #[test]
    fn test_isrunning_shape() {
        let dir = tempfile::tempdir().unwrap();
        let d = test_dispatcher(dir.path());
        start_sleep(&d, "probe");

        let resp = d.dispatch(&Request::new("isrunning", json!({ "target": "probe" })));
        assert!(resp.success);
        assert_eq!(resp.data["running"], true);
        assert_eq!(resp.data["status"], "online");
        assert!(resp.data["pid"].as_u64().unwrap() > 0);

        d.dispatch(&Request::new("delete", json!({ "target": "all" })));
    }

    #[test]
    fn test_logs_single_and_all() {
        let dir = tempfile::tempdir().unwrap();
        let d = test_dispatcher(dir.path());

        for (name, text) in [("one", "first"), ("two", "second")] {
            let resp = d.dispatch(&Request::new(
                "start",
                json!({
                    "command": "/bin/sh",
                    "args": ["-c", format!("echo {}", text)],
                    "name": name,
                    "autorestart": "never",
                }),
            ));
            assert!(resp.success, "{}", resp.error);
        }

        assert!(wait_until(Duration::from_secs(5), || {
            let resp = d.dispatch(&Request::new("logs", json!({ "target": "one" })));
            resp.data["content"].as_str().unwrap_or("").contains("first")
        }));

        let all = d.dispatch(&Request::new("logs", json!({ "target": "all" })));
        let content = all.data["content"].as_str().unwrap();
        assert!(content.contains("==> one <=="));
        assert!(content.contains("==> two <=="));
        assert!(content.contains("\n\n"), "sections separated by blank line");
        assert_eq!(all.data["log_paths"].as_array().unwrap().len(), 2);

        d.dispatch(&Request::new("delete", json!({ "target": "all" })));
    }

    #[test]
    fn test_flush_truncates_logs() {
        let dir = tempfile::tempdir().unwrap();
        let d = test_dispatcher(dir.path());

        d.dispatch(&Request::new(
            "start",
            json!({
                "command": "/bin/sh",
                "args": ["-c", "echo noisy"],
                "name": "noisy",
                "autorestart": "never",
            }),
        ));
        assert!(wait_until(Duration::from_secs(5), || {
            let resp = d.dispatch(&Request::new("logs", json!({ "target": "noisy" })));
            !resp.data["content"].as_str().unwrap_or("").is_empty()
        }));

        let resp = d.dispatch(&Request::new("flush", json!({ "target": "noisy" })));
        assert!(resp.success);

        let logs = d.dispatch(&Request::new("logs", json!({ "target": "noisy" })));
        assert_eq!(logs.data["content"], "");

        d.dispatch(&Request::new("delete", json!({ "target": "all" })));
    }

    #[test]
    fn test_save_writes_dump_after_mutations() {
        let dir = tempfile::tempdir().unwrap();
        let d = test_dispatcher(dir.path());
        start_sleep(&d, "persisted");

        let resp = d.dispatch(&Request::bare("save"));
        assert!(resp.success);
        assert_eq!(resp.data["saved"], true);
        assert_eq!(resp.data["count"], 1);
        assert!(dir.path().join("dump.json").exists());

        // The automatic post-mutation dump also reflects deletes.
        d.dispatch(&Request::new("delete", json!({ "target": "all" })));
        let dump = std::fs::read_to_string(dir.path().join("dump.json")).unwrap();
        assert_eq!(dump.trim(), "[]");
    }

    #[test]
    fn test_resurrect_restores_online_entries_only() {
        let dir = tempfile::tempdir().unwrap();

        // First life: two online, one stopped, then save.
        {
            let d = test_dispatcher(dir.path());
            start_sleep(&d, "persist1");
            start_sleep(&d, "persist2");
            start_sleep(&d, "idle");
            d.dispatch(&Request::new("stop", json!({ "target": "idle" })));
            let resp = d.dispatch(&Request::bare("save"));
            assert_eq!(resp.data["count"], 3);
            for p in d.registry().list() {
                p.retire();
            }
        }

        // Second life: resurrect from the same home.
        let d = test_dispatcher(dir.path());
        let resp = d.dispatch(&Request::bare("resurrect"));
        assert!(resp.success);
        let restored = resp.data.as_array().unwrap();
        assert_eq!(restored.len(), 2);

        let names: Vec<&str> = restored.iter().map(|i| i["name"].as_str().unwrap()).collect();
        assert!(names.contains(&"persist1"));
        assert!(names.contains(&"persist2"));
        assert!(!names.contains(&"idle"));
        for info in restored {
            assert_eq!(info["status"], "online");
        }

        d.dispatch(&Request::new("delete", json!({ "target": "all" })));
    }

    #[test]
    fn test_stats_clamps_hours() {
        let dir = tempfile::tempdir().unwrap();
        let d = test_dispatcher(dir.path());
        start_sleep(&d, "measured");

        let now = Utc::now().timestamp();
        let old = crate::metrics::MetricsSnapshot {
            ts: now - 10 * 3600,
            cpu: 1.0,
            memory: 1,
            restarts: 0,
            status: Status::Online,
            uptime: 0,
        };
        let recent = crate::metrics::MetricsSnapshot { ts: now - 60, ..old };
        d.registry().push_snapshot("measured", old);
        d.registry().push_snapshot("measured", recent);

        // hours = 0 defaults to 6: only the recent snapshot qualifies.
        let resp = d.dispatch(&Request::new("stats", json!({ "target": "measured", "hours": 0 })));
        assert_eq!(resp.data["measured"].as_array().unwrap().len(), 1);

        // hours = 99 clamps to 18: both qualify.
        let resp = d.dispatch(&Request::new("stats", json!({ "target": "measured", "hours": 99 })));
        assert_eq!(resp.data["measured"].as_array().unwrap().len(), 2);

        d.dispatch(&Request::new("delete", json!({ "target": "all" })));
    }

    #[test]
    fn test_kill_and_reboot_schedule_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let d = test_dispatcher(dir.path());

        let resp = d.dispatch(&Request::bare("kill"));
        assert!(resp.success);
        assert_eq!(resp.data["status"], "daemon stopping");
        assert!(wait_until(Duration::from_secs(2), || {
            d.shutdown.requested() == Some(ShutdownKind::Graceful)
        }));
    }

    #[test]
    fn test_reboot_saves_online_state_before_stopping() {
        let dir = tempfile::tempdir().unwrap();
        let d = test_dispatcher(dir.path());
        start_sleep(&d, "survivor");

        let resp = d.dispatch(&Request::bare("reboot"));
        assert!(resp.success);
        assert_eq!(resp.data["status"], "rebooting");
        assert_eq!(resp.data["saved"], 1);

        // The dump recorded the process as online.
        let store = StateStore::new(dir.path().join("dump.json"));
        let records = store.load().unwrap();
        assert_eq!(records[0].status, Status::Online);

        assert!(wait_until(Duration::from_secs(2), || {
            d.shutdown.requested() == Some(ShutdownKind::Reboot)
        }));
        d.dispatch(&Request::new("delete", json!({ "target": "all" })));
    }
}
