//! psup - operator CLI for the psup daemon.
//!
//! Marshals command-line arguments into control-plane requests, sends them
//! over the daemon's socket, and renders the responses.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde_json::{Value, json};

use psup_core::api::{ProcessInfo, Request, Response, RunningInfo};
use psup_core::config::DaemonConfig;
use psup_core::util::{format_size, format_uptime};

/// Operator CLI for the psup process supervisor.
#[derive(Parser)]
#[command(name = "psup", about = "Process supervisor CLI", version)]
struct Args {
    /// Daemon home directory. Default: $PSUP_HOME, falling back to ~/.psup.
    #[arg(long, value_name = "PATH")]
    home: Option<String>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Declare and start a process.
    Start {
        /// Absolute path of the program to run.
        command: String,
        /// Arguments passed to the program.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        /// Process name (default: basename of the command).
        #[arg(long)]
        name: Option<String>,
        /// Interpreter to run the command with (e.g. /usr/bin/python3).
        #[arg(long)]
        interpreter: Option<String>,
        /// Working directory for the child.
        #[arg(long)]
        cwd: Option<String>,
        /// Extra environment, KEY=VALUE. Repeatable.
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,
        /// Restart mode: always, on-failure, never.
        #[arg(long)]
        autorestart: Option<String>,
        /// Maximum restart attempts (0 = unlimited).
        #[arg(long)]
        max_restarts: Option<u32>,
        /// Run duration that resets the restart counter (e.g. "10s").
        #[arg(long)]
        min_uptime: Option<String>,
        /// Delay before a re-spawn (e.g. "500ms").
        #[arg(long)]
        restart_delay: Option<String>,
        /// Double the restart delay per consecutive restart.
        #[arg(long)]
        exp_backoff: bool,
        /// Cap on the restart delay (e.g. "30s").
        #[arg(long)]
        max_delay: Option<String>,
        /// How long stop waits before SIGKILL (e.g. "5s").
        #[arg(long)]
        kill_timeout: Option<String>,
        /// Maximum size per log file (e.g. "1M").
        #[arg(long)]
        max_log_size: Option<String>,
        /// Rotated siblings kept per log file.
        #[arg(long)]
        log_rotate: Option<u32>,
    },
    /// Stop a process (name, id, or "all").
    Stop { target: String },
    /// Stop and start a process, resetting its restart counter.
    Restart { target: String },
    /// Stop a process and remove it from the supervisor.
    Delete { target: String },
    /// List every declared process.
    List,
    /// Show full details for a process.
    Describe { target: String },
    /// Show a compact running/not-running summary.
    Isrunning { target: String },
    /// Print the tail of a process's log.
    Logs {
        target: String,
        /// Number of lines to show.
        #[arg(short = 'n', long)]
        lines: Option<usize>,
        /// Read the stderr log instead of stdout.
        #[arg(long)]
        err: bool,
    },
    /// Truncate a process's live log files.
    Flush { target: String },
    /// Write the dump file now.
    Save,
    /// Re-create processes recorded online in the dump file.
    Resurrect,
    /// Stop the daemon.
    Kill,
    /// Save state and restart-friendly shutdown: processes are dumped as
    /// online so the next daemon start resurrects them.
    Reboot,
    /// Show metrics history (per-minute snapshots).
    Stats {
        /// Name, id, or "all" (default).
        target: Option<String>,
        /// Hours of history, up to 18 (default 6).
        #[arg(long)]
        hours: Option<i64>,
    },
    /// Check the daemon is up and show its version.
    Ping,
}

fn main() {
    let args = Args::parse();

    let home = args
        .home
        .map(PathBuf::from)
        .unwrap_or_else(DaemonConfig::default_home);
    let socket = home.join("daemon.sock");

    let (request, renderer) = build_request(args.command);
    let response = match send(&socket, &request) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if !response.success {
        eprintln!("Error: {}", response.error);
        std::process::exit(1);
    }
    renderer(&response.data);
}

type Renderer = fn(&Value);

fn build_request(cmd: Cmd) -> (Request, Renderer) {
    match cmd {
        Cmd::Start {
            command,
            args,
            name,
            interpreter,
            cwd,
            env,
            autorestart,
            max_restarts,
            min_uptime,
            restart_delay,
            exp_backoff,
            max_delay,
            kill_timeout,
            max_log_size,
            log_rotate,
        } => {
            let mut params = json!({
                "command": command,
                "args": args,
                "env": parse_env_pairs(&env),
            });
            let obj = params.as_object_mut().unwrap();
            maybe(obj, "name", name);
            maybe(obj, "interpreter", interpreter);
            maybe(obj, "cwd", cwd);
            maybe(obj, "autorestart", autorestart);
            maybe(obj, "min_uptime", min_uptime);
            maybe(obj, "restart_delay", restart_delay);
            maybe(obj, "max_delay", max_delay);
            maybe(obj, "kill_timeout", kill_timeout);
            maybe(obj, "max_log_size", max_log_size);
            if let Some(n) = max_restarts {
                obj.insert("max_restarts".to_string(), json!(n));
            }
            if let Some(n) = log_rotate {
                obj.insert("log_rotate".to_string(), json!(n));
            }
            if exp_backoff {
                obj.insert("exp_backoff".to_string(), json!(true));
            }
            (Request::new("start", params), render_info)
        }
        Cmd::Stop { target } => (Request::new("stop", json!({ "target": target })), render_info),
        Cmd::Restart { target } => (
            Request::new("restart", json!({ "target": target })),
            render_info,
        ),
        Cmd::Delete { target } => (
            Request::new("delete", json!({ "target": target })),
            render_ok,
        ),
        Cmd::List => (Request::bare("list"), render_list),
        Cmd::Describe { target } => (
            Request::new("describe", json!({ "target": target })),
            render_describe,
        ),
        Cmd::Isrunning { target } => (
            Request::new("isrunning", json!({ "target": target })),
            render_isrunning,
        ),
        Cmd::Logs { target, lines, err } => (
            Request::new(
                "logs",
                json!({ "target": target, "lines": lines, "err_only": err }),
            ),
            render_logs,
        ),
        Cmd::Flush { target } => (
            Request::new("flush", json!({ "target": target })),
            render_ok,
        ),
        Cmd::Save => (Request::bare("save"), render_raw),
        Cmd::Resurrect => (Request::bare("resurrect"), render_list),
        Cmd::Kill => (Request::bare("kill"), render_raw),
        Cmd::Reboot => (Request::bare("reboot"), render_raw),
        Cmd::Stats { target, hours } => (
            Request::new("stats", json!({ "target": target, "hours": hours })),
            render_stats,
        ),
        Cmd::Ping => (Request::bare("ping"), render_raw),
    }
}

fn maybe(obj: &mut serde_json::Map<String, Value>, key: &str, value: Option<String>) {
    if let Some(v) = value {
        obj.insert(key.to_string(), json!(v));
    }
}

/// Splits repeated `KEY=VALUE` flags into an environment map.
fn parse_env_pairs(pairs: &[String]) -> serde_json::Map<String, Value> {
    let mut map = serde_json::Map::new();
    for pair in pairs {
        match pair.split_once('=') {
            Some((key, value)) => {
                map.insert(key.to_string(), json!(value));
            }
            None => {
                eprintln!("Error: invalid --env '{}', expected KEY=VALUE", pair);
                std::process::exit(1);
            }
        }
    }
    map
}

fn send(socket: &Path, request: &Request) -> Result<Response, String> {
    let mut stream = UnixStream::connect(socket).map_err(|e| {
        format!(
            "cannot connect to {} ({}). Is psupd running?",
            socket.display(),
            e
        )
    })?;

    let mut line = serde_json::to_vec(request).map_err(|e| e.to_string())?;
    line.push(b'\n');
    stream.write_all(&line).map_err(|e| e.to_string())?;

    let mut reader = BufReader::new(stream);
    let mut reply = String::new();
    reader
        .read_line(&mut reply)
        .map_err(|e| e.to_string())?;
    if reply.is_empty() {
        return Err("daemon closed the connection without replying".to_string());
    }
    serde_json::from_str(&reply).map_err(|e| format!("bad response: {}", e))
}

// ------------------------------------------------------------------
// Rendering
// ------------------------------------------------------------------

fn render_ok(_data: &Value) {
    println!("ok");
}

fn render_raw(data: &Value) {
    match serde_json::to_string_pretty(data) {
        Ok(s) => println!("{}", s),
        Err(_) => println!("{}", data),
    }
}

fn render_list(data: &Value) {
    let infos: Vec<ProcessInfo> = match serde_json::from_value(data.clone()) {
        Ok(v) => v,
        Err(_) => return render_raw(data),
    };
    print_table(&infos);
}

fn render_info(data: &Value) {
    if data.is_array() {
        return render_list(data);
    }
    match serde_json::from_value::<ProcessInfo>(data.clone()) {
        Ok(info) => print_table(std::slice::from_ref(&info)),
        Err(_) => render_raw(data),
    }
}

fn print_table(infos: &[ProcessInfo]) {
    println!(
        "{:>4}  {:<18} {:>7}  {:<8} {:>8}  {:>8} {:>6} {:>9}  {}",
        "ID", "NAME", "PID", "STATUS", "RESTARTS", "UPTIME", "CPU%", "MEM", "COMMAND"
    );
    for info in infos {
        println!(
            "{:>4}  {:<18} {:>7}  {:<8} {:>8}  {:>8} {:>6.1} {:>9}  {}",
            info.id,
            info.name,
            info.pid,
            info.status,
            info.restarts,
            format_uptime(info.uptime),
            info.cpu,
            format_size(info.memory),
            info.command,
        );
    }
}

fn render_describe(data: &Value) {
    let info: ProcessInfo = match serde_json::from_value(data.clone()) {
        Ok(v) => v,
        Err(_) => return render_raw(data),
    };
    println!("name:        {}", info.name);
    println!("id:          {}", info.id);
    println!("command:     {}", info.command);
    if !info.args.is_empty() {
        println!("args:        {}", info.args.join(" "));
    }
    if let Some(interp) = &info.interpreter {
        println!("interpreter: {}", interp);
    }
    if let Some(cwd) = &info.cwd {
        println!("cwd:         {}", cwd);
    }
    println!("status:      {}", info.status);
    if !info.reason.is_empty() {
        println!("reason:      {}", info.reason);
    }
    println!("pid:         {}", info.pid);
    println!("restarts:    {}", info.restarts);
    if let Some(code) = info.exit_code {
        println!("exit code:   {}", code);
    }
    println!("uptime:      {}", format_uptime(info.uptime));
    println!("cpu:         {:.1}%", info.cpu);
    println!("memory:      {}", format_size(info.memory));
    if !info.listeners.is_empty() {
        println!("listeners:   {}", info.listeners.join(", "));
    }
    println!("autorestart: {}", info.autorestart);
}

fn render_isrunning(data: &Value) {
    let info: RunningInfo = match serde_json::from_value(data.clone()) {
        Ok(v) => v,
        Err(_) => return render_raw(data),
    };
    println!(
        "{}: {} (status {}, pid {}, restarts {})",
        info.name,
        if info.running { "running" } else { "not running" },
        info.status,
        info.pid,
        info.restarts,
    );
}

fn render_logs(data: &Value) {
    if let Some(content) = data.get("content").and_then(Value::as_str) {
        print!("{}", content);
        if !content.is_empty() && !content.ends_with('\n') {
            println!();
        }
    }
}

fn render_stats(data: &Value) {
    let Some(map) = data.as_object() else {
        return render_raw(data);
    };
    for (name, snaps) in map {
        println!("== {} ==", name);
        let Some(rows) = snaps.as_array() else { continue };
        for row in rows {
            println!(
                "  {}  cpu {:>5.1}%  mem {:>9}  restarts {:>3}  {}",
                row["ts"].as_i64().unwrap_or(0),
                row["cpu"].as_f64().unwrap_or(0.0),
                format_size(row["memory"].as_u64().unwrap_or(0)),
                row["restarts"].as_u64().unwrap_or(0),
                row["status"].as_str().unwrap_or("?"),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_pairs() {
        let map = parse_env_pairs(&["A=1".to_string(), "B=two=three".to_string()]);
        assert_eq!(map["A"], "1");
        assert_eq!(map["B"], "two=three");
    }

    #[test]
    fn test_start_request_shape() {
        let (req, _) = build_request(Cmd::Start {
            command: "/bin/sleep".to_string(),
            args: vec!["60".to_string()],
            name: Some("s1".to_string()),
            interpreter: None,
            cwd: None,
            env: Vec::new(),
            autorestart: Some("always".to_string()),
            max_restarts: Some(3),
            min_uptime: None,
            restart_delay: Some("500ms".to_string()),
            exp_backoff: true,
            max_delay: None,
            kill_timeout: None,
            max_log_size: None,
            log_rotate: None,
        });

        assert_eq!(req.method, "start");
        let params = req.params.unwrap();
        assert_eq!(params["command"], "/bin/sleep");
        assert_eq!(params["name"], "s1");
        assert_eq!(params["autorestart"], "always");
        assert_eq!(params["max_restarts"], 3);
        assert_eq!(params["restart_delay"], "500ms");
        assert_eq!(params["exp_backoff"], true);
        assert!(params.get("min_uptime").is_none());
    }

    #[test]
    fn test_target_request_shape() {
        let (req, _) = build_request(Cmd::Stop {
            target: "web".to_string(),
        });
        assert_eq!(req.method, "stop");
        assert_eq!(req.params.unwrap()["target"], "web");
    }
}
