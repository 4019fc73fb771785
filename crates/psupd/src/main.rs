//! psupd - process supervisor daemon.
//!
//! Keeps declared programs running: launches children, applies restart
//! policy on exit, rotates their logs, samples CPU/memory, and serves the
//! control socket under the home directory.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser;
use tracing::{Level, warn};
use tracing_subscriber::EnvFilter;

use psup_core::config::DaemonConfig;
use psup_core::daemon::{Daemon, ShutdownKind};
use psup_core::util::parse_size;

/// Process supervisor daemon.
#[derive(Parser)]
#[command(name = "psupd", about = "Process supervisor daemon", version)]
struct Args {
    /// Home directory for the socket, pid file, dump, and logs.
    /// Default: $PSUP_HOME, falling back to ~/.psup.
    #[arg(long, value_name = "PATH")]
    home: Option<String>,

    /// Default maximum size per child log file (e.g. "10M", "500K").
    #[arg(long, default_value = "10M", value_parser = parse_size_arg)]
    log_max_size: u64,

    /// Rotated siblings kept per child log file.
    #[arg(long, default_value = "3")]
    log_rotate: u32,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

fn parse_size_arg(s: &str) -> Result<u64, String> {
    parse_size(s).map_err(|e| e.to_string())
}

/// Writer duplicating daemon output to stdout and `<home>/daemon.log`.
#[derive(Clone)]
struct TeeWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl io::Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = io::stdout().write_all(buf);
        if let Ok(mut f) = self.file.lock() {
            let _ = f.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = io::stdout().flush();
        if let Ok(mut f) = self.file.lock() {
            let _ = f.flush();
        }
        Ok(())
    }
}

/// Initializes the tracing subscriber writing to stdout and the daemon's
/// own log file.
fn init_logging(verbose: u8, quiet: bool, log_file: std::fs::File) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("psupd={}", level).parse().unwrap())
        .add_directive(format!("psup_core={}", level).parse().unwrap());

    let writer = TeeWriter {
        file: Arc::new(Mutex::new(log_file)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .init();
}

fn main() {
    let args = Args::parse();

    let home = args
        .home
        .map(PathBuf::from)
        .unwrap_or_else(DaemonConfig::default_home);

    // The home directory must exist before the daemon log can be opened.
    if let Err(e) = std::fs::create_dir_all(&home) {
        eprintln!("Error: cannot create home directory {}: {}", home.display(), e);
        std::process::exit(1);
    }

    let mut config = DaemonConfig::new(&home);
    config.log_max_size = args.log_max_size;
    config.log_rotate = args.log_rotate;
    config.config_source = "flags".to_string();

    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.daemon_log_path())
    {
        Ok(f) => f,
        Err(e) => {
            eprintln!(
                "Error: cannot open daemon log {}: {}",
                config.daemon_log_path().display(),
                e
            );
            std::process::exit(1);
        }
    };
    init_logging(args.verbose, args.quiet, log_file);

    let daemon = Daemon::new(config);

    // Graceful shutdown on SIGINT/SIGTERM.
    let shutdown = daemon.shutdown_signal();
    if let Err(e) = ctrlc::set_handler(move || {
        shutdown.request(ShutdownKind::Graceful);
    }) {
        warn!("Failed to set signal handler: {}", e);
    }

    if let Err(e) = daemon.run(None) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
