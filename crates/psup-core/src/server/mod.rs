//! Control server: accept loop on the local stream socket plus request
//! framing. One request per line, one response per line, until the client
//! half-closes.

mod dispatch;

pub use dispatch::Dispatcher;

use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::api::{Request, Response};

/// How often the accept loop checks the stop flag while idle.
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// Listener on the filesystem-backed stream socket, owner-only.
pub struct ControlServer {
    listener: UnixListener,
    path: PathBuf,
    running: Arc<AtomicBool>,
}

impl ControlServer {
    /// Removes any stale socket file, binds, and restricts the socket to
    /// its owner.
    pub fn bind(path: &Path) -> io::Result<Self> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
        listener.set_nonblocking(true)?;

        Ok(Self {
            listener,
            path: path.to_path_buf(),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Signals the accept loop to exit.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Removes the socket file from disk.
    pub fn remove_socket(&self) {
        let _ = std::fs::remove_file(&self.path);
    }

    /// Accept loop. Each connection is served on its own thread; a panic
    /// inside a handler terminates only that connection.
    pub fn serve(&self, dispatcher: Arc<Dispatcher>) {
        while self.running.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    let dispatcher = Arc::clone(&dispatcher);
                    std::thread::spawn(move || {
                        if let Err(e) = handle_connection(stream, dispatcher) {
                            debug!("connection closed: {}", e);
                        }
                    });
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    // Errors from a listener torn down during shutdown are
                    // expected; anything else is worth a log line.
                    if self.running.load(Ordering::SeqCst) {
                        warn!("accept failed: {}", e);
                        std::thread::sleep(ACCEPT_POLL);
                    }
                }
            }
        }
    }
}

/// Serves one connection: newline-delimited JSON requests in order, one
/// response line each.
fn handle_connection(stream: UnixStream, dispatcher: Arc<Dispatcher>) -> io::Result<()> {
    // Accepted streams inherit the listener's non-blocking mode.
    stream.set_nonblocking(false)?;
    let reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(req) => dispatcher.dispatch(&req),
            Err(e) => Response::err(format!("invalid request: {}", e)),
        };

        let mut out = serde_json::to_vec(&response).map_err(io::Error::other)?;
        out.push(b'\n');
        writer.write_all(&out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DaemonConfig;
    use crate::daemon::ShutdownSignal;
    use crate::registry::Registry;
    use crate::store::StateStore;
    use serde_json::json;

    fn serve_in(dir: &Path) -> (Arc<ControlServer>, std::thread::JoinHandle<()>, PathBuf) {
        let config = DaemonConfig::new(dir);
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(Registry::new()),
            Arc::new(StateStore::new(config.dump_path())),
            config.clone(),
            Arc::new(ShutdownSignal::new()),
        ));
        let socket = config.socket_path();
        let server = Arc::new(ControlServer::bind(&socket).unwrap());
        let srv = Arc::clone(&server);
        let handle = std::thread::spawn(move || srv.serve(dispatcher));
        (server, handle, socket)
    }

    fn roundtrip(socket: &Path, line: &str) -> Response {
        let mut stream = UnixStream::connect(socket).unwrap();
        stream.write_all(line.as_bytes()).unwrap();
        stream.write_all(b"\n").unwrap();

        let mut reader = BufReader::new(stream);
        let mut reply = String::new();
        reader.read_line(&mut reply).unwrap();
        serde_json::from_str(&reply).unwrap()
    }

    #[test]
    fn test_socket_is_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        let (server, handle, socket) = serve_in(dir.path());

        let mode = std::fs::metadata(&socket).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);

        server.shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn test_ping_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let (server, handle, socket) = serve_in(dir.path());

        let resp = roundtrip(&socket, r#"{"method":"ping"}"#);
        assert!(resp.success);
        assert_eq!(resp.data["pid"], std::process::id());

        server.shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn test_unknown_method_and_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let (server, handle, socket) = serve_in(dir.path());

        let resp = roundtrip(&socket, r#"{"method":"bogus"}"#);
        assert_eq!(resp.error, "unknown method: bogus");

        let resp = roundtrip(&socket, "{not json");
        assert!(!resp.success);
        assert!(resp.error.starts_with("invalid request:"));

        server.shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn test_multiple_requests_per_connection_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (server, handle, socket) = serve_in(dir.path());

        let mut stream = UnixStream::connect(&socket).unwrap();
        stream
            .write_all(b"{\"method\":\"list\"}\n{\"method\":\"ping\"}\n")
            .unwrap();

        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut first = String::new();
        reader.read_line(&mut first).unwrap();
        let mut second = String::new();
        reader.read_line(&mut second).unwrap();

        let first: Response = serde_json::from_str(&first).unwrap();
        let second: Response = serde_json::from_str(&second).unwrap();
        assert_eq!(first.data, json!([]));
        assert!(second.data["pid"].as_u64().is_some());

        server.shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn test_stale_socket_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("daemon.sock");
        std::fs::write(&socket, b"stale").unwrap();

        let server = ControlServer::bind(&socket).unwrap();
        assert!(socket.exists());
        server.remove_socket();
        assert!(!socket.exists());
    }

    #[test]
    fn test_shutdown_stops_accept_loop_promptly() {
        let dir = tempfile::tempdir().unwrap();
        let (server, handle, _socket) = serve_in(dir.path());

        std::thread::sleep(Duration::from_millis(50));
        server.shutdown();

        let begun = std::time::Instant::now();
        handle.join().unwrap();
        assert!(begun.elapsed() < Duration::from_secs(2));
    }
}
