//! Unix socket server.
//!
//! `UnixServer` owns the listener for its whole lifetime. The accept loop
//! runs on its own task and spawns one task per connection into a `JoinSet`;
//! `close()` flips a watch channel, the loop stops accepting and waits for
//! every tracked connection before the listener is dropped.

use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, warn};

use canary_metrics::Monitor;

use crate::error::{ConnectionError, ServerError};
use crate::handler::Handler;

/// Pause after a failed accept so a persistent error cannot spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Tunables for [`UnixServer`].
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Deadline covering the read and the write of one connection.
    pub connection_timeout: Duration,
    /// Longest request line (without the `\n`) accepted.
    pub max_request_bytes: usize,
    /// Mode bits applied to the socket file.
    pub socket_mode: u32,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(1),
            max_request_bytes: 1024 * 1024,
            socket_mode: 0o666,
        }
    }
}

/// A listener on a Unix socket that forwards each request line to a handler.
pub struct UnixServer {
    path: PathBuf,
    running: Mutex<Option<Running>>,
}

struct Running {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl UnixServer {
    /// Bind `path` and start serving.
    ///
    /// A stale socket left at `path` by a previous run is removed first; any
    /// other kind of file there makes the bind fail. Must be called from
    /// within a Tokio runtime.
    pub fn start(
        monitor: Arc<dyn Monitor>,
        handler: Arc<dyn Handler>,
        path: impl AsRef<Path>,
        options: ServerOptions,
    ) -> Result<Self, ServerError> {
        let path = path.as_ref().to_path_buf();
        remove_stale_socket(&path);

        let listener = UnixListener::bind(&path).map_err(|source| ServerError::Bind {
            path: path.clone(),
            source,
        })?;
        set_socket_mode(&path, options.socket_mode)?;

        info!(
            path = %path.display(),
            timeout_ms = options.connection_timeout.as_millis() as u64,
            "unix server listening"
        );

        let context = Arc::new(Connections {
            monitor,
            handler,
            options,
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_accept_loop(listener, context, shutdown_rx));

        Ok(Self {
            path,
            running: Mutex::new(Some(Running {
                shutdown_tx,
                handle,
            })),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop accepting, wait for every in-flight connection, release the socket.
    ///
    /// Fails with [`ServerError::AlreadyClosed`] on every call after the
    /// first, without waiting.
    pub async fn close(&self) -> Result<(), ServerError> {
        let running = self
            .running
            .lock()
            .expect("server state lock")
            .take()
            .ok_or(ServerError::AlreadyClosed)?;

        info!(path = %self.path.display(), "closing unix server");
        let _ = running.shutdown_tx.send(true);
        if let Err(e) = running.handle.await {
            log_join_error(e);
        }

        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "could not remove socket file"),
        }
        info!(path = %self.path.display(), "unix server closed");
        Ok(())
    }
}

/// Apply `mode` to a freshly bound socket file. On failure the file is
/// removed so a failed start leaves nothing behind.
fn set_socket_mode(path: &Path, mode: u32) -> Result<(), ServerError> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|source| {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "could not remove socket file");
        }
        ServerError::Permissions {
            path: path.to_path_buf(),
            source,
        }
    })
}

fn remove_stale_socket(path: &Path) {
    if let Ok(meta) = std::fs::symlink_metadata(path) {
        if meta.file_type().is_socket() {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "removed stale socket"),
                Err(e) => warn!(path = %path.display(), error = %e, "could not remove stale socket"),
            }
        }
    }
}

async fn run_accept_loop(
    listener: UnixListener,
    context: Arc<Connections>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    log_join_error(e);
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let context = Arc::clone(&context);
                    connections.spawn(async move { context.serve(stream).await });
                }
                Err(e) => {
                    context.monitor.record_serve(Some(&e));
                    warn!(error = %e, "error accepting connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }

    debug!(in_flight = connections.len(), "draining connections");
    while let Some(joined) = connections.join_next().await {
        if let Err(e) = joined {
            log_join_error(e);
        }
    }
    drop(listener);
}

fn log_join_error(e: JoinError) {
    if e.is_panic() {
        error!(error = %e, "connection task panicked");
    }
}

/// State shared by every connection task.
struct Connections {
    monitor: Arc<dyn Monitor>,
    handler: Arc<dyn Handler>,
    options: ServerOptions,
}

impl Connections {
    async fn serve(&self, stream: UnixStream) {
        let started = Instant::now();
        let deadline = started + self.options.connection_timeout;
        let (reader, mut writer) = stream.into_split();

        let request = match timeout_at(
            deadline,
            read_request(reader, self.options.max_request_bytes),
        )
        .await
        {
            Ok(Ok(request)) => request,
            Ok(Err(e)) => return self.abandon(e),
            Err(_) => return self.abandon(ConnectionError::Timeout),
        };

        let mut response = self.handler.handle(&request);
        response.push('\n');

        let written = match timeout_at(deadline, writer.write_all(response.as_bytes())).await {
            Ok(Ok(())) => {
                let _ = writer.shutdown().await;
                Ok(())
            }
            Ok(Err(e)) => Err(ConnectionError::Write(e)),
            Err(_) => Err(ConnectionError::Timeout),
        };

        match &written {
            Ok(()) => self.monitor.record_serve(None),
            Err(e) => {
                self.monitor.record_serve(Some(e));
                warn!(error = %e, bytes = response.len(), "response not delivered");
            }
        }
        self.monitor.record_serving_time(started.elapsed());
    }

    fn abandon(&self, error: ConnectionError) {
        self.monitor.record_serve(Some(&error));
        debug!(error = %error, "connection abandoned without response");
    }
}

/// Read one line, without its `\n`.
///
/// Partial reads accumulate until the line feed arrives; end of stream
/// before it, or more than `max` bytes, abandons the request.
async fn read_request<R>(reader: R, max: usize) -> Result<String, ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let limit = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(1);
    let mut limited = BufReader::new(reader).take(limit);
    let mut buf = Vec::new();

    limited
        .read_until(b'\n', &mut buf)
        .await
        .map_err(ConnectionError::Read)?;

    if buf.last() != Some(&b'\n') {
        return Err(if buf.len() > max {
            ConnectionError::TooLarge(max)
        } else {
            ConnectionError::ClosedEarly
        });
    }
    buf.pop();
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
