//! Local IPC server for the UI
//!
//! Unix domain socket (or a named pipe on Windows). Provides
//! request-response communication and pushes orchestrator events to
//! subscribed clients. Each client gets a writer task fed by a queue so
//! replies and pushed events never interleave mid-frame.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::events::CoreEvent;
use crate::orchestrator::Orchestrator;

use super::protocol::{DaemonStatus, Request, Response};

const MAX_FRAME_LEN: usize = 1024 * 1024;
const OUTBOX_CAPACITY: usize = 32;

/// IPC Server handling client connections
pub struct Server {
    #[cfg(unix)]
    socket_path: std::path::PathBuf,
    #[cfg(unix)]
    listener: tokio::net::UnixListener,
    orchestrator: Arc<Orchestrator>,
    started: Instant,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Create a new IPC server
    #[cfg(unix)]
    pub fn new(socket_path: &std::path::Path, orchestrator: Arc<Orchestrator>) -> Result<Self> {
        use std::os::unix::fs::PermissionsExt;

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener =
            tokio::net::UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Owner-only access
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            orchestrator,
            started: Instant::now(),
            shutdown_tx,
        })
    }

    /// Create a new IPC server
    #[cfg(windows)]
    pub fn new(_socket_path: &std::path::Path, orchestrator: Arc<Orchestrator>) -> Result<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            orchestrator,
            started: Instant::now(),
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    #[cfg(unix)]
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    self.spawn_client(stream);
                }
                Err(e) => {
                    warn!(?e, "accept error");
                }
            }
        }
    }

    /// Run the server, accepting connections
    #[cfg(windows)]
    pub async fn run(&self) -> Result<()> {
        use tokio::net::windows::named_pipe::ServerOptions;

        use crate::config::PIPE_NAME;

        let mut pipe = ServerOptions::new()
            .first_pipe_instance(true)
            .create(PIPE_NAME)
            .context("failed to create named pipe")?;

        info!(pipe = PIPE_NAME, "IPC server listening");

        loop {
            pipe.connect().await.context("named pipe connect failed")?;
            let client = pipe;
            pipe = ServerOptions::new()
                .create(PIPE_NAME)
                .context("failed to create named pipe")?;

            debug!("client connected");
            self.spawn_client(client);
        }
    }

    fn spawn_client<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let orchestrator = Arc::clone(&self.orchestrator);
        let started = self.started;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            tokio::select! {
                result = handle_client(stream, orchestrator, started) => {
                    if let Err(e) = result {
                        warn!(?e, "client handler error");
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("client handler shutting down");
                }
            }
        });
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        #[cfg(unix)]
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Serve a single client connection until it hangs up
async fn handle_client<S>(
    stream: S,
    orchestrator: Arc<Orchestrator>,
    started: Instant,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let (out_tx, out_rx) = mpsc::channel(OUTBOX_CAPACITY);
    let writer_task = tokio::spawn(write_loop(writer, out_rx));
    let mut forwarder: Option<JoinHandle<()>> = None;

    let result = loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("client disconnected");
                break Ok(());
            }
            Err(e) => break Err(e),
        };

        let response = match serde_json::from_slice::<Request>(&frame) {
            Ok(request) => {
                debug!(?request, "received request");

                // Subscribe before replying so no event slips between the two
                let events = (request == Request::Subscribe && forwarder.is_none())
                    .then(|| orchestrator.subscribe());

                let response = process_request(request, &orchestrator, started).await;
                if out_tx.send(response).await.is_err() {
                    break Ok(());
                }

                if let Some(events) = events {
                    debug!("client subscribed to notifications");
                    forwarder = Some(tokio::spawn(forward_events(events, out_tx.clone())));
                }
                continue;
            }
            Err(e) => Response::error("invalid_request", e.to_string()),
        };

        if out_tx.send(response).await.is_err() {
            break Ok(());
        }
    };

    if let Some(forwarder) = forwarder {
        forwarder.abort();
    }
    drop(out_tx);
    if let Ok(Err(e)) = writer_task.await {
        debug!(?e, "client writer ended with error");
    }

    result
}

/// Process a request and return a response
async fn process_request(
    request: Request,
    orchestrator: &Arc<Orchestrator>,
    started: Instant,
) -> Response {
    match request {
        Request::Ping => Response::Pong,

        Request::GetStatus => Response::Status(DaemonStatus::from_snapshot(
            orchestrator.status(),
            started.elapsed().as_secs(),
        )),

        Request::Subscribe => Response::Subscribed,

        Request::StartMonitoring => {
            orchestrator.start_monitoring();
            Response::Ack
        }

        Request::StopMonitoring => {
            orchestrator.stop_monitoring().await;
            Response::Ack
        }

        Request::Connect => match orchestrator.connect_peripheral().await {
            Ok(device) => Response::Connected { device },
            Err(e) => e.into(),
        },

        Request::Disconnect => {
            orchestrator.disconnect_peripheral().await;
            Response::Ack
        }

        Request::SetColor { slot, color } => persisted(orchestrator.set_color(slot, color).await),

        Request::SetFilter { filter } => persisted(orchestrator.set_filter(filter)),

        Request::SetSerialPort { port } => persisted(orchestrator.set_serial_port(port)),
    }
}

fn persisted(result: Result<()>) -> Response {
    match result {
        Ok(()) => Response::Ack,
        Err(e) => Response::error("persist_failed", format!("{:#}", e)),
    }
}

/// Relay orchestrator events to one subscribed client
async fn forward_events(
    mut events: broadcast::Receiver<CoreEvent>,
    out_tx: mpsc::Sender<Response>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if out_tx.send(Response::Event { event }).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn write_loop<S>(mut writer: WriteHalf<S>, mut out_rx: mpsc::Receiver<Response>) -> Result<()>
where
    S: AsyncWrite,
{
    while let Some(response) = out_rx.recv().await {
        write_frame(&mut writer, &response).await?;
    }
    Ok(())
}

/// Read one length-prefixed frame, `None` on a clean hang-up
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        bail!("message too large: {} bytes", len);
    }

    let mut msg_buf = vec![0u8; len];
    reader.read_exact(&mut msg_buf).await?;
    Ok(Some(msg_buf))
}

/// Send a length-prefixed JSON message
async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;
    writer.flush().await?;

    Ok(())
}
