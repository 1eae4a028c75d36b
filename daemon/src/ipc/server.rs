//! Unix domain socket server for the control channel
//!
//! Provides request-response communication and push notifications of line
//! events to subscribed clients. The server only reads status snapshots and
//! forwards commands; it never waits on the timing thread's schedule.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::events::LineEvent;
use crate::frame::parse_symbols;
use crate::line::{LineError, LineHandle};
use crate::logging::LogControl;
use crate::status::StatusPort;

use super::protocol::{
    encode, FrameReport, Notification, Request, Response, StatusReport, MAX_MESSAGE_LEN,
};

/// Everything a client request can reach
pub struct ControlContext {
    status: StatusPort,
    line: LineHandle,
    events: broadcast::Sender<LineEvent>,
    log: Option<LogControl>,
    start_time: Instant,
}

impl ControlContext {
    pub fn new(
        status: StatusPort,
        line: LineHandle,
        events: broadcast::Sender<LineEvent>,
        log: Option<LogControl>,
    ) -> Self {
        Self {
            status,
            line,
            events,
            log,
            start_time: Instant::now(),
        }
    }
}

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    context: Arc<ControlContext>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Create a new IPC server
    pub fn new(socket_path: &Path, context: ControlContext) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            context: Arc::new(context),
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let context = Arc::clone(&self.context);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, context) => {
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
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection.
    ///
    /// Responses and notifications share one writer task so pushed events
    /// never interleave with a response on the wire.
    async fn handle_client(stream: UnixStream, context: Arc<ControlContext>) -> Result<()> {
        let (reader, writer) = stream.into_split();
        let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(32);
        let writer_task = tokio::spawn(Self::write_loop(writer, out_rx));

        let mut forwarder = None;
        let result = Self::read_loop(reader, &context, &out_tx, &mut forwarder).await;

        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }
        drop(out_tx);
        let _ = writer_task.await;
        result
    }

    async fn read_loop(
        mut reader: OwnedReadHalf,
        context: &ControlContext,
        out_tx: &mpsc::Sender<Vec<u8>>,
        forwarder: &mut Option<JoinHandle<()>>,
    ) -> Result<()> {
        let mut len_buf = [0u8; 4];

        loop {
            // Read message length (4-byte little-endian)
            match reader.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!("client disconnected");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_MESSAGE_LEN {
                warn!(len, "message too large, disconnecting");
                return Ok(());
            }

            // Read message body
            let mut msg_buf = vec![0u8; len];
            reader.read_exact(&mut msg_buf).await?;

            let response = match serde_json::from_slice::<Request>(&msg_buf) {
                Ok(Request::Subscribe) => {
                    if forwarder.is_none() {
                        let events = context.events.subscribe();
                        out_tx.send(encode(&Response::Subscribed)?).await?;
                        *forwarder = Some(Self::forward_events(events, out_tx.clone()));
                        debug!("client subscribed to notifications");
                        continue;
                    }
                    Response::Subscribed
                }
                Ok(request) => {
                    debug!(?request, "received request");
                    Self::process_request(request, context).await
                }
                Err(e) => {
                    warn!(error = %e, "malformed request");
                    Response::error("bad_request", e.to_string())
                }
            };

            out_tx
                .send(encode(&response)?)
                .await
                .context("client writer closed")?;
        }
    }

    async fn write_loop(mut writer: OwnedWriteHalf, mut out_rx: mpsc::Receiver<Vec<u8>>) {
        while let Some(bytes) = out_rx.recv().await {
            if let Err(e) = writer.write_all(&bytes).await {
                debug!(?e, "client write failed");
                break;
            }
        }
    }

    /// Push line events to a subscribed client until it goes away
    fn forward_events(
        mut events: broadcast::Receiver<LineEvent>,
        out_tx: mpsc::Sender<Vec<u8>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let bytes = match encode(&Notification::Event { event }) {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                warn!(?e, "failed to encode notification");
                                continue;
                            }
                        };
                        if out_tx.send(bytes).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Process a request and return a response
    async fn process_request(request: Request, context: &ControlContext) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => {
                let uptime = context.start_time.elapsed().as_secs();
                Response::Status(StatusReport::new(&context.status.snapshot(), uptime))
            }

            Request::SetDebugLevel { level } => {
                let stored = context.status.set_debug_level(level);
                if let Some(log) = &context.log {
                    if let Err(e) = log.apply(stored) {
                        warn!(?e, "failed to apply log filter");
                    }
                }
                info!(requested = level, stored, "debug level changed via IPC");
                Response::DebugLevel { level: stored }
            }

            Request::Reset => match context.line.reset().await {
                Ok(()) => {
                    info!("reset requested via IPC");
                    Response::Ack
                }
                Err(e) => Response::error("line_stopped", e.to_string()),
            },

            Request::InjectTestFrame { symbols } => {
                let symbols = match parse_symbols(&symbols) {
                    Ok(symbols) => symbols,
                    Err(e) => return Response::error("invalid_frame", e.to_string()),
                };
                match context.line.inject_test_frame(symbols).await {
                    Ok(frame) => Response::Frame(FrameReport::from(&frame)),
                    Err(LineError::Frame(e)) => Response::error("invalid_frame", e.to_string()),
                    Err(e @ LineError::Stopped) => Response::error("line_stopped", e.to_string()),
                }
            }

            // handled by the read loop, which owns the client's writer
            Request::Subscribe => Response::Subscribed,
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::SymbolLatch;
    use crate::hardware::{PinMap, SimulatedHardware};
    use crate::line::{self, LineStateMachine, LineTimings};
    use crate::tone::ToneTable;

    struct Harness {
        socket_path: PathBuf,
        server: Arc<Server>,
        status: StatusPort,
    }

    fn socket_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "alarm-receiver-ipc-{name}-{}.sock",
            std::process::id()
        ))
    }

    fn harness(name: &str) -> Harness {
        let pins = PinMap::default();
        let sim = Arc::new(SimulatedHardware::new(pins));
        let status = StatusPort::new(2);
        let (event_tx, _) = broadcast::channel(64);
        let (handle, commands) = line::channel(8);

        let mut machine = LineStateMachine::new(
            sim,
            pins,
            Arc::new(SymbolLatch::new()),
            ToneTable::default(),
            LineTimings::default(),
            status.clone(),
            event_tx.clone(),
        );
        tokio::spawn(async move { machine.run(commands).await });

        let socket_path = socket_path(name);
        let context = ControlContext::new(status.clone(), handle, event_tx, None);
        let server = Arc::new(Server::new(&socket_path, context).unwrap());
        let runner = Arc::clone(&server);
        tokio::spawn(async move { runner.run().await });

        Harness {
            socket_path,
            server,
            status,
        }
    }

    async fn send_raw(stream: &mut UnixStream, body: &[u8]) {
        stream.write_all(&(body.len() as u32).to_le_bytes()).await.unwrap();
        stream.write_all(body).await.unwrap();
    }

    async fn read_json<T: serde::de::DeserializeOwned>(stream: &mut UnixStream) -> T {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.unwrap();
        let mut body = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        stream.read_exact(&mut body).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn call(stream: &mut UnixStream, request: &Request) -> Response {
        send_raw(stream, &serde_json::to_vec(request).unwrap()).await;
        read_json(stream).await
    }

    #[tokio::test]
    async fn test_ping_and_status() {
        let h = harness("status");
        let mut stream = UnixStream::connect(&h.socket_path).await.unwrap();

        assert_eq!(call(&mut stream, &Request::Ping).await, Response::Pong);

        match call(&mut stream, &Request::GetStatus).await {
            Response::Status(report) => {
                assert_eq!(report.line_state, crate::line::LineState::Idle);
                assert_eq!(report.debug_level, 2);
                assert!(report.last_frame.is_none());
                assert_eq!(report.checksum_valid, None);
            }
            other => panic!("unexpected response {other:?}"),
        }
        h.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_set_debug_level_clamps() {
        let h = harness("debug");
        let mut stream = UnixStream::connect(&h.socket_path).await.unwrap();

        let resp = call(&mut stream, &Request::SetDebugLevel { level: 42 }).await;
        assert_eq!(resp, Response::DebugLevel { level: 5 });
        let resp = call(&mut stream, &Request::SetDebugLevel { level: -1 }).await;
        assert_eq!(resp, Response::DebugLevel { level: 0 });
        assert_eq!(h.status.debug_level(), 0);
        h.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_inject_test_frame() {
        let h = harness("inject");
        let mut stream = UnixStream::connect(&h.socket_path).await.unwrap();

        let request = Request::InjectTestFrame {
            symbols: "1234181131010014".to_string(),
        };
        match call(&mut stream, &request).await {
            Response::Frame(report) => {
                assert!(!report.checksum_valid);
                assert_eq!(&report.symbols[..15], "123418113101001");
                assert_eq!(report.message.event_code, "131");
            }
            other => panic!("unexpected response {other:?}"),
        }
        assert_eq!(h.status.snapshot().checksum_valid(), Some(false));

        let bad = Request::InjectTestFrame {
            symbols: "12xx".to_string(),
        };
        assert!(matches!(
            call(&mut stream, &bad).await,
            Response::Error { code, .. } if code == "invalid_frame"
        ));
        h.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_request_keeps_connection() {
        let h = harness("malformed");
        let mut stream = UnixStream::connect(&h.socket_path).await.unwrap();

        send_raw(&mut stream, b"{not json").await;
        let resp: Response = read_json(&mut stream).await;
        assert!(matches!(resp, Response::Error { code, .. } if code == "bad_request"));

        assert_eq!(call(&mut stream, &Request::Ping).await, Response::Pong);
        h.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let h = harness("subscribe");
        let mut stream = UnixStream::connect(&h.socket_path).await.unwrap();
        assert_eq!(call(&mut stream, &Request::Subscribe).await, Response::Subscribed);

        let mut control = UnixStream::connect(&h.socket_path).await.unwrap();
        let request = Request::InjectTestFrame {
            symbols: "1234181131010013".to_string(),
        };
        assert!(matches!(call(&mut control, &request).await, Response::Frame(_)));

        loop {
            let note: Notification = read_json(&mut stream).await;
            if let Notification::Event {
                event:
                    LineEvent::FrameReceived {
                        symbols,
                        checksum_valid,
                        ..
                    },
            } = note
            {
                assert_eq!(symbols, "1234181131010013");
                assert!(checksum_valid);
                break;
            }
        }
        h.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_removes_socket() {
        let h = harness("shutdown");
        assert!(h.socket_path.exists());
        h.server.shutdown().await;
        assert!(!h.socket_path.exists());
    }
}
