use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use conduit_primitives::{TelemetryEvent, TelemetrySink};

use crate::buffer::{TelemetryBuffer, TelemetryBufferConfig};
use crate::transport::{TelemetryConnection, TelemetryTransport};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(16);

/// Explicit reconnection state machine. Stored as an atomic so
/// [`TelemetryEmitter::emit`] can check it without ever awaiting.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Closing = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Closing,
            _ => Self::Disconnected,
        }
    }
}

enum Command {
    Send(TelemetryEvent),
    SendBatch(Vec<TelemetryEvent>),
    Disconnect,
}

/// Whether non-buffered emits write through immediately, or whether events
/// accumulate in a [`TelemetryBuffer`] and go out as one envelope per flush.
#[derive(Debug, Clone, Copy)]
pub enum BufferingMode {
    Off,
    On(TelemetryBufferConfig),
}

/// Reconnecting event sink with backoff, optional buffering, and a
/// structured-log bridge.
///
/// Holds a single long-lived connection. `emit*` is always non-blocking: a
/// full description of the three cases is in the trait impl below. The
/// connection itself is driven entirely by one task (`run`) — nothing
/// outside that task ever touches the socket.
pub struct TelemetryEmitter {
    node_id: String,
    state: Arc<AtomicU8>,
    intentional_disconnect: Arc<AtomicBool>,
    command_tx: mpsc::UnboundedSender<Command>,
    buffer: Option<Arc<TelemetryBuffer>>,
}

impl TelemetryEmitter {
    /// Connect, waiting for the first connection attempt to resolve so the
    /// returned future only completes once the socket is open, and spawn
    /// the driving task.
    pub async fn connect(
        node_id: impl Into<String>,
        transport: Arc<dyn TelemetryTransport>,
        buffering: BufferingMode,
    ) -> Arc<Self> {
        let node_id = node_id.into();
        let state = Arc::new(AtomicU8::new(ConnectionState::Connecting as u8));
        let intentional_disconnect = Arc::new(AtomicBool::new(false));
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let conn = connect_with_log(transport.as_ref()).await;
        if conn.is_some() {
            state.store(ConnectionState::Connected as u8, Ordering::Release);
        } else {
            state.store(ConnectionState::Disconnected as u8, Ordering::Release);
        }

        tokio::spawn(run(
            transport,
            conn,
            state.clone(),
            intentional_disconnect.clone(),
            command_rx,
        ));

        match buffering {
            BufferingMode::Off => Arc::new(Self {
                node_id,
                state,
                intentional_disconnect,
                command_tx,
                buffer: None,
            }),
            BufferingMode::On(config) => {
                // The flush_fn needs to call back into the emitter it will end
                // up attached to; `new_cyclic` hands us a `Weak` to close over
                // before the `Arc` exists.
                Arc::new_cyclic(|weak: &std::sync::Weak<Self>| {
                    let weak = weak.clone();
                    let flush_fn: crate::buffer::FlushFn = Arc::new(move |events| {
                        let weak = weak.clone();
                        Box::pin(async move {
                            match weak.upgrade() {
                                Some(emitter) => emitter.send_batch_now(events).await,
                                None => Ok(()),
                            }
                        })
                    });
                    let buffer = TelemetryBuffer::spawn(config, flush_fn);
                    Self {
                        node_id,
                        state,
                        intentional_disconnect,
                        command_tx,
                        buffer: Some(buffer),
                    }
                })
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// User-initiated disconnect: suppresses reconnection.
    pub fn disconnect(&self) {
        self.intentional_disconnect.store(true, Ordering::Release);
        self.state.store(ConnectionState::Closing as u8, Ordering::Release);
        let _ = self.command_tx.send(Command::Disconnect);
    }

    /// Flush any buffered events and mark this emitter closing, for use in
    /// the orchestrator's shutdown sequence.
    pub async fn shutdown(&self) {
        if let Some(buffer) = &self.buffer {
            buffer.shutdown().await;
        }
        self.disconnect();
    }

    async fn send_batch_now(&self, events: Vec<TelemetryEvent>) -> conduit_primitives::ConduitResult<()> {
        if !self.is_connected() {
            debug!(count = events.len(), "telemetry disconnected, dropping buffered batch");
            return Ok(());
        }
        self.command_tx
            .send(Command::SendBatch(events))
            .map_err(|_| conduit_primitives::ConduitError::Shutdown)
    }
}

impl TelemetrySink for TelemetryEmitter {
    /// Non-blocking by construction: buffered events go into an in-memory
    /// queue, direct events go onto an unbounded channel the driving task
    /// drains — neither path awaits the socket.
    fn emit(&self, event: TelemetryEvent) {
        if let Some(buffer) = &self.buffer {
            buffer.push(event);
            return;
        }

        if !self.is_connected() {
            debug!(kind = ?std::mem::discriminant(&event.kind), "telemetry disconnected, dropping event");
            return;
        }

        if self.command_tx.send(Command::Send(event)).is_err() {
            debug!("telemetry emitter task gone, dropping event");
        }
    }
}

async fn connect_with_log(transport: &dyn TelemetryTransport) -> Option<Box<dyn TelemetryConnection>> {
    match transport.connect().await {
        Ok(conn) => {
            info!("telemetry connected");
            Some(conn)
        }
        Err(e) => {
            warn!(error = %e, "telemetry initial connect failed");
            None
        }
    }
}

async fn run(
    transport: Arc<dyn TelemetryTransport>,
    mut conn: Option<Box<dyn TelemetryConnection>>,
    state: Arc<AtomicU8>,
    intentional_disconnect: Arc<AtomicBool>,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if conn.is_none() {
            if intentional_disconnect.load(Ordering::Acquire) {
                return;
            }
            state.store(ConnectionState::Connecting as u8, Ordering::Release);
            match transport.connect().await {
                Ok(c) => {
                    info!("telemetry reconnected");
                    conn = Some(c);
                    state.store(ConnectionState::Connected as u8, Ordering::Release);
                    backoff = INITIAL_BACKOFF;
                }
                Err(e) => {
                    warn!(error = %e, backoff = ?backoff, "telemetry reconnect failed, backing off");
                    state.store(ConnectionState::Disconnected as u8, Ordering::Release);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            }
        }

        let Some(cmd) = command_rx.recv().await else {
            return;
        };

        match cmd {
            Command::Send(event) => {
                if let Some(c) = conn.as_mut() {
                    if let Err(e) = write_event(c.as_mut(), &event).await {
                        warn!(error = %e, "telemetry send failed, will reconnect");
                        conn = None;
                        state.store(ConnectionState::Disconnected as u8, Ordering::Release);
                    }
                }
            }
            Command::SendBatch(events) => {
                if let Some(c) = conn.as_mut() {
                    if let Err(e) = write_batch(c.as_mut(), &events).await {
                        warn!(error = %e, "telemetry batch send failed, will reconnect");
                        conn = None;
                        state.store(ConnectionState::Disconnected as u8, Ordering::Release);
                    }
                }
            }
            Command::Disconnect => {
                state.store(ConnectionState::Closing as u8, Ordering::Release);
                return;
            }
        }
    }
}

async fn write_event(
    conn: &mut dyn TelemetryConnection,
    event: &TelemetryEvent,
) -> conduit_primitives::ConduitResult<()> {
    let line = serde_json::to_string(event)
        .map_err(|e| conduit_primitives::BackendError::Transport(e.to_string()))?;
    conn.send_line(line).await
}

/// Buffered flushes send a single envelope containing the whole batch:
/// `{ "batch": [<event>, ...] }`.
async fn write_batch(
    conn: &mut dyn TelemetryConnection,
    events: &[TelemetryEvent],
) -> conduit_primitives::ConduitResult<()> {
    let envelope = serde_json::json!({ "batch": events });
    let line = serde_json::to_string(&envelope)
        .map_err(|e| conduit_primitives::BackendError::Transport(e.to_string()))?;
    conn.send_line(line).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conduit_primitives::TelemetryEventKind;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    struct RecordingConnection {
        lines: Arc<Mutex<Vec<String>>>,
        fail_sends: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TelemetryConnection for RecordingConnection {
        async fn send_line(&mut self, line: String) -> conduit_primitives::ConduitResult<()> {
            if self.fail_sends.load(Ordering::SeqCst) > 0 {
                self.fail_sends.fetch_sub(1, Ordering::SeqCst);
                return Err(conduit_primitives::BackendError::Transport("simulated".into()).into());
            }
            self.lines.lock().unwrap().push(line);
            Ok(())
        }
    }

    struct RecordingTransport {
        lines: Arc<Mutex<Vec<String>>>,
        fail_sends: Arc<AtomicUsize>,
        connect_attempts: Arc<AtomicUsize>,
        fail_connects: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TelemetryTransport for RecordingTransport {
        async fn connect(&self) -> conduit_primitives::ConduitResult<Box<dyn TelemetryConnection>> {
            self.connect_attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_connects.load(Ordering::SeqCst) > 0 {
                self.fail_connects.fetch_sub(1, Ordering::SeqCst);
                return Err(conduit_primitives::BackendError::Transport("refused".into()).into());
            }
            Ok(Box::new(RecordingConnection {
                lines: self.lines.clone(),
                fail_sends: self.fail_sends.clone(),
            }))
        }
    }

    fn event() -> TelemetryEvent {
        TelemetryEvent::new("node-a", TelemetryEventKind::NodeStatus { status: "ok".into() })
    }

    #[tokio::test]
    async fn emits_directly_when_connected_and_unbuffered() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let transport = Arc::new(RecordingTransport {
            lines: lines.clone(),
            fail_sends: Arc::new(AtomicUsize::new(0)),
            connect_attempts: Arc::new(AtomicUsize::new(0)),
            fail_connects: Arc::new(AtomicUsize::new(0)),
        });

        let emitter = TelemetryEmitter::connect("node-a", transport, BufferingMode::Off).await;
        assert!(emitter.is_connected());
        emitter.emit(event());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(lines.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn drops_events_when_disconnected() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let transport = Arc::new(RecordingTransport {
            lines: lines.clone(),
            fail_sends: Arc::new(AtomicUsize::new(0)),
            connect_attempts: Arc::new(AtomicUsize::new(0)),
            fail_connects: Arc::new(AtomicUsize::new(1)),
        });

        let emitter = TelemetryEmitter::connect("node-a", transport, BufferingMode::Off).await;
        assert!(!emitter.is_connected());
        emitter.emit(event());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(lines.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn buffered_flush_sends_one_envelope() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let transport = Arc::new(RecordingTransport {
            lines: lines.clone(),
            fail_sends: Arc::new(AtomicUsize::new(0)),
            connect_attempts: Arc::new(AtomicUsize::new(0)),
            fail_connects: Arc::new(AtomicUsize::new(0)),
        });

        let emitter = TelemetryEmitter::connect(
            "node-a",
            transport,
            BufferingMode::On(TelemetryBufferConfig {
                batch_size: 2,
                flush_interval: Duration::from_secs(60),
            }),
        )
        .await;

        emitter.emit(event());
        emitter.emit(event());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("\"batch\""));
    }

    #[tokio::test]
    async fn disconnect_suppresses_reconnection() {
        let transport = Arc::new(RecordingTransport {
            lines: Arc::new(Mutex::new(Vec::new())),
            fail_sends: Arc::new(AtomicUsize::new(0)),
            connect_attempts: Arc::new(AtomicUsize::new(0)),
            fail_connects: Arc::new(AtomicUsize::new(0)),
        });
        let emitter = TelemetryEmitter::connect("node-a", transport, BufferingMode::Off).await;
        assert!(emitter.is_connected());
        emitter.disconnect();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(emitter.state(), ConnectionState::Closing);
    }
}
