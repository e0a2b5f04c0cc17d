use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

use conduit_primitives::{BackendError, ConduitResult};

/// One open connection to the telemetry consumer: a single outbound text
/// line per call.
#[async_trait]
pub trait TelemetryConnection: Send {
    async fn send_line(&mut self, line: String) -> ConduitResult<()>;
}

/// How [`crate::TelemetryEmitter`] obtains a fresh [`TelemetryConnection`].
/// Production use is [`TcpLineTransport`]; tests supply an in-memory double.
#[async_trait]
pub trait TelemetryTransport: Send + Sync {
    async fn connect(&self) -> ConduitResult<Box<dyn TelemetryConnection>>;
}

/// Newline-delimited JSON over a plain TCP socket.
pub struct TcpLineTransport {
    addr: String,
}

impl TcpLineTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl TelemetryTransport for TcpLineTransport {
    async fn connect(&self) -> ConduitResult<Box<dyn TelemetryConnection>> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        let framed = Framed::new(stream, LinesCodec::new());
        Ok(Box::new(TcpLineConnection { framed }))
    }
}

struct TcpLineConnection {
    framed: Framed<TcpStream, LinesCodec>,
}

#[async_trait]
impl TelemetryConnection for TcpLineConnection {
    async fn send_line(&mut self, line: String) -> ConduitResult<()> {
        self.framed
            .send(line)
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Ok(())
    }
}
