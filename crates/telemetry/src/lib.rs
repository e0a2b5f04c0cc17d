//! Telemetry buffering, reconnecting emission, and the structured-log
//! bridge.

mod buffer;
mod emitter;
mod log_bridge;
mod transport;

pub use buffer::{FlushFn, TelemetryBuffer, TelemetryBufferConfig};
pub use emitter::{BufferingMode, ConnectionState, TelemetryEmitter};
pub use log_bridge::TelemetryLogLayer;
pub use transport::{TcpLineTransport, TelemetryConnection, TelemetryTransport};
