//! Packet admission, decode, routing, and settlement-accounting
//! orchestration for the conduit connector.

mod pipeline;
mod routing_table;
mod transport;
mod worker_pool;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use pipeline::{PacketPipeline, PipelineConfig};
pub use routing_table::{RouteEntry, RoutingTable};
pub use transport::PeerTransport;
pub use worker_pool::{DecodeFn, DecodedPacket, WorkerPool, DEFAULT_MAX_QUEUE_SIZE};
