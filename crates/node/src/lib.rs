//! Orchestration, configuration, and the administrative gRPC surface for
//! the conduit connector.
//!
//! Every leaf crate (`conduit-primitives` through `conduit-metrics`) is
//! independently testable; this crate's only job is wiring them together in
//! the right order and exposing that wiring to an operator via `clap`
//! configuration and an admin RPC service.

mod admin;
mod config;
mod orchestrator;

pub use admin::AdminServiceImpl;
pub use config::{ConfigOverrides, NodeConfig, NodeConfigError};
pub use orchestrator::{Orchestrator, OrchestratorDeps};

/// Generated from `proto/admin.proto` by `build.rs`.
pub mod proto {
    tonic::include_proto!("conduit.admin.v1");

    /// Used by `tonic-reflection` so `grpcurl`-style clients can discover
    /// the service without a local copy of the `.proto` file.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("conduit_admin_descriptor");
}
