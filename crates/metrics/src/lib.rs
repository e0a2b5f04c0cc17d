//! Prometheus metrics recorder and the `/health`/`/metrics` HTTP server.
//!
//! `conduit-metrics` has no opinion on what gets recorded: every other
//! crate calls the `metrics` facade macros directly (`metrics::counter!`,
//! `metrics::histogram!`) and this crate only installs the recorder that
//! backs them and serves the scrape endpoint.

mod prometheus;
mod server;

pub use prometheus::{install_recorder, PrometheusRecorder};
pub use server::MetricsServer;
