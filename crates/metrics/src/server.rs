use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Serves `/health` and `/metrics` on `addr`. Not started unless the
/// node configuration enables it; off by default in tests.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: PrometheusHandle,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl MetricsServer {
    pub fn new(addr: SocketAddr, handle: PrometheusHandle) -> Self {
        Self {
            addr,
            handle,
            shutdown_tx: Mutex::new(None),
        }
    }

    /// Bind and spawn the server in the background; returns once the
    /// listener is bound so callers can log the resolved address.
    pub async fn start(&self) -> eyre::Result<()> {
        let state = Arc::new(ServerState {
            handle: self.handle.clone(),
        });

        let app = Router::new()
            .route("/", get(root))
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .with_state(state)
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        tracing::info!(addr = %self.addr, "metrics server listening");

        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(err) = server.await {
                tracing::error!(%err, "metrics server exited with an error");
            }
        });

        Ok(())
    }

    /// Signal the background server to stop accepting new connections and
    /// finish in-flight ones.
    pub fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
    }
}

#[derive(Clone)]
struct ServerState {
    handle: PrometheusHandle,
}

async fn root() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head><title>Conduit Metrics</title></head>
<body>
<h1>Conduit Metrics</h1>
<ul>
<li><a href="/metrics">Prometheus Metrics</a></li>
<li><a href="/health">Health Check</a></li>
</ul>
</body>
</html>"#,
    )
}

async fn metrics_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    state.handle.render()
}

async fn health_handler() -> impl IntoResponse {
    "OK"
}
