use std::sync::atomic::{AtomicBool, Ordering};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use metrics_util::layers::{PrefixLayer, Stack};
use once_cell::sync::OnceCell;

static RECORDER: OnceCell<PrometheusRecorder> = OnceCell::new();

/// Install the process-wide Prometheus recorder, prefixing every metric
/// name with `prefix`.
///
/// Idempotent: subsequent calls return the recorder installed by the first
/// one regardless of the `prefix` argument they pass, since `metrics` only
/// supports a single global recorder per process.
pub fn install_recorder(prefix: &str) -> PrometheusRecorder {
    RECORDER
        .get_or_init(|| PrometheusRecorder::install(prefix).expect("failed to install prometheus recorder"))
        .clone()
}

/// A handle to the installed recorder, plus the upkeep task that ages out
/// stale histogram buckets.
#[derive(Clone)]
pub struct PrometheusRecorder {
    handle: PrometheusHandle,
    upkeep_started: std::sync::Arc<AtomicBool>,
}

impl std::fmt::Debug for PrometheusRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusRecorder")
            .field("upkeep_started", &self.upkeep_started.load(Ordering::Relaxed))
            .finish()
    }
}

impl PrometheusRecorder {
    fn install(prefix: &str) -> eyre::Result<Self> {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        Stack::new(recorder).push(PrefixLayer::new(prefix)).install()?;

        Ok(Self {
            handle,
            upkeep_started: std::sync::Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn handle(&self) -> &PrometheusHandle {
        &self.handle
    }

    /// Periodically age out idle histogram buckets; called once at startup.
    pub fn spawn_upkeep(&self, interval: std::time::Duration) {
        if self
            .upkeep_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let handle = self.handle.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                handle.run_upkeep();
            }
        });
    }
}
