use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

use conduit_primitives::{ConduitResult, TelemetryEvent};

/// Opaque flush callback: given a batch of events, serialize and send them
/// however the emitter sees fit` so the emitter can choose the wire shape").
pub type FlushFn = Arc<dyn Fn(Vec<TelemetryEvent>) -> BoxFuture<'static, ConduitResult<()>> + Send + Sync>;

/// `{batchSize, flushIntervalMs}`.
#[derive(Debug, Clone, Copy)]
pub struct TelemetryBufferConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for TelemetryBufferConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_millis(100),
        }
    }
}

enum Command {
    Push(TelemetryEvent),
    Shutdown { reply: oneshot::Sender<()> },
}

/// Size-and-time-bounded batching of telemetry events.
///
/// Identical flushing contract to `conduit_ledger::BatchWriter` — same
/// size/interval bounds, single-flight flush, re-queue on failure — but its
/// own struct rather than a shared generic, since the flush targets differ
/// (a `LedgerStore` batch call vs. an arbitrary `flushFn`). The ingestion
/// side differs too: nothing here waits for a flush to complete, because the
/// emitter that owns this buffer must stay non-blocking.
pub struct TelemetryBuffer {
    command_tx: mpsc::UnboundedSender<Command>,
}

impl TelemetryBuffer {
    pub fn spawn(config: TelemetryBufferConfig, flush_fn: FlushFn) -> Arc<Self> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(run(config, flush_fn, command_rx));
        Arc::new(Self { command_tx })
    }

    /// Enqueue `event`. Never blocks and never fails loudly: a full or
    /// closed actor just drops the event, matching the non-blocking-emit
    /// guarantee of the emitter that owns this buffer.
    pub fn push(&self, event: TelemetryEvent) {
        if self.command_tx.send(Command::Push(event)).is_err() {
            tracing::debug!("telemetry buffer closed, dropping event");
        }
    }

    /// Flush remaining events synchronously.
    pub async fn shutdown(&self) {
        let (reply, reply_rx) = oneshot::channel();
        if self.command_tx.send(Command::Shutdown { reply }).is_ok() {
            let _ = reply_rx.await;
        }
    }
}

async fn run(config: TelemetryBufferConfig, flush_fn: FlushFn, mut command_rx: mpsc::UnboundedReceiver<Command>) {
    let mut queue: VecDeque<TelemetryEvent> = VecDeque::new();
    let mut ticker = tokio::time::interval(config.flush_interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            cmd = command_rx.recv() => {
                match cmd {
                    Some(Command::Push(event)) => {
                        queue.push_back(event);
                        if queue.len() >= config.batch_size {
                            flush(&flush_fn, &mut queue).await;
                        }
                    }
                    Some(Command::Shutdown { reply }) => {
                        flush(&flush_fn, &mut queue).await;
                        let _ = reply.send(());
                        return;
                    }
                    None => {
                        flush(&flush_fn, &mut queue).await;
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                flush(&flush_fn, &mut queue).await;
            }
        }
    }
}

async fn flush(flush_fn: &FlushFn, queue: &mut VecDeque<TelemetryEvent>) {
    if queue.is_empty() {
        return;
    }
    let batch: Vec<TelemetryEvent> = queue.drain(..).collect();

    if let Err(e) = flush_fn(batch.clone()).await {
        warn!(error = %e, "telemetry batch flush failed, re-queueing");
        for event in batch.into_iter().rev() {
            queue.push_front(event);
        }
        if queue.len() > 10_000 {
            error!("telemetry buffer growing unbounded, dropping oldest entries");
            queue.truncate(10_000);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use conduit_primitives::TelemetryEventKind;

    fn event(n: u32) -> TelemetryEvent {
        TelemetryEvent::new(
            "node-a".to_string(),
            TelemetryEventKind::NodeStatus { status: n.to_string() },
        )
    }

    #[tokio::test]
    async fn flushes_on_batch_size() {
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let flushed2 = flushed.clone();
        let flush_fn: FlushFn = Arc::new(move |batch| {
            let flushed2 = flushed2.clone();
            Box::pin(async move {
                flushed2.lock().unwrap().extend(batch);
                Ok(())
            })
        });

        let buffer = TelemetryBuffer::spawn(
            TelemetryBufferConfig {
                batch_size: 3,
                flush_interval: Duration::from_secs(60),
            },
            flush_fn,
        );

        for i in 0..3 {
            buffer.push(event(i));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(flushed.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn shutdown_flushes_remaining() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let flush_fn: FlushFn = Arc::new(move |batch| {
            let count2 = count2.clone();
            Box::pin(async move {
                count2.fetch_add(batch.len(), Ordering::SeqCst);
                Ok(())
            })
        });

        let buffer = TelemetryBuffer::spawn(
            TelemetryBufferConfig {
                batch_size: 100,
                flush_interval: Duration::from_secs(60),
            },
            flush_fn,
        );

        buffer.push(event(1));
        buffer.push(event(2));
        buffer.shutdown().await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_flush_is_requeued() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts2 = attempts.clone();
        let flush_fn: FlushFn = Arc::new(move |_batch| {
            let attempts2 = attempts2.clone();
            Box::pin(async move {
                let n = attempts2.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(conduit_primitives::ConduitError::Internal("boom".into()))
                } else {
                    Ok(())
                }
            })
        });

        let buffer = TelemetryBuffer::spawn(
            TelemetryBufferConfig {
                batch_size: 1,
                flush_interval: Duration::from_millis(20),
            },
            flush_fn,
        );

        buffer.push(event(1));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(attempts.load(Ordering::SeqCst) >= 2);
    }
}
