use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

use conduit_primitives::{BackendError, ConduitError, ConduitResult};

use crate::error::LedgerError;
use crate::store::{LedgerStore, Transfer};

/// `{batchSize, flushIntervalMs}`.
#[derive(Debug, Clone, Copy)]
pub struct BatchWriterConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for BatchWriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_millis(100),
        }
    }
}

struct PendingItem {
    transfers: Vec<Transfer>,
    reply: Option<oneshot::Sender<ConduitResult<()>>>,
}

enum Command {
    Submit {
        transfers: Vec<Transfer>,
        reply: oneshot::Sender<ConduitResult<()>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Size-and-time-bounded batching in front of `LedgerStore::create_transfers_batch`.
///
/// Built as a single owned task driven over an mpsc command queue, in a
/// handle/actor split: the actor task is the only writer of the pending
/// queue, so "only one
/// flush runs at a time" falls out of the model rather than needing an
/// explicit guard flag.
pub struct BatchWriter {
    command_tx: mpsc::UnboundedSender<Command>,
}

impl BatchWriter {
    pub fn spawn(store: Arc<dyn LedgerStore>, config: BatchWriterConfig) -> Arc<Self> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(run(store, config, command_rx));
        Arc::new(Self { command_tx })
    }

    /// Enqueue `transfers` as one unit. Resolves once that unit has been
    /// flushed, with the ledger's result.
    pub async fn submit(&self, transfers: Vec<Transfer>) -> ConduitResult<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Submit { transfers, reply })
            .map_err(|_| ConduitError::Shutdown)?;
        reply_rx.await.map_err(|_| ConduitError::Shutdown)?
    }

    /// Flush remaining work synchronously.
    pub async fn shutdown(&self) {
        let (reply, reply_rx) = oneshot::channel();
        if self.command_tx.send(Command::Shutdown { reply }).is_ok() {
            let _ = reply_rx.await;
        }
    }
}

async fn run(store: Arc<dyn LedgerStore>, config: BatchWriterConfig, mut command_rx: mpsc::UnboundedReceiver<Command>) {
    let mut queue: VecDeque<PendingItem> = VecDeque::new();
    let mut pending_count = 0usize;
    let mut ticker = tokio::time::interval(config.flush_interval);
    ticker.tick().await; // first tick fires immediately; consume it

    loop {
        tokio::select! {
            cmd = command_rx.recv() => {
                match cmd {
                    Some(Command::Submit { transfers, reply }) => {
                        pending_count += transfers.len();
                        queue.push_back(PendingItem { transfers, reply: Some(reply) });
                        if pending_count >= config.batch_size {
                            flush(&store, &mut queue, &mut pending_count).await;
                        }
                    }
                    Some(Command::Shutdown { reply }) => {
                        flush(&store, &mut queue, &mut pending_count).await;
                        let _ = reply.send(());
                        return;
                    }
                    None => {
                        flush(&store, &mut queue, &mut pending_count).await;
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                flush(&store, &mut queue, &mut pending_count).await;
            }
        }
    }
}

async fn flush(store: &Arc<dyn LedgerStore>, queue: &mut VecDeque<PendingItem>, pending_count: &mut usize) {
    if queue.is_empty() {
        return;
    }
    let items: Vec<PendingItem> = queue.drain(..).collect();
    *pending_count = 0;

    let all_transfers: Vec<Transfer> = items.iter().flat_map(|i| i.transfers.clone()).collect();

    match store.create_transfers_batch(all_transfers).await {
        Ok(results) => {
            let mut offset = 0;
            for item in items {
                let len = item.transfers.len();
                let slice = &results[offset..offset + len];
                offset += len;

                let outcome = slice
                    .iter()
                    .find(|r| !matches!(r, Ok(()) | Err(LedgerError::AlreadyExists)));

                let result = match outcome {
                    None => Ok(()),
                    Some(Err(e)) => Err(ConduitError::Backend(BackendError::Ledger(e.to_string()))),
                    Some(Ok(())) => unreachable!(),
                };

                if let Some(reply) = item.reply {
                    let _ = reply.send(result);
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "batch flush failed, re-queueing");
            for item in items.into_iter().rev() {
                let transfers = item.transfers.clone();
                if let Some(reply) = item.reply {
                    let _ = reply.send(Err(ConduitError::Backend(BackendError::Ledger(e.to_string()))));
                }
                *pending_count += transfers.len();
                queue.push_front(PendingItem { transfers, reply: None });
            }
            if queue.len() > 10_000 {
                error!("batch writer queue growing unbounded, dropping oldest entries");
                queue.truncate(10_000);
            }
        }
    }
}
