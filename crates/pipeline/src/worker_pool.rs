use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::error;

use conduit_primitives::{ConduitError, ConduitResult};

/// Default bound on the coordinator's pending-task queue.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000;

pub type DecodeFn = Arc<dyn Fn(Vec<u8>) -> ConduitResult<DecodedPacket> + Send + Sync>;

/// What the worker produces from raw packet bytes: destination, amount, and
/// expiry, as consumed by `PacketPipeline` step 4 onward.
#[derive(Debug, Clone)]
pub struct DecodedPacket {
    pub destination: String,
    pub amount: conduit_primitives::Amount,
    pub expires_at: Option<time::OffsetDateTime>,
}

struct Job {
    data: Vec<u8>,
    reply: oneshot::Sender<ConduitResult<DecodedPacket>>,
}

enum Coordinator {
    Execute { data: Vec<u8>, reply: oneshot::Sender<ConduitResult<DecodedPacket>> },
    WorkerFree { worker: usize },
    WorkerCrashed { worker: usize },
    Shutdown,
}

/// Fixed worker set, round-robin scheduling over non-busy workers, and a
/// bounded FIFO ahead of them.
///
/// Named spawns on a shared runtime handle, crashed tasks logged rather
/// than silently dropped, generalized into a small actor: a single
/// coordinator task owns the queue and the busy/free bookkeeping so none of
/// that state needs a lock, and workers report back over the same command
/// channel instead of the coordinator polling them.
pub struct WorkerPool {
    command_tx: mpsc::UnboundedSender<Coordinator>,
    processed: Arc<AtomicUsize>,
    shutting_down: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn spawn(worker_count: usize, max_queue_size: usize, decode: DecodeFn) -> Arc<Self> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let processed = Arc::new(AtomicUsize::new(0));
        let shutting_down = Arc::new(AtomicBool::new(false));

        let mut worker_txs = Vec::with_capacity(worker_count);
        for idx in 0..worker_count {
            let (job_tx, job_rx) = mpsc::unbounded_channel::<Job>();
            worker_txs.push(job_tx);
            spawn_worker(idx, job_rx, command_tx.clone(), decode.clone(), processed.clone());
        }

        tokio::spawn(run_coordinator(
            command_rx,
            worker_txs,
            max_queue_size,
            shutting_down.clone(),
        ));

        Arc::new(Self {
            command_tx,
            processed,
            shutting_down,
        })
    }

    /// Enqueue `data` for decode/validate. Fails synchronously with
    /// `ConduitError::Internal` if the queue is full.
    pub async fn execute(&self, data: Vec<u8>) -> ConduitResult<DecodedPacket> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(ConduitError::Shutdown);
        }
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Coordinator::Execute { data, reply })
            .map_err(|_| ConduitError::Shutdown)?;
        reply_rx.await.map_err(|_| ConduitError::Shutdown)?
    }

    pub fn processed_count(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    /// Reject pending/queued tasks with a shutdown error and stop accepting
    /// new work.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        let _ = self.command_tx.send(Coordinator::Shutdown);
    }
}

fn spawn_worker(
    idx: usize,
    mut job_rx: mpsc::UnboundedReceiver<Job>,
    command_tx: mpsc::UnboundedSender<Coordinator>,
    decode: DecodeFn,
    processed: Arc<AtomicUsize>,
) {
    tokio::spawn(async move {
        while let Some(job) = job_rx.recv().await {
            let result = std::panic::AssertUnwindSafe(|| decode(job.data));
            let outcome = std::panic::catch_unwind(result);
            match outcome {
                Ok(result) => {
                    processed.fetch_add(1, Ordering::Relaxed);
                    let _ = job.reply.send(result);
                }
                Err(_) => {
                    error!(worker = idx, "worker panicked decoding packet");
                    let _ = job.reply.send(Err(ConduitError::Internal("worker panicked".into())));
                }
            }
            if command_tx.send(Coordinator::WorkerFree { worker: idx }).is_err() {
                break;
            }
        }
    });
}

async fn run_coordinator(
    mut command_rx: mpsc::UnboundedReceiver<Coordinator>,
    worker_txs: Vec<mpsc::UnboundedSender<Job>>,
    max_queue_size: usize,
    shutting_down: Arc<AtomicBool>,
) {
    let worker_count = worker_txs.len();
    let mut busy = vec![false; worker_count];
    let mut queue: std::collections::VecDeque<Job> = std::collections::VecDeque::new();
    let mut cursor = 0usize;
    let mut shutting_down_internal = false;

    while let Some(cmd) = command_rx.recv().await {
        match cmd {
            Coordinator::Execute { data, reply } => {
                if shutting_down_internal {
                    let _ = reply.send(Err(ConduitError::Shutdown));
                    continue;
                }
                if let Some(worker) = next_free_worker(&busy, &mut cursor) {
                    busy[worker] = true;
                    if worker_txs[worker].send(Job { data, reply }).is_err() {
                        busy[worker] = false;
                    }
                } else if queue.len() >= max_queue_size {
                    let _ = reply.send(Err(ConduitError::Internal("worker queue full".into())));
                } else {
                    queue.push_back(Job { data, reply });
                }
            }
            Coordinator::WorkerFree { worker } => {
                busy[worker] = false;
                if let Some(job) = queue.pop_front() {
                    busy[worker] = true;
                    if worker_txs[worker].send(job).is_err() {
                        busy[worker] = false;
                    }
                }
            }
            Coordinator::WorkerCrashed { worker } => {
                busy[worker] = false;
                error!(worker, "worker pool member exited unexpectedly");
            }
            Coordinator::Shutdown => {
                shutting_down_internal = true;
                shutting_down.store(true, Ordering::Release);
                for job in queue.drain(..) {
                    let _ = job.reply.send(Err(ConduitError::Shutdown));
                }
            }
        }
    }
}

fn next_free_worker(busy: &[bool], cursor: &mut usize) -> Option<usize> {
    let n = busy.len();
    for offset in 0..n {
        let idx = (*cursor + offset) % n;
        if !busy[idx] {
            *cursor = (idx + 1) % n;
            return Some(idx);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_decoder() -> DecodeFn {
        Arc::new(|data: Vec<u8>| {
            Ok(DecodedPacket {
                destination: String::from_utf8_lossy(&data).into_owned(),
                amount: data.len() as u128,
                expires_at: None,
            })
        })
    }

    #[tokio::test]
    async fn executes_and_returns_result() {
        let pool = WorkerPool::spawn(2, 10, echo_decoder());
        let result = pool.execute(b"g.alice".to_vec()).await.unwrap();
        assert_eq!(result.destination, "g.alice");
    }

    #[tokio::test]
    async fn round_robins_across_workers() {
        let pool = WorkerPool::spawn(4, 100, echo_decoder());
        let mut handles = Vec::new();
        for i in 0..20 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move { pool.execute(vec![i]).await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(pool.processed_count(), 20);
    }

    #[tokio::test]
    async fn rejects_after_shutdown() {
        let pool = WorkerPool::spawn(1, 10, echo_decoder());
        pool.shutdown();
        let result = pool.execute(b"x".to_vec()).await;
        assert!(matches!(result, Err(ConduitError::Shutdown)));
    }

    #[tokio::test]
    async fn queue_full_fails_synchronously() {
        let blocking = Arc::new(move |data: Vec<u8>| -> ConduitResult<DecodedPacket> {
            std::thread::sleep(std::time::Duration::from_millis(200));
            Ok(DecodedPacket {
                destination: String::from_utf8_lossy(&data).into_owned(),
                amount: 0,
                expires_at: None,
            })
        });
        let pool = WorkerPool::spawn(1, 1, blocking);

        // One worker, one queue slot: first call occupies the worker, the
        // second fills the queue, the third should see it full.
        let pool1 = pool.clone();
        let _first = tokio::spawn(async move { pool1.execute(b"a".to_vec()).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let pool2 = pool.clone();
        let _second = tokio::spawn(async move { pool2.execute(b"b".to_vec()).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let third = pool.execute(b"c".to_vec()).await;
        assert!(third.is_err());
    }
}
