use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use lfs_api::NegotiatedObject;
use lfs_types::{Direction, Oid};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, TransferError};
use crate::progress::ProgressCallback;
use crate::transferable::Transferable;

/// An authorized transfer handed to an adapter.
#[derive(Clone, Debug)]
pub struct Transfer {
    pub name: String,
    pub oid: Oid,
    pub size: u64,
    pub path: PathBuf,
    /// The server's answer for this object, including its actions.
    pub object: NegotiatedObject,
}

impl Transfer {
    pub fn new(item: &dyn Transferable, object: NegotiatedObject) -> Self {
        Self {
            name: item.name().to_string(),
            oid: item.oid(),
            size: item.size(),
            path: item.path().to_path_buf(),
            object,
        }
    }
}

/// Outcome of one attempt at one transfer.
#[derive(Debug)]
pub struct TransferResult {
    pub transfer: Transfer,
    pub error: Option<TransferError>,
}

/// A transport strategy, selected at run time by the name the server picks.
///
/// `begin` may be called again after `end`. Every transfer passed to `add`
/// produces exactly one [`TransferResult`] on the returned channel, in
/// completion order; the channel closes after the last one.
#[async_trait]
pub trait TransferAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn direction(&self) -> Direction;

    async fn begin(
        &self,
        concurrency: usize,
        progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<()>;

    async fn add(&self, transfers: Vec<Transfer>) -> Result<mpsc::Receiver<TransferResult>>;

    /// Stop the workers once queued work has drained.
    async fn end(&self);
}

/// Moves the bytes of a single object. A worker runs one call to
/// completion before taking the next job.
#[async_trait]
pub trait ObjectTransfer: Send + Sync + 'static {
    async fn transfer(&self, transfer: &Transfer, progress: &ProgressCallback) -> Result<()>;
}

struct Job {
    transfer: Transfer,
    results: mpsc::Sender<TransferResult>,
}

struct Pool {
    jobs: mpsc::UnboundedSender<Job>,
    workers: Vec<JoinHandle<()>>,
}

/// Worker pool shared by adapters: `concurrency` tasks pull jobs from one
/// queue and run them through an [`ObjectTransfer`].
pub struct AdapterBase<W: ObjectTransfer> {
    name: String,
    direction: Direction,
    worker: Arc<W>,
    pool: Mutex<Option<Pool>>,
}

impl<W: ObjectTransfer> AdapterBase<W> {
    pub fn new(name: impl Into<String>, direction: Direction, worker: W) -> Self {
        Self {
            name: name.into(),
            direction,
            worker: Arc::new(worker),
            pool: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Pool>> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<W: ObjectTransfer> TransferAdapter for AdapterBase<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    async fn begin(
        &self,
        concurrency: usize,
        progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut pool = self.lock();
        if pool.is_some() {
            return Ok(());
        }

        let concurrency = concurrency.max(1);
        let (jobs, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let workers = (0..concurrency)
            .map(|id| {
                let rx = Arc::clone(&rx);
                let worker = Arc::clone(&self.worker);
                let progress = Arc::clone(&progress);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    loop {
                        let job = rx.lock().await.recv().await;
                        let Some(job) = job else { break };
                        let oid = job.transfer.oid;
                        let error = if cancel.is_cancelled() {
                            Some(TransferError::Cancelled { oid })
                        } else {
                            worker.transfer(&job.transfer, &progress).await.err()
                        };
                        if job
                            .results
                            .send(TransferResult {
                                transfer: job.transfer,
                                error,
                            })
                            .await
                            .is_err()
                        {
                            warn!(worker = id, %oid, "result dropped, receiver gone");
                        }
                    }
                    debug!(worker = id, "transfer worker stopped");
                })
            })
            .collect();

        debug!(adapter = %self.name, direction = %self.direction, concurrency, "adapter started");
        *pool = Some(Pool { jobs, workers });
        Ok(())
    }

    async fn add(&self, transfers: Vec<Transfer>) -> Result<mpsc::Receiver<TransferResult>> {
        let jobs = self.lock().as_ref().map(|pool| pool.jobs.clone());
        let Some(jobs) = jobs else {
            return Err(TransferError::NotStarted(self.name.clone()));
        };

        let (tx, rx) = mpsc::channel(transfers.len().max(1));
        for transfer in transfers {
            if let Err(mpsc::error::SendError(job)) = jobs.send(Job {
                transfer,
                results: tx.clone(),
            }) {
                let oid = job.transfer.oid;
                let result = TransferResult {
                    transfer: job.transfer,
                    error: Some(TransferError::NotStarted(self.name.clone())),
                };
                if tx.send(result).await.is_err() {
                    warn!(%oid, "result dropped, receiver gone");
                }
            }
        }
        Ok(rx)
    }

    async fn end(&self) {
        let pool = self.lock().take();
        let Some(pool) = pool else {
            return;
        };
        drop(pool.jobs);
        for worker in pool.workers {
            if let Err(e) = worker.await {
                warn!(adapter = %self.name, error = %e, "transfer worker failed");
            }
        }
        debug!(adapter = %self.name, "adapter ended");
    }
}
