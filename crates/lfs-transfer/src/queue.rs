use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lfs_api::{BatchRequest, NegotiatedObject, Negotiator};
use lfs_types::{Direction, Oid};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::{Transfer, TransferAdapter, TransferResult};
use crate::batch::Batch;
use crate::config::{RetryClassifier, TransferConfig};
use crate::error::{Result, TransferError};
use crate::manifest::AdapterManifest;
use crate::progress::{meter_callback, NoopMeter, ProgressMeter};
use crate::retry::RetryCounter;
use crate::transferable::Transferable;

/// Lifecycle of a [`TransferQueue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueState {
    /// Accepting `add`.
    Open,
    /// `wait` was called. No new objects, but retries still run.
    Draining,
    /// Every object has an outcome and all channels are closed.
    Closed,
}

/// Final state of one object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    /// Nothing to transfer.
    Skipped,
    Failed,
}

/// Counters for one queue run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub batches: u64,
    pub succeeded: u64,
    pub skipped: u64,
    pub failed: u64,
    pub bytes_skipped: u64,
    pub retries: u64,
}

#[derive(Default)]
struct StatsInner {
    batches: AtomicU64,
    succeeded: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    bytes_skipped: AtomicU64,
    retries: AtomicU64,
}

impl StatsInner {
    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    fn snapshot(&self) -> QueueStats {
        QueueStats {
            batches: self.batches.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            bytes_skipped: self.bytes_skipped.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

struct Entry {
    item: Arc<dyn Transferable>,
    /// Other names the same oid was added under.
    aliases: Vec<String>,
    outcome: Option<Outcome>,
}

/// State shared between the queue handle and its batching task.
struct Shared {
    direction: Direction,
    negotiator: Arc<dyn Negotiator>,
    manifest: AdapterManifest,
    config: TransferConfig,
    classifier: RetryClassifier,
    retries: RetryCounter,
    meter: Arc<dyn ProgressMeter>,
    registry: Mutex<HashMap<Oid, Entry>>,
    /// Objects accepted but without an outcome yet.
    pending: AtomicUsize,
    errorc: Mutex<Option<mpsc::UnboundedSender<TransferError>>>,
    watchers: Mutex<Vec<mpsc::UnboundedSender<Oid>>>,
    stats: StatsInner,
    cancel: CancellationToken,
}

struct Startup {
    incoming: mpsc::Receiver<Arc<dyn Transferable>>,
    errors: mpsc::UnboundedReceiver<TransferError>,
}

/// Batches objects through negotiation and drives the authorized ones
/// through a transfer adapter, retrying within a per-object budget.
///
/// Objects are negotiated once a batch fills up or [`TransferQueue::wait`]
/// is called. Each accepted oid ends in exactly one [`Outcome`]. Terminal
/// errors are collected and available from [`TransferQueue::errors`] once
/// `wait` returns; completed oids are sent to every [`TransferQueue::watch`]
/// channel as they finish.
///
/// Must be used from within a Tokio runtime.
pub struct TransferQueue {
    shared: Arc<Shared>,
    incoming: Mutex<Option<mpsc::Sender<Arc<dyn Transferable>>>>,
    startup: Mutex<Option<Startup>>,
    batcher: Mutex<Option<JoinHandle<()>>>,
    collector: Mutex<Option<JoinHandle<()>>>,
    errors: Arc<Mutex<Vec<Arc<TransferError>>>>,
    state: Mutex<QueueState>,
    wait_lock: tokio::sync::Mutex<()>,
}

impl TransferQueue {
    pub fn new(
        direction: Direction,
        negotiator: Arc<dyn Negotiator>,
        manifest: AdapterManifest,
        config: TransferConfig,
    ) -> Self {
        let config = config.normalized();
        let (incoming_tx, incoming_rx) = mpsc::channel(config.buffer_depth);
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let shared = Shared {
            direction,
            negotiator,
            manifest,
            classifier: RetryClassifier::from(&config.retry),
            retries: RetryCounter::new(config.max_attempts),
            config,
            meter: Arc::new(NoopMeter),
            registry: Mutex::new(HashMap::new()),
            pending: AtomicUsize::new(0),
            errorc: Mutex::new(Some(error_tx)),
            watchers: Mutex::new(Vec::new()),
            stats: StatsInner::default(),
            cancel: CancellationToken::new(),
        };
        Self {
            shared: Arc::new(shared),
            incoming: Mutex::new(Some(incoming_tx)),
            startup: Mutex::new(Some(Startup {
                incoming: incoming_rx,
                errors: error_rx,
            })),
            batcher: Mutex::new(None),
            collector: Mutex::new(None),
            errors: Arc::new(Mutex::new(Vec::new())),
            state: Mutex::new(QueueState::Open),
            wait_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Report progress to `meter`. Only takes effect before the first
    /// `add`.
    pub fn with_progress(mut self, meter: Arc<dyn ProgressMeter>) -> Self {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => shared.meter = meter,
            None => warn!("progress meter set after the queue started, ignoring"),
        }
        self
    }

    pub fn direction(&self) -> Direction {
        self.shared.direction
    }

    /// A channel of oids that completed successfully. Register before the
    /// first `add` to see every completion. Closed when the queue closes.
    pub fn watch(&self) -> mpsc::UnboundedReceiver<Oid> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.state() != QueueState::Closed {
            lock(&self.shared.watchers).push(tx);
        }
        rx
    }

    /// Token that, once cancelled, fails every object not yet started.
    pub fn cancel_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Queue `item` for transfer. Waits while the incoming buffer is full.
    ///
    /// An oid that is already queued is not transferred again; `item`'s
    /// name is recorded as an alias of the existing entry.
    pub async fn add(&self, item: Arc<dyn Transferable>) -> Result<()> {
        let sender = lock(&self.incoming).clone().ok_or(TransferError::QueueClosed)?;
        self.start();

        let oid = item.oid();
        if !self.shared.register(&item) {
            return Ok(());
        }
        self.shared.meter.add(item.size());
        if sender.send(item).await.is_err() {
            self.shared.unregister(&oid);
            return Err(TransferError::QueueClosed);
        }
        Ok(())
    }

    /// Stop accepting objects and wait until every accepted object has an
    /// outcome. Safe to call more than once.
    pub async fn wait(&self) {
        let _guard = self.wait_lock.lock().await;
        if self.state() == QueueState::Closed {
            return;
        }
        self.start();
        self.set_state(QueueState::Draining);
        drop(lock(&self.incoming).take());

        let batcher = lock(&self.batcher).take();
        if let Some(batcher) = batcher {
            if let Err(e) = batcher.await {
                warn!(error = %e, "batching loop failed");
            }
        }
        let abandoned = self.shared.abandon_unfinished();
        if abandoned != 0 {
            warn!(abandoned, "batching loop stopped before every object finished");
        }

        drop(lock(&self.shared.errorc).take());
        let collector = lock(&self.collector).take();
        if let Some(collector) = collector {
            if let Err(e) = collector.await {
                warn!(error = %e, "error collector failed");
            }
        }

        lock(&self.shared.watchers).clear();
        self.shared.meter.finish();
        self.set_state(QueueState::Closed);

        let stats = self.stats();
        info!(
            direction = %self.shared.direction,
            batches = stats.batches,
            succeeded = stats.succeeded,
            skipped = stats.skipped,
            failed = stats.failed,
            retries = stats.retries,
            "transfer queue closed"
        );
    }

    /// Terminal errors, one per failed object.
    pub fn errors(&self) -> Vec<Arc<TransferError>> {
        lock(&self.errors).clone()
    }

    /// Errors the caller should stop on. With `skip_download_errors` set, a
    /// download queue reports its failures through [`TransferQueue::errors`]
    /// only.
    pub fn fatal_errors(&self) -> Vec<Arc<TransferError>> {
        if self.shared.direction == Direction::Download && self.shared.config.skip_download_errors {
            return Vec::new();
        }
        self.errors()
    }

    /// Final outcome of every object that has one.
    pub fn outcomes(&self) -> HashMap<Oid, Outcome> {
        lock(&self.shared.registry)
            .iter()
            .filter_map(|(oid, entry)| entry.outcome.map(|o| (*oid, o)))
            .collect()
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.stats.snapshot()
    }

    pub fn state(&self) -> QueueState {
        *lock(&self.state)
    }

    /// Objects accepted but not yet finished.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: QueueState) {
        *lock(&self.state) = state;
    }

    /// Spawn the batching loop and the error collector on first use.
    fn start(&self) {
        let Some(startup) = lock(&self.startup).take() else {
            return;
        };
        self.shared.meter.start();

        let errors = Arc::clone(&self.errors);
        let mut error_rx = startup.errors;
        let collector = tokio::spawn(async move {
            while let Some(err) = error_rx.recv().await {
                lock(&errors).push(Arc::new(err));
            }
        });
        *lock(&self.collector) = Some(collector);

        let shared = Arc::clone(&self.shared);
        let batcher = tokio::spawn(run_batches(shared, startup.incoming));
        *lock(&self.batcher) = Some(batcher);
    }
}

async fn run_batches(shared: Arc<Shared>, mut incoming: mpsc::Receiver<Arc<dyn Transferable>>) {
    let mut session = AdapterSession::default();
    let mut retries: VecDeque<Arc<dyn Transferable>> = VecDeque::new();
    let mut closed = false;

    loop {
        let mut batch = Batch::new(shared.config.batch_size);
        while !batch.is_full() {
            match retries.pop_front() {
                Some(item) => batch.push(item),
                None => break,
            }
        }
        while !batch.is_full() && !closed {
            match incoming.recv().await {
                Some(item) => batch.push(item),
                None => closed = true,
            }
        }
        if batch.is_empty() {
            break;
        }
        let retry = shared.process(&mut session, batch).await;
        retries.extend(retry);
    }

    session.end().await;
}

/// The adapter currently in use by the batching loop.
#[derive(Default)]
struct AdapterSession {
    current: Option<Arc<dyn TransferAdapter>>,
}

impl AdapterSession {
    /// Return the adapter for `name`, ending the current one first if the
    /// server switched.
    async fn use_adapter(&mut self, shared: &Shared, name: &str) -> Result<Arc<dyn TransferAdapter>> {
        let resolved = shared
            .manifest
            .resolve(name, shared.direction)
            .ok_or_else(|| TransferError::UnknownAdapter(name.to_string()))?;
        if let Some(current) = &self.current {
            if current.name() == resolved {
                return Ok(Arc::clone(current));
            }
            info!(from = current.name(), to = %resolved, "switching transfer adapter");
        }
        self.end().await;

        let adapter = shared
            .manifest
            .new_adapter(&resolved, shared.direction)
            .ok_or_else(|| TransferError::UnknownAdapter(resolved.clone()))?;
        adapter
            .begin(
                shared.config.concurrent_transfers,
                meter_callback(Arc::clone(&shared.meter)),
                shared.cancel.child_token(),
            )
            .await?;
        info!(
            adapter = %resolved,
            direction = %shared.direction,
            workers = shared.config.concurrent_transfers,
            "transfer adapter started"
        );
        self.current = Some(Arc::clone(&adapter));
        Ok(adapter)
    }

    async fn end(&mut self) {
        if let Some(adapter) = self.current.take() {
            adapter.end().await;
            debug!(adapter = adapter.name(), "transfer adapter ended");
        }
    }
}

impl Shared {
    /// Negotiate one batch and run its transfers. Returns the objects to
    /// try again in the next batch.
    async fn process(&self, session: &mut AdapterSession, mut batch: Batch) -> Vec<Arc<dyn Transferable>> {
        if self.cancel.is_cancelled() {
            for item in batch {
                let oid = item.oid();
                self.fail(&oid, TransferError::Cancelled { oid });
            }
            return Vec::new();
        }

        batch.sort_largest_first();
        let request = BatchRequest::new(
            self.direction,
            batch.specs(),
            self.manifest.advertised(self.direction, &self.config),
        );
        StatsInner::bump(&self.stats.batches, 1);
        debug!(objects = batch.len(), operation = %self.direction, "sending batch");

        let response = match self.negotiator.negotiate(&request).await {
            Ok(response) => response,
            Err(e) => {
                let retriable = self.classifier.is_retriable(&e);
                warn!(error = %e, retriable, objects = batch.len(), "batch negotiation failed");
                let source = Arc::new(e);
                let mut retry = Vec::new();
                for item in batch {
                    let oid = item.oid();
                    let err = TransferError::Negotiation {
                        oid,
                        retriable,
                        source: Arc::clone(&source),
                    };
                    if self.should_retry(&oid, &err) {
                        retry.push(item);
                    } else {
                        self.fail(&oid, err);
                    }
                }
                return retry;
            }
        };

        let adapter_name = response.adapter_name().to_string();
        let mut objects: HashMap<Oid, NegotiatedObject> =
            response.objects.into_iter().map(|o| (o.oid, o)).collect();
        let mut transfers = Vec::new();
        for item in batch {
            let oid = item.oid();
            let Some(mut object) = objects.remove(&oid) else {
                self.fail(&oid, TransferError::MissingFromResponse { oid });
                continue;
            };
            if let Some(err) = object.error.take() {
                self.fail(
                    &oid,
                    TransferError::Object {
                        oid,
                        code: err.code,
                        message: err.message,
                    },
                );
                continue;
            }
            if object.transfer_action(self.direction).is_none() {
                self.skip(&oid, item.size());
                continue;
            }
            transfers.push(Transfer::new(item.as_ref(), object));
        }
        if !objects.is_empty() {
            debug!(extra = objects.len(), "ignoring unrequested objects in batch response");
        }
        if transfers.is_empty() {
            return Vec::new();
        }

        if self.config.dry_run {
            for t in &transfers {
                self.succeed(&t.oid);
            }
            return Vec::new();
        }

        let mut outstanding: HashSet<Oid> = transfers.iter().map(|t| t.oid).collect();
        let mut retry = Vec::new();

        let adapter = match session.use_adapter(self, &adapter_name).await {
            Ok(adapter) => adapter,
            Err(e) => {
                self.fail_outstanding(outstanding, &e, &mut retry);
                return retry;
            }
        };
        for t in &transfers {
            self.meter.start_transfer(&t.name);
        }
        let mut results = match adapter.add(transfers).await {
            Ok(results) => results,
            Err(e) => {
                self.fail_outstanding(outstanding, &e, &mut retry);
                return retry;
            }
        };

        while let Some(result) = results.recv().await {
            outstanding.remove(&result.transfer.oid);
            if let Some(item) = self.handle_result(result) {
                retry.push(item);
            }
        }
        for oid in outstanding {
            self.fail(
                &oid,
                TransferError::Adapter {
                    oid,
                    message: format!("adapter {} returned no result", adapter.name()),
                    retriable: false,
                },
            );
        }
        retry
    }

    fn handle_result(&self, result: TransferResult) -> Option<Arc<dyn Transferable>> {
        let oid = result.transfer.oid;
        let Some(err) = result.error else {
            self.succeed(&oid);
            return None;
        };
        match self.item(&oid) {
            Some(item) if self.should_retry(&oid, &err) => Some(item),
            _ => {
                self.fail(&oid, err);
                None
            }
        }
    }

    /// Apply `err` (an adapter-level failure) to every outstanding oid.
    fn fail_outstanding(
        &self,
        outstanding: HashSet<Oid>,
        err: &TransferError,
        retry: &mut Vec<Arc<dyn Transferable>>,
    ) {
        warn!(error = %err, objects = outstanding.len(), "cannot hand batch to adapter");
        for oid in outstanding {
            let err = TransferError::Adapter {
                oid,
                message: err.to_string(),
                retriable: err.is_retriable(),
            };
            match self.item(&oid) {
                Some(item) if self.should_retry(&oid, &err) => retry.push(item),
                _ => self.fail(&oid, err),
            }
        }
    }

    /// Count a failed attempt and decide whether another one is allowed.
    fn should_retry(&self, oid: &Oid, err: &TransferError) -> bool {
        if !err.is_retriable() {
            return false;
        }
        let attempts = self.retries.increment(oid);
        let (_, allowed) = self.retries.can_retry(oid);
        if allowed {
            StatsInner::bump(&self.stats.retries, 1);
            debug!(%oid, attempt = attempts + 1, error = %err, "enqueue retry");
        } else {
            debug!(%oid, attempts, "refusing to retry, too many attempts");
        }
        allowed
    }

    /// Record `item`. Returns `false` if its oid is already known.
    fn register(&self, item: &Arc<dyn Transferable>) -> bool {
        let oid = item.oid();
        let name = item.name();
        let mut registry = lock(&self.registry);
        if let Some(entry) = registry.get_mut(&oid) {
            let already_done = matches!(entry.outcome, Some(Outcome::Succeeded | Outcome::Skipped));
            if entry.item.name() != name && !entry.aliases.iter().any(|a| a == name) {
                entry.aliases.push(name.to_string());
            }
            drop(registry);
            debug!(%oid, name, "coalesced duplicate object");
            if already_done {
                self.meter.finish_transfer(name);
            }
            return false;
        }
        registry.insert(
            oid,
            Entry {
                item: Arc::clone(item),
                aliases: Vec::new(),
                outcome: None,
            },
        );
        self.pending.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Fail every object that still has no outcome. Returns how many.
    fn abandon_unfinished(&self) -> usize {
        let unfinished: Vec<Oid> = lock(&self.registry)
            .iter()
            .filter(|(_, entry)| entry.outcome.is_none())
            .map(|(oid, _)| *oid)
            .collect();
        for oid in &unfinished {
            self.fail(oid, TransferError::Abandoned { oid: *oid });
        }
        unfinished.len()
    }

    fn unregister(&self, oid: &Oid) {
        if lock(&self.registry).remove(oid).is_some() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn item(&self, oid: &Oid) -> Option<Arc<dyn Transferable>> {
        lock(&self.registry).get(oid).map(|e| Arc::clone(&e.item))
    }

    /// Give `oid` its final outcome. Returns `None` if it already had one,
    /// so each oid is closed out exactly once.
    fn close_out(&self, oid: &Oid, outcome: Outcome) -> Option<(Arc<dyn Transferable>, Vec<String>)> {
        let mut registry = lock(&self.registry);
        let entry = registry.get_mut(oid)?;
        if entry.outcome.is_some() {
            return None;
        }
        entry.outcome = Some(outcome);
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Some((Arc::clone(&entry.item), entry.aliases.clone()))
    }

    fn succeed(&self, oid: &Oid) {
        let Some((item, aliases)) = self.close_out(oid, Outcome::Succeeded) else {
            return;
        };
        StatsInner::bump(&self.stats.succeeded, 1);
        self.meter.finish_transfer(item.name());
        for alias in &aliases {
            self.meter.finish_transfer(alias);
        }
        lock(&self.watchers).retain(|w| w.send(*oid).is_ok());
    }

    fn skip(&self, oid: &Oid, size: u64) {
        let Some((_, aliases)) = self.close_out(oid, Outcome::Skipped) else {
            return;
        };
        StatsInner::bump(&self.stats.skipped, 1);
        StatsInner::bump(&self.stats.bytes_skipped, size);
        self.meter.skip(size);
        for alias in &aliases {
            self.meter.finish_transfer(alias);
        }
        debug!(%oid, size, "no transfer needed");
    }

    fn fail(&self, oid: &Oid, err: TransferError) {
        if self.close_out(oid, Outcome::Failed).is_none() {
            return;
        }
        StatsInner::bump(&self.stats.failed, 1);
        debug!(%oid, error = %err, "transfer failed");
        if let Some(tx) = lock(&self.errorc).as_ref() {
            if let Err(e) = tx.send(err) {
                warn!(error = %e.0, "error collector is gone");
            }
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
