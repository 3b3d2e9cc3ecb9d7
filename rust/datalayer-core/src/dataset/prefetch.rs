// rust/datalayer-core/src/dataset/prefetch.rs

//! Background prefetching over a fixed ring of batches.
//!
//! A worker thread takes free batches from the ring, fills them and hands
//! them to the consumer through a ready queue. The consumer holds each
//! batch as a [`BatchLease`], which returns the batch to the free queue when
//! dropped, so at most `ring_depth` batches are ever alive.
//!
//! Two pipelines can be connected so that the secondary loads records with
//! exactly the labels the primary produced, batch for batch.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, select, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use super::assembler::{Batch, BatchAssembler, Fill};
use super::cancel::{CancelListener, CancelToken};
use super::noise;
use super::pairing::{LabelScheme, PairingEngine};
use super::reader::RecordReader;
use super::sharding::ShardSelector;
use super::sync::LabelSync;
use crate::config::{DataLayerConfig, SyncRole};
use crate::error::{DataLayerError, Result};
use crate::storage::{RecordCursor, RecordStore};
use crate::tensor::shape_count;
use crate::transform::Transform;

/// Receives the realized labels of every batch a pipeline completes.
///
/// Called on the worker thread after the batch has been queued for the
/// consumer. Implementations may block, which stalls that pipeline.
pub trait BatchObserver: Send + Sync {
    fn on_batch_loaded(&self, pipeline: &str, labels: &[i32]);
}

/// Handle returned by [`PrefetchPipeline::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// Counters for one pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub batches_filled: u64,
    pub batches_delivered: u64,
    pub observers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Closed,
    Open,
    Cancelled,
}

/// Holds a synchronized worker until its pipelines are connected.
struct StartGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl StartGate {
    fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Closed),
            changed: Condvar::new(),
        }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        if *state == GateState::Closed {
            *state = GateState::Open;
            self.changed.notify_all();
        }
    }

    /// Returns `true` once released, `false` if cancelled first.
    fn wait(&self) -> bool {
        let mut state = self.state.lock();
        while *state == GateState::Closed {
            self.changed.wait(&mut state);
        }
        *state == GateState::Open
    }
}

impl CancelListener for StartGate {
    fn on_cancel(&self) {
        let mut state = self.state.lock();
        *state = GateState::Cancelled;
        self.changed.notify_all();
    }
}

struct Shared {
    name: String,
    state: Mutex<PipelineState>,
    observers: Mutex<Vec<(SubscriptionId, Arc<dyn BatchObserver>)>>,
    next_subscription: AtomicU64,
    halt_reason: Mutex<Option<String>>,
    filled: AtomicU64,
    delivered: AtomicU64,
    gate: Arc<StartGate>,
}

impl Shared {
    fn notify(&self, labels: &[i32]) {
        // Observers may block; never hold the lock while calling them.
        let observers: Vec<Arc<dyn BatchObserver>> = self
            .observers
            .lock()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        for observer in observers {
            observer.on_batch_loaded(&self.name, labels);
        }
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(sub, _)| *sub != id);
        observers.len() != before
    }
}

struct Connection {
    primary: Weak<Shared>,
    primary_name: String,
    subscription: SubscriptionId,
}

/// Everything the worker thread takes ownership of at start.
struct Startup {
    assembler: BatchAssembler,
    free_rx: Receiver<Batch>,
    ready_tx: Sender<Batch>,
}

/// A filled batch on loan to the consumer.
///
/// Dropping the lease returns the batch to the ring.
#[derive(Debug)]
pub struct BatchLease {
    pub batch: Batch,
    free_tx: Sender<Batch>,
}

impl Deref for BatchLease {
    type Target = Batch;

    fn deref(&self) -> &Batch {
        &self.batch
    }
}

impl DerefMut for BatchLease {
    fn deref_mut(&mut self) -> &mut Batch {
        &mut self.batch
    }
}

impl Drop for BatchLease {
    fn drop(&mut self) {
        let batch = std::mem::take(&mut self.batch);
        // The receiver is gone once the pipeline has stopped.
        let _ = self.free_tx.send(batch);
    }
}

/// A background prefetcher producing filled batches.
pub struct PrefetchPipeline {
    shared: Arc<Shared>,
    config: DataLayerConfig,
    cancel: CancelToken,
    free_tx: Sender<Batch>,
    ready_rx: Receiver<Batch>,
    startup: Option<Startup>,
    worker: Option<JoinHandle<()>>,
    sync: Option<Arc<LabelSync>>,
    connection: Mutex<Option<Connection>>,
    data_shape: Vec<usize>,
    label_shape: Option<Vec<usize>>,
}

impl PrefetchPipeline {
    /// Sets up a pipeline reading from `cursor`.
    ///
    /// Reads the first record to size the ring, synthesizes the noise
    /// record when enabled and allocates `ring_depth` batches.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the store is empty
    /// or the first record cannot be shaped or labelled.
    pub fn new(
        name: impl Into<String>,
        config: DataLayerConfig,
        cursor: Box<dyn RecordCursor>,
        transform: Arc<dyn Transform>,
    ) -> Result<Self> {
        let name = name.into();
        config.validate()?;

        let selector = ShardSelector::from_config(&config.shard)?;
        let mut reader = RecordReader::new(cursor, selector);
        let first = reader.current()?;

        let mut record_shape = transform.infer_shape(&first);
        if record_shape.is_empty() {
            return Err(DataLayerError::config("transform inferred an empty shape"));
        }

        let noise = if config.data.enable_noise_for_nonmatch {
            Some(noise::synthesize(&config.noise, &first, transform.mean())?)
        } else {
            None
        };

        let width = config.pairing_width();
        record_shape[0] *= width;
        let mut data_shape = vec![config.data.batch_size];
        data_shape.extend_from_slice(&record_shape);

        let scheme = LabelScheme::from_config(&config.data, &first)?;
        let label_shape = scheme.map(|s| vec![config.data.batch_size, s.label_dim()]);

        info!(
            pipeline = %name,
            source = %config.data.source,
            data = ?data_shape,
            data_count = shape_count(&data_shape),
            labels = ?label_shape,
            role = ?config.sync.role,
            "data layer output shape"
        );

        let depth = config.prefetch.ring_depth;
        let (free_tx, free_rx) = bounded(depth);
        let (ready_tx, ready_rx) = bounded(depth);
        for slot in 0..depth {
            let batch = Batch::new(slot, &data_shape, label_shape.as_deref());
            free_tx
                .send(batch)
                .map_err(|_| DataLayerError::config("prefetch ring closed during setup"))?;
        }

        let sync = (config.sync.role == SyncRole::Secondary).then(|| Arc::new(LabelSync::new()));

        let mut assembler = BatchAssembler::new(
            name.clone(),
            &config,
            reader,
            transform,
            PairingEngine::new(config.data.balance_matches, noise),
            scheme,
        );
        if let Some(sync) = &sync {
            assembler = assembler.with_sync(Arc::clone(sync));
        }

        let cancel = CancelToken::new();
        let gate = Arc::new(StartGate::new());
        let listener: Arc<dyn CancelListener> = gate.clone();
        cancel.register(&listener);
        if let Some(sync) = &sync {
            let listener: Arc<dyn CancelListener> = sync.clone();
            cancel.register(&listener);
        }

        let shared = Arc::new(Shared {
            name,
            state: Mutex::new(PipelineState::Idle),
            observers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(0),
            halt_reason: Mutex::new(None),
            filled: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            gate,
        });

        Ok(Self {
            shared,
            config,
            cancel,
            free_tx,
            ready_rx,
            startup: Some(Startup {
                assembler,
                free_rx,
                ready_tx,
            }),
            worker: None,
            sync,
            connection: Mutex::new(None),
            data_shape,
            label_shape,
        })
    }

    /// Opens `config.data.source` in `store` and sets up a pipeline over it.
    pub fn open(
        name: impl Into<String>,
        config: DataLayerConfig,
        store: &dyn RecordStore,
        transform: Arc<dyn Transform>,
    ) -> Result<Self> {
        let cursor = store.open(&config.data.source)?;
        Self::new(name, config, cursor, transform)
    }

    /// Spawns the worker thread.
    ///
    /// Synchronized pipelines do not produce until [`connect`](Self::connect)
    /// or [`release`](Self::release) is called.
    pub fn start(&mut self) -> Result<()> {
        let Startup {
            assembler,
            free_rx,
            ready_tx,
        } = self.startup.take().ok_or_else(|| {
            DataLayerError::config(format!("pipeline '{}' was already started", self.shared.name))
        })?;

        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        let delayed = self.config.delays_start();

        let handle = thread::Builder::new()
            .name(format!("prefetch-{}", self.shared.name))
            .spawn(move || run_worker(shared, assembler, cancel, free_rx, ready_tx, delayed))
            .map_err(|e| DataLayerError::config_with_source("failed to spawn prefetch worker", e))?;

        self.worker = Some(handle);
        *self.shared.state.lock() = PipelineState::Running;
        debug!(pipeline = %self.shared.name, delayed, "prefetch pipeline started");
        Ok(())
    }

    /// Lets a synchronized pipeline produce without a partner.
    pub fn release(&self) {
        self.shared.gate.release();
    }

    /// Blocks until a filled batch is available.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` once the pipeline is stopping, and `WorkerHalted`
    /// if the worker failed and every batch it produced has been taken.
    pub fn take(&self) -> Result<BatchLease> {
        if *self.shared.state.lock() == PipelineState::Idle {
            return Err(DataLayerError::config(format!(
                "pipeline '{}' has not been started",
                self.shared.name
            )));
        }
        if self.cancel.is_cancelled() {
            return Err(DataLayerError::Cancelled);
        }

        let received = select! {
            recv(self.ready_rx) -> msg => msg.ok(),
            recv(self.cancel.signal()) -> _ => return Err(DataLayerError::Cancelled),
        };

        match received {
            Some(batch) => {
                self.shared.delivered.fetch_add(1, Ordering::Relaxed);
                Ok(BatchLease {
                    batch,
                    free_tx: self.free_tx.clone(),
                })
            }
            None => match self.shared.halt_reason.lock().clone() {
                Some(message) => Err(DataLayerError::worker_halted(&self.shared.name, message)),
                None => Err(DataLayerError::Cancelled),
            },
        }
    }

    /// Makes this secondary follow `primary`'s label sequence and lets both
    /// workers start producing.
    ///
    /// # Errors
    ///
    /// Returns a configuration error unless this pipeline is a secondary
    /// and `primary` is a primary, or if this pipeline was disconnected or
    /// stopped before.
    pub fn connect(&self, primary: &PrefetchPipeline) -> Result<()> {
        let sync = self.sync.as_ref().ok_or_else(|| {
            DataLayerError::config(format!(
                "pipeline '{}' is not a synchronization secondary",
                self.shared.name
            ))
        })?;
        if sync.is_cancelled() {
            return Err(DataLayerError::config(format!(
                "pipeline '{}' was disconnected or stopped and cannot connect again",
                self.shared.name
            )));
        }
        if primary.config.sync.role != SyncRole::Primary {
            return Err(DataLayerError::config(format!(
                "pipeline '{}' is not a synchronization primary",
                primary.shared.name
            )));
        }

        let mut connection = self.connection.lock();
        if connection.is_some() {
            return Err(DataLayerError::config(format!(
                "pipeline '{}' is already connected",
                self.shared.name
            )));
        }

        let observer: Arc<dyn BatchObserver> = sync.clone();
        let subscription = primary.subscribe(observer);

        let listener: Arc<dyn CancelListener> = sync.clone();
        primary.cancel.register(&listener);

        *connection = Some(Connection {
            primary: Arc::downgrade(&primary.shared),
            primary_name: primary.shared.name.clone(),
            subscription,
        });
        drop(connection);

        info!(
            secondary = %self.shared.name,
            primary = %primary.shared.name,
            "data layers connected"
        );

        self.shared.gate.release();
        primary.shared.gate.release();
        Ok(())
    }

    /// Halts the label handshake and detaches from the primary.
    ///
    /// The secondary stops producing; the primary keeps going without it.
    pub fn disconnect(&self) {
        if let Some(sync) = &self.sync {
            sync.cancel();
        }

        if let Some(connection) = self.connection.lock().take() {
            if let Some(primary) = connection.primary.upgrade() {
                primary.unsubscribe(connection.subscription);
            }
            info!(
                secondary = %self.shared.name,
                primary = %connection.primary_name,
                "data layers disconnected"
            );
        }
    }

    pub fn subscribe(&self, observer: Arc<dyn BatchObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.shared.observers.lock().push((id, observer));
        id
    }

    /// Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.unsubscribe(id)
    }

    /// Cancels every blocking point, joins the worker and releases the ring.
    pub fn stop(&mut self) {
        let previous = {
            let mut state = self.shared.state.lock();
            let previous = *state;
            *state = match previous {
                PipelineState::Idle | PipelineState::Stopped => PipelineState::Stopped,
                _ => PipelineState::Draining,
            };
            previous
        };
        if previous == PipelineState::Stopped {
            return;
        }

        self.disconnect();
        self.cancel.cancel();

        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!(pipeline = %self.shared.name, "prefetch worker panicked");
            }
        }

        *self.shared.state.lock() = PipelineState::Stopped;
        debug!(pipeline = %self.shared.name, "prefetch pipeline stopped");
    }

    pub fn state(&self) -> PipelineState {
        *self.shared.state.lock()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            batches_filled: self.shared.filled.load(Ordering::Relaxed),
            batches_delivered: self.shared.delivered.load(Ordering::Relaxed),
            observers: self.shared.observers.lock().len(),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn config(&self) -> &DataLayerConfig {
        &self.config
    }

    /// Shape of the data tensor of every batch, `[N, C*K, H, W]`.
    pub fn data_shape(&self) -> &[usize] {
        &self.data_shape
    }

    /// Shape of the label tensor, when labels are produced.
    pub fn label_shape(&self) -> Option<&[usize]> {
        self.label_shape.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.lock().is_some()
    }
}

impl Drop for PrefetchPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(
    shared: Arc<Shared>,
    mut assembler: BatchAssembler,
    cancel: CancelToken,
    free_rx: Receiver<Batch>,
    ready_tx: Sender<Batch>,
    delayed: bool,
) {
    if delayed {
        debug!(pipeline = %shared.name, "waiting for connection before prefetching");
        if !shared.gate.wait() {
            debug!(pipeline = %shared.name, "cancelled before start");
            return;
        }
    }

    debug!(pipeline = %shared.name, "prefetch worker running");
    let mut sequence = 0u64;

    loop {
        let mut batch = select! {
            recv(free_rx) -> msg => match msg {
                Ok(batch) => batch,
                Err(_) => break,
            },
            recv(cancel.signal()) -> _ => break,
        };
        if cancel.is_cancelled() {
            break;
        }

        match assembler.fill(&mut batch, &cancel) {
            Ok(Fill::Complete(labels)) => {
                batch.sequence = sequence;
                sequence += 1;
                shared.filled.fetch_add(1, Ordering::Relaxed);

                if ready_tx.send(batch).is_err() {
                    break;
                }
                shared.notify(&labels);
            }
            Ok(Fill::Cancelled) => {
                debug!(pipeline = %shared.name, "fill cancelled");
                break;
            }
            Err(e) => {
                if e.is_configuration() {
                    error!(pipeline = %shared.name, error = %e, "data layer misconfigured, prefetch halted");
                } else {
                    warn!(pipeline = %shared.name, error = %e, "prefetch halted");
                }
                *shared.halt_reason.lock() = Some(e.to_string());
                break;
            }
        }
    }

    debug!(pipeline = %shared.name, batches = sequence, "prefetch worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryCursor, MemoryStore, Record};
    use crate::transform::ScaleTransform;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn records(labels: impl IntoIterator<Item = i32>) -> Vec<Record> {
        labels
            .into_iter()
            .enumerate()
            .map(|(i, l)| Record::from_bytes(l, 1, 2, 2, vec![(i % 256) as u8; 4]))
            .collect()
    }

    fn config(batch_size: usize, role: SyncRole) -> DataLayerConfig {
        let mut config = DataLayerConfig::default();
        config.data.batch_size = batch_size;
        config.sync.role = role;
        config
    }

    fn pipeline(name: &str, config: DataLayerConfig, records: Vec<Record>) -> PrefetchPipeline {
        PrefetchPipeline::new(
            name,
            config,
            Box::new(MemoryCursor::new(records)),
            Arc::new(ScaleTransform::default()),
        )
        .unwrap()
    }

    struct Recorder {
        calls: AtomicUsize,
        last: Mutex<Vec<i32>>,
    }

    impl BatchObserver for Recorder {
        fn on_batch_loaded(&self, _pipeline: &str, labels: &[i32]) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock() = labels.to_vec();
        }
    }

    #[test]
    fn test_setup_shapes() {
        let mut config = config(4, SyncRole::None);
        config.data.images_per_blob = 2;
        let pipeline = pipeline("train", config, records(0..8));

        assert_eq!(pipeline.data_shape(), &[4, 2, 2, 2]);
        assert_eq!(pipeline.label_shape(), Some(&[4, 1][..]));
        assert_eq!(pipeline.state(), PipelineState::Idle);
    }

    #[test]
    fn test_take_batches_in_order() {
        let mut pipeline = pipeline("train", config(4, SyncRole::None), records(0..12));
        pipeline.start().unwrap();

        let mut seen = Vec::new();
        for expected in 0..3u64 {
            let lease = pipeline.take().unwrap();
            assert_eq!(lease.sequence, expected);
            assert_eq!(lease.len(), 4);
            seen.extend_from_slice(&lease.labels);
        }
        assert_eq!(seen, (0..12).collect::<Vec<_>>());

        pipeline.stop();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert!(pipeline.stats().batches_delivered >= 3);
    }

    #[test]
    fn test_ring_bounds_live_batches() {
        let mut config = config(2, SyncRole::None);
        config.prefetch.ring_depth = 2;
        let mut pipeline = pipeline("train", config, records(0..4));
        pipeline.start().unwrap();

        let first = pipeline.take().unwrap();
        let second = pipeline.take().unwrap();
        assert_ne!(first.slot, second.slot);

        thread::sleep(Duration::from_millis(30));
        // Both slots are leased, so nothing more can be filled.
        assert_eq!(pipeline.stats().batches_filled, 2);

        drop(first);
        let third = pipeline.take().unwrap();
        assert_eq!(third.sequence, 2);
        drop(second);
        drop(third);

        pipeline.stop();
    }

    #[test]
    fn test_stop_unblocks_take() {
        let mut config = config(2, SyncRole::Primary);
        config.prefetch.ring_depth = 1;
        let mut pipeline = pipeline("train", config, records(0..4));
        pipeline.start().unwrap();

        // Never released, so nothing is produced.
        pipeline.cancel.cancel();
        assert!(matches!(pipeline.take(), Err(DataLayerError::Cancelled)));

        pipeline.stop();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert!(matches!(pipeline.take(), Err(DataLayerError::Cancelled)));
    }

    #[test]
    fn test_take_before_start() {
        let pipeline = pipeline("train", config(2, SyncRole::None), records(0..4));
        assert!(pipeline.take().unwrap_err().is_configuration());
    }

    #[test]
    fn test_worker_error_surfaces_as_halt() {
        // Every record shares one label, so non-matching draws run out.
        let mut config = config(2, SyncRole::None);
        config.data.images_per_blob = 2;
        let mut pipeline = pipeline("pairs", config, records(std::iter::repeat(3).take(6)));
        pipeline.start().unwrap();

        let err = pipeline.take().unwrap_err();
        match err {
            DataLayerError::WorkerHalted { pipeline: name, message } => {
                assert_eq!(name, "pairs");
                assert!(message.contains("label 3"));
            }
            other => panic!("unexpected error: {}", other),
        }
        pipeline.stop();
    }

    #[test]
    fn test_observers_see_realized_labels() {
        let mut pipeline = pipeline("train", config(3, SyncRole::None), records(0..9));
        let recorder = Arc::new(Recorder {
            calls: AtomicUsize::new(0),
            last: Mutex::new(Vec::new()),
        });
        let id = pipeline.subscribe(recorder.clone());
        assert_eq!(pipeline.stats().observers, 1);

        pipeline.start().unwrap();
        let lease = pipeline.take().unwrap();
        assert_eq!(lease.labels, vec![0, 1, 2]);
        drop(lease);

        pipeline.stop();
        assert!(recorder.calls.load(Ordering::SeqCst) >= 1);
        assert!(pipeline.unsubscribe(id));
        assert!(!pipeline.unsubscribe(id));
    }

    #[test]
    fn test_connected_pipelines_share_labels() {
        let primary_records = records((0..40).map(|i| i % 4));
        let secondary_records = records((0..20).map(|i| 3 - i % 4));

        let mut primary = pipeline("anchor", config(8, SyncRole::Primary), primary_records);
        let mut secondary = pipeline("positive", config(8, SyncRole::Secondary), secondary_records);

        primary.start().unwrap();
        secondary.start().unwrap();
        secondary.connect(&primary).unwrap();
        assert!(secondary.is_connected());

        for _ in 0..5 {
            let a = primary.take().unwrap();
            let b = secondary.take().unwrap();
            assert_eq!(a.sequence, b.sequence);
            assert_eq!(a.labels, b.labels);
        }

        secondary.stop();
        primary.stop();
        assert_eq!(primary.state(), PipelineState::Stopped);
    }

    #[test]
    fn test_disconnect_halts_secondary_only() {
        let mut primary = pipeline("anchor", config(2, SyncRole::Primary), records(0..8));
        let mut secondary = pipeline("positive", config(2, SyncRole::Secondary), records(0..8));

        primary.start().unwrap();
        secondary.start().unwrap();
        secondary.connect(&primary).unwrap();

        let first = secondary.take().unwrap();
        drop(first);
        secondary.disconnect();
        assert!(!secondary.is_connected());
        assert_eq!(primary.stats().observers, 0);

        // The primary keeps producing once its partner is gone.
        for _ in 0..4 {
            drop(primary.take().unwrap());
        }

        primary.stop();
        secondary.stop();
    }

    #[test]
    fn test_connect_requires_roles() {
        let plain = pipeline("plain", config(2, SyncRole::None), records(0..4));
        let primary = pipeline("anchor", config(2, SyncRole::Primary), records(0..4));
        let secondary = pipeline("positive", config(2, SyncRole::Secondary), records(0..4));

        assert!(plain.connect(&primary).is_err());
        assert!(secondary.connect(&plain).is_err());
        assert!(secondary.connect(&primary).is_ok());
        assert!(secondary.connect(&primary).is_err());
    }

    #[test]
    fn test_open_from_store() {
        let store = MemoryStore::new();
        store.insert("train", records(0..4));

        let mut config = config(2, SyncRole::None);
        config.data.source = "train".to_string();
        let pipeline =
            PrefetchPipeline::open("train", config.clone(), &store, Arc::new(ScaleTransform::default()))
                .unwrap();
        assert_eq!(pipeline.data_shape(), &[2, 1, 2, 2]);

        config.data.source = "missing".to_string();
        assert!(PrefetchPipeline::open("x", config, &store, Arc::new(ScaleTransform::default())).is_err());
    }

    #[test]
    fn test_reconnect_after_disconnect_is_rejected() {
        let mut primary = pipeline("anchor", config(2, SyncRole::Primary), records(0..8));
        let mut secondary = pipeline("positive", config(2, SyncRole::Secondary), records(0..8));

        primary.start().unwrap();
        secondary.start().unwrap();
        secondary.connect(&primary).unwrap();
        drop(secondary.take().unwrap());

        secondary.disconnect();
        let err = secondary.connect(&primary).unwrap_err();
        assert!(err.is_configuration());
        assert!(!secondary.is_connected());
        assert_eq!(primary.stats().observers, 0);

        secondary.stop();
        primary.stop();
    }

    #[test]
    fn test_synchronized_pipelines_wait_for_connect() {
        let mut primary = pipeline("anchor", config(2, SyncRole::Primary), records(0..8));
        let mut secondary = pipeline("positive", config(2, SyncRole::Secondary), records(0..8));

        primary.start().unwrap();
        secondary.start().unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(primary.stats().batches_filled, 0);
        assert_eq!(secondary.stats().batches_filled, 0);

        secondary.connect(&primary).unwrap();
        let a = primary.take().unwrap();
        let b = secondary.take().unwrap();
        assert_eq!(a.labels, b.labels);
        drop(a);
        drop(b);

        secondary.stop();
        primary.stop();
    }

    #[test]
    fn test_released_primary_runs_alone() {
        let mut primary = pipeline("anchor", config(2, SyncRole::Primary), records(0..4));
        primary.start().unwrap();
        primary.release();

        let lease = primary.take().unwrap();
        assert_eq!(lease.labels, vec![0, 1]);
        drop(lease);

        primary.stop();
        assert_eq!(primary.state(), PipelineState::Stopped);
    }

    #[test]
    fn test_cancel_unblocks_unconnected_secondary() {
        let mut secondary = pipeline("positive", config(2, SyncRole::Secondary), records(0..4));
        secondary.start().unwrap();
        secondary.release();
        thread::sleep(Duration::from_millis(30));

        // The worker is waiting for labels that will never be published.
        secondary.cancel.cancel();
        let worker = secondary.worker.take().unwrap();
        worker.join().unwrap();

        assert!(matches!(secondary.take(), Err(DataLayerError::Cancelled)));
        assert_eq!(secondary.stats().batches_filled, 0);
    }
}
