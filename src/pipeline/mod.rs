//! Sample ingest pipeline: many recorders, one collector.
//!
//! Worker threads record samples through cloneable [`Recorder`] handles;
//! the lock-free MPSC queue fans them into the single [`Collector`],
//! which folds each sample into a per-series [`TDigest`] and periodically
//! publishes wire-text snapshots for transport. A
//! [`ConnectivityTracker`] broadcasts the pipeline's lifecycle to
//! attached watchers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::connectivity::{ConnectivityState, ConnectivityTracker, StateWatcher, Status, WatcherId};
use crate::digest::TDigest;
use crate::queue::{self, MpscQueue, MpscSender};

/// Sleep granularity of the background collector when the queue is idle.
const IDLE_POLL: Duration = Duration::from_millis(1);

/// One recorded observation.
#[derive(Debug, Clone)]
pub struct Sample {
    pub series: Arc<str>,
    pub value: f64,
    pub count: i64,
}

/// Published wire-text snapshot of one series.
#[derive(Debug, Clone)]
pub struct SeriesSnapshot {
    pub series: Arc<str>,
    /// Textual digest; parse with [`TDigest::from_wire`] on the far side.
    pub wire: String,
    pub count: i64,
}

/// Everything the collector published on its last flush, sorted by
/// series name for stable output.
#[derive(Debug, Default)]
pub struct SnapshotBatch {
    pub series: Vec<SeriesSnapshot>,
}

/// State shared between recorders, the collector, and snapshot readers.
struct SharedState {
    /// Latest snapshot per series, readable from any thread.
    snapshots: DashMap<Arc<str>, SeriesSnapshot>,
    /// The most recent complete flush.
    latest: ArcSwapOption<SnapshotBatch>,
    /// Lifecycle state machine; mutations serialized by this mutex.
    tracker: Mutex<ConnectivityTracker>,
}

/// Cloneable producer handle recording into one series.
#[derive(Clone)]
pub struct Recorder {
    series: Arc<str>,
    tx: MpscSender<Sample>,
}

impl Recorder {
    /// Records a single observation. Never blocks. Returns true iff the
    /// queue was possibly empty, usable as a wake-the-collector hint.
    pub fn record(&self, value: f64) -> bool {
        self.record_n(value, 1)
    }

    /// Records `count` observations of `value`.
    pub fn record_n(&self, value: f64, count: i64) -> bool {
        self.tx.push(Sample {
            series: Arc::clone(&self.series),
            value,
            count,
        })
    }

    pub fn series(&self) -> &str {
        &self.series
    }
}

/// Single consumer of the sample queue. Owns every per-series digest.
pub struct Collector {
    rx: MpscQueue<Sample>,
    digests: HashMap<Arc<str>, TDigest>,
    shared: Arc<SharedState>,
    compression: f64,
    drain_batch: usize,
    snapshot_interval: Duration,
}

impl Collector {
    /// Pops up to one drain batch of samples into the per-series
    /// digests. Returns how many samples were folded in.
    pub fn drain(&mut self) -> usize {
        let mut folded = 0;
        while folded < self.drain_batch {
            match self.rx.pop() {
                Some(sample) => {
                    self.fold(sample);
                    folded += 1;
                }
                // Empty, or a producer is mid-push; either way the next
                // pass picks it up.
                None => break,
            }
        }
        folded
    }

    fn fold(&mut self, sample: Sample) {
        let digest = self
            .digests
            .entry(Arc::clone(&sample.series))
            .or_insert_with(|| TDigest::new(self.compression));
        digest.add(sample.value, sample.count);
    }

    /// Encodes every series digest and publishes the snapshots.
    pub fn flush(&mut self) {
        let mut batch = SnapshotBatch {
            series: Vec::with_capacity(self.digests.len()),
        };
        for (series, digest) in &mut self.digests {
            let snapshot = SeriesSnapshot {
                series: Arc::clone(series),
                wire: digest.to_wire(),
                count: digest.count(),
            };
            self.shared
                .snapshots
                .insert(Arc::clone(series), snapshot.clone());
            batch.series.push(snapshot);
        }
        batch.series.sort_by(|a, b| a.series.cmp(&b.series));
        debug!(series = batch.series.len(), "snapshot flush");
        self.shared.latest.store(Some(Arc::new(batch)));
    }

    /// Read access to one series' digest, for hosts driving the
    /// collector manually.
    pub fn digest(&self, series: &str) -> Option<&TDigest> {
        self.digests.get(series)
    }

    /// Drains and flushes until `stop` is raised, publishing every
    /// `snapshot_interval`. Used by [`Pipeline::start`]; hosts may call
    /// it on their own thread instead.
    pub fn run(&mut self, stop: &AtomicBool) {
        self.shared.tracker.lock().set_state(
            ConnectivityState::Ready,
            Status::ok(),
            "collector running",
        );

        let mut last_flush = Instant::now();
        while !stop.load(Ordering::Relaxed) {
            let folded = self.drain();
            if last_flush.elapsed() >= self.snapshot_interval {
                self.flush();
                last_flush = Instant::now();
            }
            if folded == 0 {
                std::thread::park_timeout(IDLE_POLL);
            }
        }

        // Final drain so nothing recorded before the stop flag is lost;
        // spins past producers caught mid-push until the queue reports
        // definitively empty.
        loop {
            let (sample, empty) = self.rx.pop_and_check_end();
            match sample {
                Some(sample) => self.fold(sample),
                None if empty => break,
                None => std::hint::spin_loop(),
            }
        }
        self.flush();
        self.shared.tracker.lock().set_state(
            ConnectivityState::Shutdown,
            Status::ok(),
            "collector stopped",
        );
    }
}

/// Handle tying the pieces together: hands out recorders, runs the
/// collector on a background thread, exposes published snapshots and the
/// lifecycle tracker.
pub struct Pipeline {
    name: String,
    tx: MpscSender<Sample>,
    collector: Option<Collector>,
    shared: Arc<SharedState>,
    stop: Arc<AtomicBool>,
    collector_thread: Option<JoinHandle<()>>,
}

impl Pipeline {
    pub fn new(cfg: PipelineConfig) -> Self {
        let (tx, rx) = queue::channel();
        let shared = Arc::new(SharedState {
            snapshots: DashMap::new(),
            latest: ArcSwapOption::empty(),
            tracker: Mutex::new(ConnectivityTracker::new(
                cfg.name.clone(),
                ConnectivityState::Idle,
            )),
        });
        let collector = Collector {
            rx,
            digests: HashMap::new(),
            shared: Arc::clone(&shared),
            compression: cfg.sketch.compression,
            drain_batch: cfg.drain_batch.max(1),
            snapshot_interval: cfg.snapshot_interval,
        };
        Self {
            name: cfg.name,
            tx,
            collector: Some(collector),
            shared,
            stop: Arc::new(AtomicBool::new(false)),
            collector_thread: None,
        }
    }

    /// A recorder feeding `series`.
    pub fn recorder(&self, series: impl Into<Arc<str>>) -> Recorder {
        Recorder {
            series: series.into(),
            tx: self.tx.clone(),
        }
    }

    /// Takes the collector for manual driving. The background
    /// [`Pipeline::start`] is unavailable afterwards.
    pub fn take_collector(&mut self) -> Option<Collector> {
        self.collector.take()
    }

    /// Spawns the background collector thread. No-op if the collector is
    /// already running or was taken.
    pub fn start(&mut self) {
        let Some(mut collector) = self.collector.take() else {
            return;
        };
        info!(pipeline = %self.name, "starting collector");
        let stop = Arc::clone(&self.stop);
        self.collector_thread = Some(std::thread::spawn(move || collector.run(&stop)));
    }

    /// Stops the background collector, waiting for its final flush.
    pub fn stop(&mut self) {
        let Some(handle) = self.collector_thread.take() else {
            return;
        };
        self.stop.store(true, Ordering::Relaxed);
        handle.thread().unpark();
        if handle.join().is_err() {
            tracing::error!(pipeline = %self.name, "collector thread panicked");
        }
        info!(pipeline = %self.name, "collector stopped");
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectivityState {
        self.shared.tracker.lock().state()
    }

    /// Reports a supervisor-observed transition, e.g. a downstream
    /// failure, through the tracker.
    pub fn set_state(&self, state: ConnectivityState, status: Status, reason: &str) {
        self.shared.tracker.lock().set_state(state, status, reason);
    }

    /// Attaches a lifecycle watcher; see
    /// [`ConnectivityTracker::add_watcher`].
    pub fn add_watcher(
        &self,
        initial_hint: ConnectivityState,
        watcher: Arc<dyn StateWatcher>,
    ) -> WatcherId {
        self.shared.tracker.lock().add_watcher(initial_hint, watcher)
    }

    /// Detaches a lifecycle watcher. Idempotent.
    pub fn remove_watcher(&self, id: WatcherId) {
        self.shared.tracker.lock().remove_watcher(id);
    }

    /// Latest published snapshot for `series`, if any flush covered it.
    pub fn snapshot(&self, series: &str) -> Option<SeriesSnapshot> {
        self.shared
            .snapshots
            .get(series)
            .map(|entry| entry.value().clone())
    }

    /// The most recent complete flush.
    pub fn latest(&self) -> Option<Arc<SnapshotBatch>> {
        self.shared.latest.load_full()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
