//! Streaming quantile sketch and ingest primitives for telemetry
//! pipelines.
//!
//! Three pieces, leaves first:
//!
//! - [`queue`] — intrusive lock-free multi-producer single-consumer
//!   queue, the ingest fan-in. A raw allocation-free core plus a safe
//!   boxed sender/receiver pair and a mutex-guarded multi-drainer
//!   variant.
//! - [`connectivity`] — per-stream state machine with watcher broadcast
//!   and ordered asynchronous delivery through [`exec`].
//! - [`digest`] — the t-digest itself: a bounded, mergeable
//!   approximation of a sample distribution with sub-1% tail error and a
//!   byte-exact textual wire form.
//!
//! [`pipeline`] wires them together: worker threads record samples
//! through cloneable handles, a single collector folds them into
//! per-series digests and publishes wire snapshots, and a connectivity
//! tracker tells watchers when the stream changes state.
//!
//! ```
//! use sketchoor::{Pipeline, PipelineConfig};
//!
//! let mut pipeline = Pipeline::new(PipelineConfig::default());
//! let latency = pipeline.recorder("rpc_latency_us");
//! let mut collector = pipeline.take_collector().expect("fresh pipeline");
//!
//! latency.record(1250.0);
//! latency.record(830.0);
//! while collector.drain() > 0 {}
//! collector.flush();
//!
//! let snapshot = pipeline.snapshot("rpc_latency_us").expect("published");
//! let remote: sketchoor::TDigest = snapshot.wire.parse().expect("round-trips");
//! assert_eq!(remote.count(), 2);
//! ```

pub mod config;
pub mod connectivity;
pub mod digest;
pub mod exec;
pub mod pipeline;
pub mod queue;

pub use config::{PipelineConfig, SketchConfig};
pub use connectivity::{
    AsyncWatcher, ConnectivityState, ConnectivityTracker, StateWatcher, Status, WatcherId,
};
pub use digest::{Centroid, TDigest, WireError};
pub use exec::{Executor, ThreadExecutor, WorkSerializer};
pub use pipeline::{Collector, Pipeline, Recorder, Sample, SeriesSnapshot, SnapshotBatch};
pub use queue::{LockedMpscQueue, MpscQueue, MpscSender};
