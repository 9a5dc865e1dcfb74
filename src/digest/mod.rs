//! Streaming t-digest quantile sketch.
//!
//! A [`TDigest`] maintains a bounded set of centroids approximating the
//! distribution of everything fed through [`TDigest::add`], with sub-1%
//! error at the tails. Digests of equal compression merge losslessly
//! enough for cross-process aggregation, and the textual wire form in
//! [`codec`] round-trips bit-equivalently.
//!
//! A digest is owned by a single thread; aggregate across threads by
//! merging per-thread digests on one owner or by shipping the wire text.

pub mod codec;
mod query;
mod scale;

pub use codec::WireError;

/// Compression values above this are clamped; keeps `8 * compression`
/// comfortably inside `i64`.
const MAX_COMPRESSION: f64 = 1e6;

fn bounded_compression(compression: f64) -> f64 {
    compression.min(MAX_COMPRESSION)
}

/// Maximum number of centroids the merge can leave behind.
fn max_centroids(compression: f64) -> usize {
    2 * bounded_compression(compression).ceil() as usize
}

/// A `(mean, count)` summary of one contiguous slice of the sampled
/// distribution. The spread of the underlying samples is not retained.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Centroid {
    pub mean: f64,
    pub count: i64,
}

impl Centroid {
    pub fn new(mean: f64, count: i64) -> Self {
        debug_assert!(count >= 0);
        Self { mean, count }
    }
}

/// Merging t-digest over `f64` samples with integer multiplicities.
#[derive(Debug, Clone)]
pub struct TDigest {
    compression: f64,
    /// Unmerged centroids accumulate up to this many before a compaction.
    batch_size: i64,
    /// First `merged` entries are sorted and compacted; the rest are
    /// pending insertions.
    centroids: Vec<Centroid>,
    merged: usize,
    unmerged: usize,
    min: f64,
    max: f64,
    sum: f64,
    count: i64,
}

impl TDigest {
    /// Creates an empty digest. A `compression` of zero builds an "unset"
    /// digest that adopts the compression of the first digest merged into
    /// it; such a digest cannot ingest raw samples directly.
    pub fn new(compression: f64) -> Self {
        let mut digest = Self {
            compression: 0.0,
            batch_size: 0,
            centroids: Vec::new(),
            merged: 0,
            unmerged: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
            count: 0,
        };
        digest.reset(compression);
        digest
    }

    /// Discards all ingested data and re-targets the digest at
    /// `compression`. The centroid buffer is reserved up front so the
    /// steady-state ingest path never reallocates.
    pub fn reset(&mut self, compression: f64) {
        self.compression = bounded_compression(compression);
        self.batch_size = 4 * max_centroids(self.compression) as i64;
        debug_assert!(self.compression == 0.0 || self.batch_size > 0);
        self.centroids.clear();
        self.centroids
            .reserve(max_centroids(self.compression) + self.batch_size as usize);
        self.merged = 0;
        self.unmerged = 0;
        self.min = f64::INFINITY;
        self.max = f64::NEG_INFINITY;
        self.sum = 0.0;
        self.count = 0;
    }

    /// Folds `count` samples of `value` into the digest. `count == 0` is
    /// a no-op.
    pub fn add(&mut self, value: f64, count: i64) {
        if count == 0 {
            return;
        }
        self.update_stats(value, value, value * count as f64, count);
        self.push_unmerged(Centroid::new(value, count));
    }

    /// Folds every centroid of `other` into this digest. When this digest
    /// is unset (compression zero) it first adopts `other`'s compression.
    pub fn merge(&mut self, other: &TDigest) {
        if self.compression == 0.0 {
            self.reset(other.compression());
        }
        self.update_stats(other.min, other.max, other.sum, other.count);
        for i in 0..other.centroids.len() {
            self.push_unmerged(other.centroids[i]);
        }
    }

    fn update_stats(&mut self, min: f64, max: f64, sum: f64, count: i64) {
        self.min = self.min.min(min);
        self.max = self.max.max(max);
        self.sum += sum;
        self.count += count;
    }

    fn push_unmerged(&mut self, centroid: Centroid) {
        debug_assert!((self.unmerged as i64) < self.batch_size);
        self.centroids.push(centroid);
        self.unmerged += 1;
        if self.unmerged as i64 == self.batch_size {
            self.compress();
        }
    }

    /// Compacts pending insertions into the sorted prefix, constraining
    /// each resulting centroid to the quantile width the scale function
    /// allows at its position. Greedy from the left; the k-limit is kept
    /// count-scaled so the inner loop carries no division.
    pub(crate) fn compress(&mut self) {
        if self.unmerged == 0 {
            return;
        }
        debug_assert!(!self.centroids.is_empty());

        self.centroids.sort_unstable_by(|a, b| {
            a.mean
                .total_cmp(&b.mean)
                .then_with(|| a.count.cmp(&b.count))
        });

        let total_count = self.count;
        let mut k0 = 0.0;
        let mut q_limit = total_count as f64 * self.k_to_q(k0 + 1.0);

        // The running sum is rebuilt from merged centroids on every pass
        // so its floating error stays bounded by the compression, not by
        // the ingest history.
        self.sum = 0.0;

        let mut last = 0usize;
        let mut merged_count = self.centroids[0].count;
        for i in 1..self.centroids.len() {
            let next = self.centroids[i];

            if (merged_count + next.count) as f64 <= q_limit {
                // Welford's update; count must move before mean.
                let tail = &mut self.centroids[last];
                tail.count += next.count;
                tail.mean += (next.mean - tail.mean) * next.count as f64 / tail.count as f64;
                merged_count += next.count;
                continue;
            }

            k0 = self.q_to_k(merged_count as f64 / total_count as f64);
            q_limit = total_count as f64 * self.k_to_q(k0 + 1.0);
            merged_count += next.count;

            let finished = self.centroids[last];
            self.sum += finished.mean * finished.count as f64;
            last += 1;
            self.centroids[last] = next;
        }
        let finished = self.centroids[last];
        self.sum += finished.mean * finished.count as f64;

        self.merged = last + 1;
        self.unmerged = 0;
        self.centroids.truncate(self.merged);

        if let (Some(first), Some(back)) = (self.centroids.first(), self.centroids.last()) {
            self.min = self.min.min(first.mean);
            self.max = self.max.max(back.mean);
        }
        debug_assert!(self.centroids.len() <= max_centroids(self.compression));
    }

    fn q_to_k(&self, q: f64) -> f64 {
        scale::q_to_k(q, self.compression)
    }

    fn k_to_q(&self, k: f64) -> f64 {
        scale::k_to_q(k, self.compression)
    }

    /// Smallest value ever ingested; `+inf` when empty.
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Largest value ever ingested; `-inf` when empty.
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Sum of all ingested values, weighted by count.
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Total sample count.
    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn compression(&self) -> f64 {
        self.compression
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Current centroid buffer, including any not-yet-compacted suffix.
    pub fn centroids(&self) -> &[Centroid] {
        &self.centroids
    }

    /// Resident size of the digest including centroid buffer capacity.
    pub fn mem_usage_bytes(&self) -> usize {
        std::mem::size_of::<TDigest>()
            + self.centroids.capacity() * std::mem::size_of::<Centroid>()
    }
}

impl Default for TDigest {
    fn default() -> Self {
        Self::new(0.0)
    }
}
