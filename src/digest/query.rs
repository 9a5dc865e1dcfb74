//! CDF and quantile estimation over the compacted centroid set.
//!
//! Both queries interpolate linearly between centroid midpoints, with the
//! exact min and max as terminal anchors:
//!
//! ```text
//! (mass, value) = (0, min), (count[0]/2, mean[0]), ..,
//!                 (.. + (count[i-1]+count[i])/2, mean[i]), ..,
//!                 (count, max)
//! ```

use super::TDigest;

/// Weighted linear interpolation between `v1` and `v2`.
#[inline]
pub(crate) fn lerp(v1: f64, v2: f64, w1: f64, w2: f64) -> f64 {
    debug_assert!(w1 >= 0.0);
    debug_assert!(w2 >= 0.0);
    debug_assert!(w1 + w2 > 0.0);
    (v1 * w1 + v2 * w2) / (w1 + w2)
}

impl TDigest {
    /// Fraction of ingested samples at or below `value`, in `[0, 1]`.
    /// Returns NaN when the digest is empty. Forces a compaction.
    pub fn cdf(&mut self, value: f64) -> f64 {
        self.compress();

        if self.merged == 0 {
            return f64::NAN;
        }
        if value < self.min {
            return 0.0;
        }
        // Everything at or above max is the full distribution, including
        // the degenerate min == max digest.
        if value >= self.max {
            return 1.0;
        }
        debug_assert!(self.min != self.max);

        if self.merged == 1 {
            return (value - self.min) / (self.max - self.min);
        }

        let centroids = &self.centroids;
        let total = self.count as f64;
        let first = centroids[0];
        let back = centroids[centroids.len() - 1];

        if value < first.mean {
            return lerp(
                0.0,
                first.count as f64 / total / 2.0,
                first.mean - value,
                value - self.min,
            );
        }
        if value >= back.mean {
            return lerp(
                1.0 - back.count as f64 / total / 2.0,
                1.0,
                self.max - value,
                value - back.mean,
            );
        }

        let mut accum = first.count as f64 / 2.0;
        let mut i = 0;
        while i < centroids.len() {
            if centroids[i].mean == value {
                // Runs of identical means are collapsed: sum their counts
                // and answer with the midpoint of the run's mass.
                let before = accum;
                while i + 1 < centroids.len() && centroids[i + 1].mean == value {
                    accum += (centroids[i].count + centroids[i + 1].count) as f64;
                    i += 1;
                }
                return (before + accum) / 2.0 / total;
            }
            if i + 1 < centroids.len()
                && centroids[i].mean <= value
                && value < centroids[i + 1].mean
            {
                let mean1 = centroids[i].mean;
                let mean2 = centroids[i + 1].mean;
                // Guard against equal means surviving rounding.
                let mean_ratio = if mean2 <= mean1 {
                    1.0
                } else {
                    (value - mean1) / (mean2 - mean1)
                };
                let window = (centroids[i].count + centroids[i + 1].count) as f64 / 2.0;
                return (accum + window * mean_ratio) / total;
            }
            if i + 1 < centroids.len() {
                accum += (centroids[i].count + centroids[i + 1].count) as f64 / 2.0;
            }
            i += 1;
        }

        debug_assert!(false, "cdf scan fell through for {value}");
        f64::NAN
    }

    /// Estimated value at quantile `q`. `q` must be in `[0, 1]`; returns
    /// NaN when the digest is empty. Forces a compaction.
    pub fn quantile(&mut self, q: f64) -> f64 {
        debug_assert!((0.0..=1.0).contains(&q));

        self.compress();

        if self.merged == 0 {
            return f64::NAN;
        }
        if self.merged == 1 {
            return self.centroids[0].mean;
        }

        let centroids = &self.centroids;
        let quantile_count = q * self.count as f64;

        let mut prev_count = 0.0;
        let mut prev_val = self.min;
        let mut this_count = centroids[0].count as f64 / 2.0;
        let mut this_val = centroids[0].mean;

        for i in 0..centroids.len() {
            if quantile_count < this_count {
                break;
            }

            prev_count = this_count;
            prev_val = this_val;

            if i == centroids.len() - 1 {
                // Interpolate between the last centroid and max.
                this_count = self.count as f64;
                this_val = self.max;
            } else {
                this_count += (centroids[i].count + centroids[i + 1].count) as f64 / 2.0;
                this_val = centroids[i + 1].mean;
            }
        }

        lerp(
            prev_val,
            this_val,
            this_count - quantile_count,
            quantile_count - prev_count,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_digest(n: i64) -> TDigest {
        let mut digest = TDigest::new(100.0);
        for i in 0..n {
            digest.add(i as f64 / n as f64, 1);
        }
        digest
    }

    #[test]
    fn test_empty_queries_are_nan() {
        let mut digest = TDigest::new(100.0);
        assert!(digest.cdf(0.5).is_nan());
        assert!(digest.quantile(0.5).is_nan());
    }

    #[test]
    fn test_single_value() {
        let mut digest = TDigest::new(100.0);
        digest.add(5.0, 1);
        assert_eq!(digest.quantile(0.0), 5.0);
        assert_eq!(digest.quantile(0.5), 5.0);
        assert_eq!(digest.quantile(1.0), 5.0);
        assert_eq!(digest.cdf(4.0), 0.0);
        assert_eq!(digest.cdf(5.0), 1.0);
        assert_eq!(digest.cdf(6.0), 1.0);
    }

    #[test]
    fn test_single_centroid_cdf_is_increasing() {
        // Two identical values collapse into one centroid with min < max
        // impossible, so use two values that the compactor folds together
        // under a tiny compression.
        let mut digest = TDigest::new(1.0);
        digest.add(0.0, 1);
        digest.add(10.0, 1);
        digest.compress();
        if digest.centroids().len() == 1 {
            let lo = digest.cdf(2.0);
            let hi = digest.cdf(8.0);
            assert!(lo >= 0.0 && hi <= 1.0);
            assert!(lo < hi, "cdf must increase with value: {lo} vs {hi}");
        }
    }

    #[test]
    fn test_three_values_median() {
        let mut digest = TDigest::new(100.0);
        digest.add(1.0, 1);
        digest.add(2.0, 1);
        digest.add(3.0, 1);
        let median = digest.quantile(0.5);
        assert!((median - 2.0).abs() < 0.01, "median {median}");
    }

    #[test]
    fn test_boundary_quantiles_hit_extrema() {
        let mut digest = uniform_digest(1_000);
        digest.compress();
        assert_eq!(digest.quantile(0.0), digest.min());
        assert_eq!(digest.quantile(1.0), digest.max());
        // When the minimum forms its own centroid the cdf answers with
        // half that centroid's mass, not exactly zero.
        assert!(digest.cdf(digest.min()) < 1e-3);
        assert_eq!(digest.cdf(digest.max()), 1.0);
    }

    #[test]
    fn test_uniform_accuracy() {
        let mut digest = uniform_digest(10_000);
        for q in [0.01, 0.1, 0.25, 0.5, 0.75, 0.9, 0.99] {
            let estimate = digest.quantile(q);
            assert!(
                (estimate - q).abs() < 0.01,
                "q={q} estimate={estimate}"
            );
        }
    }

    #[test]
    fn test_cdf_monotone() {
        let mut digest = uniform_digest(10_000);
        let mut prev = -1.0;
        for i in 0..=100 {
            let v = f64::from(i) / 100.0;
            let p = digest.cdf(v);
            assert!(p >= prev, "cdf dipped at {v}: {p} < {prev}");
            prev = p;
        }
    }

    #[test]
    fn test_quantile_monotone() {
        let mut digest = uniform_digest(10_000);
        let mut prev = f64::NEG_INFINITY;
        for i in 0..=100 {
            let q = f64::from(i) / 100.0;
            let v = digest.quantile(q);
            assert!(v >= prev, "quantile dipped at {q}: {v} < {prev}");
            prev = v;
        }
    }

    #[test]
    fn test_cdf_at_repeated_value() {
        let mut digest = TDigest::new(100.0);
        digest.add(1.0, 10);
        digest.add(2.0, 10);
        digest.add(3.0, 10);
        let p = digest.cdf(2.0);
        assert!((p - 0.5).abs() < 1e-9, "cdf(2.0)={p}");
    }

    #[test]
    fn test_cdf_collapses_equal_mean_run() {
        // Duplicate means that survive compaction as separate centroids
        // still produce a cdf strictly between the neighbouring values.
        let mut digest = TDigest::new(100.0);
        for _ in 0..10 {
            digest.add(1.0, 1);
            digest.add(2.0, 1);
            digest.add(3.0, 1);
        }
        let at_two = digest.cdf(2.0);
        assert!(at_two > digest.cdf(1.5));
        assert!(at_two < digest.cdf(2.5));
        assert!(at_two > 0.0 && at_two < 1.0);
    }

    #[test]
    fn test_merge_quantiles_agree_with_single_digest() {
        let mut left = TDigest::new(100.0);
        let mut right = TDigest::new(100.0);
        let mut both = TDigest::new(100.0);
        for i in 0..10_000 {
            let v = f64::from(i) / 10_000.0;
            if i % 2 == 0 {
                left.add(v, 1);
            } else {
                right.add(v, 1);
            }
            both.add(v, 1);
        }
        left.merge(&right);
        for q in [0.01, 0.5, 0.99] {
            let merged = left.quantile(q);
            let single = both.quantile(q);
            assert!(
                (merged - single).abs() < 0.01,
                "q={q} merged={merged} single={single}"
            );
        }
    }

    #[test]
    fn test_lerp_weights() {
        assert_eq!(lerp(0.0, 10.0, 1.0, 1.0), 5.0);
        assert_eq!(lerp(0.0, 10.0, 3.0, 1.0), 2.5);
        assert_eq!(lerp(2.0, 2.0, 1.0, 5.0), 2.0);
    }
}
