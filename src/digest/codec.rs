//! Textual wire form for [`TDigest`].
//!
//! Single line, `/`-delimited:
//!
//! ```text
//! empty:         compression/0/0/0/0
//! single sample: compression/mean
//! general:       compression/min/max/sum/count/mean0:count0/mean1:count1/...
//! ```
//!
//! Floats use Rust's shortest round-trip decimal form, so a parsed digest
//! re-serializes to the identical string. This is the crate's only
//! byte-exact external contract.

use std::fmt::Write as _;
use std::str::FromStr;

use thiserror::Error;

use super::TDigest;

/// Maximum absolute drift tolerated between the transported sum and the
/// sum rebuilt from parsed centroids.
const SUM_DRIFT_TOLERANCE: f64 = 1e-10;

/// Errors surfaced while decoding the wire form.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("missing compression")]
    MissingCompression,

    #[error("invalid number: {0}")]
    InvalidNumber(String),

    #[error("negative compression")]
    NegativeCompression,

    #[error("unexpected end of input")]
    StructureMismatch,

    #[error("declared count does not match centroid counts")]
    InconsistentCount,

    #[error("empty digest with non-zero min, max, sum, or count")]
    NonEmptyWithZeroHeader,
}

fn parse_f64(token: &str) -> Result<f64, WireError> {
    token
        .parse::<f64>()
        .map_err(|_| WireError::InvalidNumber(token.to_string()))
}

fn parse_i64(token: &str) -> Result<i64, WireError> {
    token
        .parse::<i64>()
        .map_err(|_| WireError::InvalidNumber(token.to_string()))
}

impl TDigest {
    /// Serializes the digest. Forces a compaction for the general form so
    /// the emitted centroid sequence is the canonical merged one.
    pub fn to_wire(&mut self) -> String {
        let mut out = format!("{}", self.compression);
        if self.count <= 1 {
            if self.count == 0 {
                // Min/max serialize as zero when empty regardless of the
                // in-memory sentinels.
                out.push_str("/0/0/0/0");
                return out;
            }
            let _ = write!(out, "/{}", self.centroids[0].mean);
            return out;
        }

        self.compress();

        let _ = write!(
            out,
            "/{}/{}/{}/{}",
            self.min, self.max, self.sum, self.count
        );
        for centroid in &self.centroids {
            let _ = write!(out, "/{}:{}", centroid.mean, centroid.count);
        }
        out
    }

    /// Replaces this digest's contents with the digest encoded in
    /// `input`. Empty input is accepted as "not set" and resets the
    /// digest. On error the digest's contents are unspecified; reset it
    /// before reuse.
    pub fn from_wire(&mut self, input: &str) -> Result<(), WireError> {
        if input.is_empty() {
            self.reset(0.0);
            return Ok(());
        }

        let mut tokens = input.split('/').peekable();

        let first = match tokens.next() {
            Some(token) if !token.is_empty() => token,
            _ => return Err(WireError::MissingCompression),
        };
        let compression = parse_f64(first)?;
        if compression < 0.0 {
            return Err(WireError::NegativeCompression);
        }
        self.reset(compression);

        let second = tokens.next().ok_or(WireError::StructureMismatch)?;
        if tokens.peek().is_none() {
            // Single-sample form.
            self.add(parse_f64(second)?, 1);
            return Ok(());
        }

        let min = parse_f64(second)?;
        let max = parse_f64(tokens.next().ok_or(WireError::StructureMismatch)?)?;
        let sum = parse_f64(tokens.next().ok_or(WireError::StructureMismatch)?)?;
        let count = parse_i64(tokens.next().ok_or(WireError::StructureMismatch)?)?;

        if tokens.peek().is_none() {
            // Declared-empty digest must carry an all-zero header.
            if min != 0.0 || max != 0.0 || sum != 0.0 || count != 0 {
                return Err(WireError::NonEmptyWithZeroHeader);
            }
            return Ok(());
        }

        for token in tokens {
            let (mean_token, count_token) = token
                .split_once(':')
                .ok_or_else(|| WireError::InvalidNumber(token.to_string()))?;
            self.add(parse_f64(mean_token)?, parse_i64(count_token)?);
        }

        self.compress();
        self.min = min;
        self.max = max;

        if self.centroids.is_empty() {
            return Ok(());
        }

        debug_assert!(
            (sum - self.sum).abs() < SUM_DRIFT_TOLERANCE,
            "wire sum drift: {} vs {}",
            sum,
            self.sum
        );
        if count != self.count {
            return Err(WireError::InconsistentCount);
        }
        Ok(())
    }
}

impl FromStr for TDigest {
    type Err = WireError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut digest = TDigest::new(0.0);
        digest.from_wire(input)?;
        Ok(digest)
    }
}
