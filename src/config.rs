use std::time::Duration;

use serde::Deserialize;

/// Sketch accuracy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SketchConfig {
    /// Digest compression: higher keeps more centroids for better tail
    /// accuracy at more memory. Default: 100.
    #[serde(default = "default_compression")]
    pub compression: f64,
}

impl Default for SketchConfig {
    fn default() -> Self {
        Self {
            compression: default_compression(),
        }
    }
}

/// Ingest pipeline configuration. Hosts embed this into their own config
/// tree; the crate does no file or environment loading.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Identifies the pipeline in diagnostics and tracker logs.
    /// Default: "sketchoor".
    #[serde(default = "default_name")]
    pub name: String,

    /// Per-series sketch settings.
    #[serde(default)]
    pub sketch: SketchConfig,

    /// How often the collector publishes wire snapshots. Default: 1s.
    #[serde(default = "default_snapshot_interval", with = "humantime_serde")]
    pub snapshot_interval: Duration,

    /// Maximum samples folded per drain pass, so flushes interleave with
    /// a busy queue. Default: 256.
    #[serde(default = "default_drain_batch")]
    pub drain_batch: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            sketch: SketchConfig::default(),
            snapshot_interval: default_snapshot_interval(),
            drain_batch: default_drain_batch(),
        }
    }
}

fn default_compression() -> f64 {
    100.0
}

fn default_name() -> String {
    "sketchoor".to_string()
}

fn default_snapshot_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_drain_batch() -> usize {
    256
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.name, "sketchoor");
        assert_eq!(cfg.sketch.compression, 100.0);
        assert_eq!(cfg.snapshot_interval, Duration::from_secs(1));
        assert_eq!(cfg.drain_batch, 256);
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let cfg: PipelineConfig = serde_json::from_str(
            r#"{"name": "ingest", "snapshot_interval": "250ms"}"#,
        )
        .expect("parse config");
        assert_eq!(cfg.name, "ingest");
        assert_eq!(cfg.snapshot_interval, Duration::from_millis(250));
        assert_eq!(cfg.sketch.compression, 100.0);
        assert_eq!(cfg.drain_batch, 256);
    }

    #[test]
    fn test_sketch_override() {
        let cfg: PipelineConfig =
            serde_json::from_str(r#"{"sketch": {"compression": 500}}"#).expect("parse config");
        assert_eq!(cfg.sketch.compression, 500.0);
    }
}
