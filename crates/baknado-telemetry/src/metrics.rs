//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes only the counters and gauges the pipeline workers report.

use std::convert::TryFrom;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use serde::Serialize;

/// Stage labels summed into [`MetricsSnapshot`].
pub const STAGES: [&str; 2] = ["split", "upload"];

/// Prometheus-backed metrics registry shared by the pipeline workers.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    requests_total: IntCounterVec,
    parts_total: IntCounterVec,
    bytes_uploaded_total: IntCounter,
    queue_depth: IntGaugeVec,
    stage_latency_ms: IntGaugeVec,
}

/// Snapshot of selected counters for health reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Requests that completed a stage.
    pub requests_completed: u64,
    /// Stage attempts that failed and were left for retry.
    pub requests_failed: u64,
    /// Requests routed to the dead-letter queue.
    pub requests_abandoned: u64,
    /// Parts transferred successfully.
    pub parts_uploaded: u64,
    /// Part transfer attempts that failed.
    pub parts_failed: u64,
    /// Parts skipped after exceeding their retry ceiling.
    pub parts_skipped: u64,
    /// Bytes acknowledged by the object store.
    pub bytes_uploaded: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new(
                "baknado_requests_total",
                "Requests handled by pipeline stage and outcome",
            ),
            &["stage", "outcome"],
        )?;
        let parts_total = IntCounterVec::new(
            Opts::new("baknado_parts_total", "Part transfers by outcome"),
            &["outcome"],
        )?;
        let bytes_uploaded_total = IntCounter::with_opts(Opts::new(
            "baknado_bytes_uploaded_total",
            "Bytes acknowledged by the object store",
        ))?;
        let queue_depth = IntGaugeVec::new(
            Opts::new("baknado_queue_depth", "Matching entries per queue"),
            &["queue"],
        )?;
        let stage_latency_ms = IntGaugeVec::new(
            Opts::new(
                "baknado_stage_latency_ms",
                "Duration of the latest stage invocation (ms)",
            ),
            &["stage"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(parts_total.clone()))?;
        registry.register(Box::new(bytes_uploaded_total.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(stage_latency_ms.clone()))?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                requests_total,
                parts_total,
                bytes_uploaded_total,
                queue_depth,
                stage_latency_ms,
            }),
        })
    }

    /// Increment the request counter for a stage outcome
    /// (`completed`, `failed`, `abandoned`).
    pub fn inc_request(&self, stage: &str, outcome: &str) {
        self.inner
            .requests_total
            .with_label_values(&[stage, outcome])
            .inc();
    }

    /// Increment the part counter for an outcome (`uploaded`, `failed`, `skipped`).
    pub fn inc_part(&self, outcome: &str) {
        self.inner.parts_total.with_label_values(&[outcome]).inc();
    }

    /// Record bytes acknowledged by the object store.
    pub fn add_bytes_uploaded(&self, bytes: u64) {
        self.inner.bytes_uploaded_total.inc_by(bytes);
    }

    /// Set the depth gauge for a queue.
    pub fn set_queue_depth(&self, queue: &str, depth: usize) {
        self.inner
            .queue_depth
            .with_label_values(&[queue])
            .set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    /// Record how long the latest invocation of a stage took.
    pub fn observe_stage_latency(&self, stage: &str, duration: Duration) {
        self.inner
            .stage_latency_ms
            .with_label_values(&[stage])
            .set(Self::duration_to_ms(duration));
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("failed to encode Prometheus metrics")?;
        String::from_utf8(buffer).context("metrics output was not valid UTF-8")
    }

    /// Take a point-in-time snapshot of the pipeline counters, summed across stages.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_completed: self.requests_with_outcome("completed"),
            requests_failed: self.requests_with_outcome("failed"),
            requests_abandoned: self.requests_with_outcome("abandoned"),
            parts_uploaded: self.inner.parts_total.with_label_values(&["uploaded"]).get(),
            parts_failed: self.inner.parts_total.with_label_values(&["failed"]).get(),
            parts_skipped: self.inner.parts_total.with_label_values(&["skipped"]).get(),
            bytes_uploaded: self.inner.bytes_uploaded_total.get(),
        }
    }

    fn requests_with_outcome(&self, outcome: &str) -> u64 {
        STAGES
            .iter()
            .map(|stage| {
                self.inner
                    .requests_total
                    .with_label_values(&[*stage, outcome])
                    .get()
            })
            .sum()
    }

    /// Convert a duration to milliseconds saturating at `i64::MAX`.
    pub(crate) fn duration_to_ms(duration: Duration) -> i64 {
        i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_to_ms_saturates_on_large_values() {
        let duration = Duration::from_secs(u64::MAX / 2);
        assert_eq!(Metrics::duration_to_ms(duration), i64::MAX);
    }

    #[test]
    fn metrics_snapshot_reflects_updates() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_request("split", "completed");
        metrics.inc_request("upload", "completed");
        metrics.inc_request("upload", "failed");
        metrics.inc_request("upload", "abandoned");
        metrics.inc_part("uploaded");
        metrics.inc_part("uploaded");
        metrics.inc_part("failed");
        metrics.add_bytes_uploaded(4_096);
        metrics.set_queue_depth("ready", 3);
        metrics.observe_stage_latency("split", Duration::from_millis(250));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_completed, 2);
        assert_eq!(snapshot.requests_failed, 1);
        assert_eq!(snapshot.requests_abandoned, 1);
        assert_eq!(snapshot.parts_uploaded, 2);
        assert_eq!(snapshot.parts_failed, 1);
        assert_eq!(snapshot.parts_skipped, 0);
        assert_eq!(snapshot.bytes_uploaded, 4_096);

        let rendered = metrics.render()?;
        assert!(rendered.contains("baknado_requests_total"));
        assert!(rendered.contains("baknado_queue_depth"));
        assert!(rendered.contains("baknado_stage_latency_ms"));
        Ok(())
    }

    #[test]
    fn snapshot_serialises_to_json() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_part("skipped");
        let value = serde_json::to_value(metrics.snapshot())?;
        assert_eq!(value["parts_skipped"], 1);
        Ok(())
    }
}
