use std::time::Duration;

use handoff_types::{CoordinationRecord, RequestStatus};
use prometheus::{Encoder, TextEncoder};

use crate::metrics::*;

/// Metrics collector for the handoff service.
///
/// Fed from two directions: committed records arrive through the change
/// feed, everything else through tracing events (see `MetricsLayer`).
#[derive(Debug, Default)]
pub struct MetricsCollector {
    _private: (),
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RECORD METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Account for one committed record version
    pub fn observe_record(&self, record: &CoordinationRecord) {
        RECORD_WRITES
            .with_label_values(&[record.status.as_str()])
            .inc();

        if record.version == 1 {
            PROPOSALS_CREATED.inc();
            ACTIVE_RECORDS.inc();
            return;
        }

        // Each of these is reached exactly once per record, always from an
        // active status
        match record.status {
            RequestStatus::Completed => {
                CLAIMS_COMPLETED.inc();
                ACTIVE_RECORDS.dec();
            }
            RequestStatus::Failed | RequestStatus::Cancelled => {
                ACTIVE_RECORDS.dec();
            }
            _ => {}
        }
    }

    /// Seed the gauge from the store at startup
    pub fn set_active_records(&self, count: usize) {
        ACTIVE_RECORDS.set(count as i64);
    }

    pub fn record_feed_resync(&self) {
        FEED_RESYNCS.inc();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EVENT METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Count an error event by its `error_type` tag
    pub fn record_error(&self, error_type: &str) {
        ERRORS.with_label_values(&[error_type]).inc();

        match error_type {
            "conflict" => CONFLICTS.inc(),
            "claim_compensated" => CLAIMS_COMPENSATED.inc(),
            "notification_failed" => NOTIFICATION_FAILURES.inc(),
            _ => {}
        }
    }

    pub fn record_auto_failed(&self, count: u64) {
        AUTO_FAILED.inc_by(count);
    }

    pub fn record_store_latency(&self, op: &str, latency: Duration) {
        STORE_OP_LATENCY
            .with_label_values(&[op])
            .observe(latency.as_millis() as f64);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EXPORT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Export all metrics in Prometheus text format
    pub fn export_metrics(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::EncodingError(e.to_string()))?;

        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingError(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to encode metrics: {0}")]
    EncodingError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use handoff_types::MeetingTerms;

    fn record(status: RequestStatus, version: u64) -> CoordinationRecord {
        let now = Utc::now();
        let mut record = CoordinationRecord::proposal(
            "req-1".to_string(),
            "item-1".to_string(),
            "finder".to_string(),
            "claimant".to_string(),
            "claimant".to_string(),
            MeetingTerms::new(now, "Library"),
            now,
        );
        record.status = status;
        record.version = version;
        record
    }

    // Counters are process-global, so assert on deltas only

    #[test]
    fn test_observe_new_record() {
        let collector = MetricsCollector::new();
        let before = PROPOSALS_CREATED.get();

        collector.observe_record(&record(RequestStatus::Pending, 1));

        assert!(PROPOSALS_CREATED.get() >= before + 1);
        let metrics = collector.export_metrics().unwrap();
        assert!(metrics.contains("unlost_handoff_proposals_total"));
        assert!(metrics.contains("unlost_handoff_record_writes_total"));
    }

    #[test]
    fn test_observe_completion() {
        let collector = MetricsCollector::new();
        let before = CLAIMS_COMPLETED.get();

        collector.observe_record(&record(RequestStatus::Completed, 4));

        assert!(CLAIMS_COMPLETED.get() >= before + 1);
        assert!(collector
            .export_metrics()
            .unwrap()
            .contains("status=\"completed\""));
    }

    #[test]
    fn test_error_types_feed_dedicated_counters() {
        let collector = MetricsCollector::new();
        let conflicts = CONFLICTS.get();
        let compensated = CLAIMS_COMPENSATED.get();

        collector.record_error("conflict");
        collector.record_error("claim_compensated");
        collector.record_error("store_unavailable");

        assert!(CONFLICTS.get() >= conflicts + 1);
        assert!(CLAIMS_COMPENSATED.get() >= compensated + 1);
        assert!(collector
            .export_metrics()
            .unwrap()
            .contains("error_type=\"store_unavailable\""));
    }

    #[test]
    fn test_store_latency_histogram() {
        let collector = MetricsCollector::new();
        collector.record_store_latency("get", Duration::from_millis(3));

        let metrics = collector.export_metrics().unwrap();
        assert!(metrics.contains("unlost_handoff_store_op_latency_ms"));
        assert!(metrics.contains("op=\"get\""));
    }
}
