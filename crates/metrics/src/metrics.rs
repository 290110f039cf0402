use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

lazy_static! {
    // ═══════════════════════════════════════════════════════════════════════════
    // RECORD METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// New coordination records (first proposals and new attempts)
    pub static ref PROPOSALS_CREATED: IntCounter = register_int_counter!(
        "unlost_handoff_proposals_total",
        "Total number of coordination records created"
    )
    .unwrap();

    /// Committed record writes by resulting status
    pub static ref RECORD_WRITES: IntCounterVec = register_int_counter_vec!(
        "unlost_handoff_record_writes_total",
        "Committed record writes by resulting status",
        &["status"]
    )
    .unwrap();

    /// Records currently pending or accepted
    pub static ref ACTIVE_RECORDS: IntGauge = register_int_gauge!(
        "unlost_handoff_records_active",
        "Current number of pending or accepted records"
    )
    .unwrap();

    /// Conditional writes rejected because the record changed underneath
    pub static ref CONFLICTS: IntCounter = register_int_counter!(
        "unlost_handoff_conflicts_total",
        "Total number of conditional write conflicts"
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // OUTCOME METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub static ref AUTO_FAILED: IntCounter = register_int_counter!(
        "unlost_handoff_auto_failed_total",
        "Meetings failed by the auto-fail watcher"
    )
    .unwrap();

    pub static ref CLAIMS_COMPLETED: IntCounter = register_int_counter!(
        "unlost_handoff_claims_completed_total",
        "Handoffs confirmed by the claimant"
    )
    .unwrap();

    /// Claims whose item update was rolled back
    pub static ref CLAIMS_COMPENSATED: IntCounter = register_int_counter!(
        "unlost_handoff_claims_compensated_total",
        "Claim confirmations that were compensated"
    )
    .unwrap();

    pub static ref NOTIFICATION_FAILURES: IntCounter = register_int_counter!(
        "unlost_handoff_notification_failures_total",
        "Notifications that failed or timed out"
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // INFRASTRUCTURE METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Store call latency (in milliseconds)
    pub static ref STORE_OP_LATENCY: HistogramVec = register_histogram_vec!(
        "unlost_handoff_store_op_latency_ms",
        "Store operation latency in milliseconds",
        &["op"],
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0]
    )
    .unwrap();

    /// Error events by `error_type` field
    pub static ref ERRORS: IntCounterVec = register_int_counter_vec!(
        "unlost_handoff_errors_total",
        "Error events by type",
        &["error_type"]
    )
    .unwrap();

    /// Feed subscribers that fell behind and had to resync
    pub static ref FEED_RESYNCS: IntCounter = register_int_counter!(
        "unlost_handoff_feed_resyncs_total",
        "Change feed lag events"
    )
    .unwrap();
}
