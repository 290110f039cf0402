use std::sync::Arc;
use std::time::Duration;

use handoff_types::CoordinationRecord;
use tracing::{field::Visit, Event, Subscriber};
use tracing_subscriber::{
    fmt,
    layer::{Context, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::collector::MetricsCollector;

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "info,unlost_handoff=debug,handoff_coordination=debug";

/// Install the global subscriber: env filter, `fmt` output and the metrics
/// layer. `level` is used when `RUST_LOG` is unset.
pub fn init_tracing(
    json: bool,
    level: &str,
    collector: Arc<MetricsCollector>,
) -> Result<(), TracingError> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(format!(
            "{level},unlost_handoff={level},handoff_coordination={level}"
        ))
    });
    let env_filter = env_filter.unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(MetricsLayer::new(collector));

    let result = if json {
        registry
            .with(fmt::layer().with_target(true).with_level(true).json())
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .try_init()
    };

    result.map_err(|e| TracingError::InitError(e.to_string()))
}

/// Tracing layer that turns tagged events into metrics.
///
/// Recognized fields: `error_type` (any level), `auto_failed`, and the
/// `store_op` + `elapsed_ms` pair.
pub struct MetricsLayer {
    collector: Arc<MetricsCollector>,
}

impl MetricsLayer {
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        Self { collector }
    }
}

impl<S> Layer<S> for MetricsLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MetricsVisitor::default();
        event.record(&mut visitor);

        if let Some(error_type) = visitor.error_type.as_deref() {
            self.collector.record_error(error_type);
        }
        if let Some(count) = visitor.auto_failed {
            self.collector.record_auto_failed(count);
        }
        // Timed-out calls carry an error_type and are counted there instead
        if let (Some(op), Some(ms), None) = (
            visitor.store_op.as_deref(),
            visitor.elapsed_ms,
            visitor.error_type.as_deref(),
        ) {
            self.collector
                .record_store_latency(op, Duration::from_millis(ms));
        }
    }
}

#[derive(Default)]
struct MetricsVisitor {
    error_type: Option<String>,
    store_op: Option<String>,
    elapsed_ms: Option<u64>,
    auto_failed: Option<u64>,
}

impl Visit for MetricsVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "error_type" => self.error_type = Some(format!("{value:?}").trim_matches('"').to_string()),
            "store_op" => self.store_op = Some(format!("{value:?}").trim_matches('"').to_string()),
            _ => {}
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "error_type" => self.error_type = Some(value.to_string()),
            "store_op" => self.store_op = Some(value.to_string()),
            _ => {}
        }
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        match field.name() {
            "elapsed_ms" => self.elapsed_ms = Some(value),
            "auto_failed" => self.auto_failed = Some(value),
            _ => {}
        }
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        if value >= 0 {
            self.record_u64(field, value as u64);
        }
    }
}

/// Correlation ID for following one request through the logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(uuid::Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Span context for work on a single coordination record
#[derive(Debug, Clone)]
pub struct RecordSpan {
    pub correlation_id: CorrelationId,
    pub record_id: String,
    pub item_id: String,
}

impl RecordSpan {
    pub fn new(record_id: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            record_id: record_id.into(),
            item_id: item_id.into(),
        }
    }

    pub fn for_record(record: &CoordinationRecord) -> Self {
        Self::new(record.id.clone(), record.item_id.clone())
    }

    pub fn enter(&self) -> tracing::span::EnteredSpan {
        tracing::info_span!(
            "coordination_record",
            correlation_id = %self.correlation_id,
            record_id = %self.record_id,
            item_id = %self.item_id,
        )
        .entered()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("tracing initialization error: {0}")]
    InitError(String),
}
