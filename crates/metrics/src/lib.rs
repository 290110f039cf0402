//! Metrics and tracing for the UnLost handoff service
//!
//! - Prometheus metrics for proposals, record writes, conflicts, auto-fails,
//!   claims and store latency
//! - HTTP endpoint for metrics scraping
//! - A tracing layer that derives metrics from tagged log events
//! - Correlation IDs and per-record spans
//!
//! # Example
//!
//! ```no_run
//! use handoff_metrics::{MetricsCollector, MetricsServer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let collector = Arc::new(MetricsCollector::new());
//!     let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!
//!     let server = MetricsServer::new(collector.clone(), "0.0.0.0:9100");
//!     server.serve(shutdown_rx).await.unwrap();
//! }
//! ```

pub mod collector;
pub mod http;
pub mod metrics;
pub mod tracing;

pub use collector::{MetricsCollector, MetricsError};
pub use http::{router, MetricsServer, MetricsServerError};
pub use crate::tracing::{
    init_tracing, CorrelationId, MetricsLayer, RecordSpan, TracingError, DEFAULT_FILTER,
};
