//! Backend service for the supplier-discovery fast-search flow.
//!
//! A fast search is launched against a brief, consumes one unit of the
//! caller's quota, and is completed asynchronously by an external workflow
//! engine. Completion is reconciled either by the engine's webhook or, when
//! the engine fails silently, by a periodic staleness sweep. Both paths share
//! one decision rule and refund the quota when a search produced nothing.

pub mod analytics;
pub mod config;
pub mod dedup;
pub mod error;
pub mod http;
pub mod observability;
pub mod quota;
pub mod reconcile;
pub mod service;
pub mod sqlite_store;
pub mod store;
pub mod telemetry;

pub use analytics::{AnalyticsEvent, AnalyticsSink, HttpAnalyticsSink, NoopAnalyticsSink};
pub use config::{ApiTokenConfig, ServiceConfig};
pub use dedup::RequestDedup;
pub use error::{Result, ServiceError};
pub use http::{HttpState, router};
pub use observability::{Observability, ObservabilitySnapshot};
pub use quota::{FAST_SEARCH_ACTION, QuotaLedger};
pub use reconcile::{CompletionReport, Decision, ReconcileOutcome, ReportedStatus, decide};
pub use service::{LaunchReceipt, Service, SweepSummary};
pub use sqlite_store::{SqliteStore, StoreError};
pub use store::{CheckType, MonitoringLogRecord, QuotaSnapshot, SearchRecord, SearchStatus};

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|duration| duration.as_millis() as i64)
            .unwrap_or(0)
    }
}
