use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::analytics::{AnalyticsEvent, AnalyticsSink, HttpAnalyticsSink, NoopAnalyticsSink};
use crate::config::ServiceConfig;
use crate::dedup::RequestDedup;
use crate::error::{Result, ServiceError};
use crate::observability::{Observability, ObservabilitySnapshot};
use crate::quota::QuotaLedger;
use crate::reconcile::{CompletionReport, ReconcileOutcome, decide};
use crate::sqlite_store::SqliteStore;
use crate::store::{CheckType, MonitoringLogEntry, QuotaSnapshot, SearchRecord, SearchStatus};
use crate::{Clock, SystemClock};

static SOLUTION_ID_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LaunchReceipt {
    pub solution_id: String,
    pub quota: QuotaSnapshot,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweepSummary {
    pub checked: usize,
    pub results: Vec<ReconcileOutcome>,
}

/// The fast-search service core: quota ledger, search lifecycle, and the
/// reconciliation runner shared by the webhook and the sweep.
pub struct Service {
    store: SqliteStore,
    quota: QuotaLedger,
    dedup: RequestDedup,
    analytics: Arc<dyn AnalyticsSink>,
    clock: Box<dyn Clock>,
    observability: Observability,
    stale_after_minutes: u64,
}

impl Service {
    pub fn new(store: SqliteStore, config: &ServiceConfig) -> Self {
        Self::with_clock(store, config, Box::new(SystemClock))
    }

    pub fn with_clock(store: SqliteStore, config: &ServiceConfig, clock: Box<dyn Clock>) -> Self {
        let analytics: Arc<dyn AnalyticsSink> = match config.analytics_endpoint.as_deref() {
            Some(endpoint) => Arc::new(HttpAnalyticsSink::new(endpoint)),
            None => Arc::new(NoopAnalyticsSink),
        };
        Self {
            quota: QuotaLedger::new(store.clone(), config.default_quota_limit),
            dedup: RequestDedup::new(store.clone(), config.dedup_ttl_seconds),
            store,
            analytics,
            clock,
            observability: Observability::default(),
            stale_after_minutes: config.stale_after_minutes,
        }
    }

    pub fn with_analytics(mut self, sink: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = sink;
        self
    }

    pub fn observability(&self) -> ObservabilitySnapshot {
        self.observability.snapshot()
    }

    /// Launch a fast search for a brief: dedup, consume one quota unit,
    /// create the pending search record. If the record insert fails after
    /// the quota was consumed, the unit is credited back.
    pub async fn launch(
        &mut self,
        user_id: &str,
        brief_id: &str,
        solution_id: Option<String>,
        request_id: Option<&str>,
    ) -> Result<LaunchReceipt> {
        self.observability.record_request();

        if brief_id.trim().is_empty() {
            return Err(ServiceError::validation("brief_id is required"));
        }

        let now_ms = self.clock.now_ms();
        if let Some(request_id) = request_id {
            if let Err(err) = self.dedup.claim(user_id, request_id, now_ms).await {
                if matches!(err, ServiceError::DuplicateRequest { .. }) {
                    self.observability.record_duplicate_launch();
                }
                return Err(err);
            }
        }

        let solution_id = solution_id.unwrap_or_else(|| generate_solution_id(now_ms));
        if self.store.search(&solution_id).await?.is_some() {
            return Err(ServiceError::validation(format!(
                "solution {solution_id} already exists"
            )));
        }

        let quota = match self.quota.consume(user_id).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                if matches!(err, ServiceError::QuotaExceeded { .. }) {
                    self.observability.record_quota_denied();
                }
                return Err(err);
            }
        };

        let record = SearchRecord {
            solution_id: solution_id.clone(),
            brief_id: brief_id.to_string(),
            user_id: user_id.to_string(),
            launched_at_ms: now_ms,
            fast_search_status: SearchStatus::Pending,
            fast_search_checked_at_ms: None,
        };
        if let Err(err) = self.store.insert_search(&record).await {
            // Refund so a storage hiccup does not eat the user's quota.
            if let Err(credit_err) = self.quota.credit(user_id, "launch failed").await {
                warn!(solution_id, error = %credit_err, "refund after failed launch did not apply");
            }
            return Err(err.into());
        }

        self.observability.record_launch();
        Ok(LaunchReceipt { solution_id, quota })
    }

    /// Push path: the workflow engine reported completion.
    pub async fn callback(
        &mut self,
        solution_id: &str,
        report: CompletionReport,
    ) -> Result<ReconcileOutcome> {
        self.observability.record_request();
        self.observability.record_callback();
        self.reconcile(solution_id, Some(report), CheckType::Callback)
            .await
    }

    /// Pull path: reconcile every pending search older than the staleness
    /// threshold, sequentially. A record that fails mid-reconcile stays
    /// pending and is retried on the next sweep.
    pub async fn sweep(&mut self, delay_minutes: Option<u64>) -> Result<SweepSummary> {
        self.observability.record_request();
        self.observability.record_sweep();

        let delay = delay_minutes.unwrap_or(self.stale_after_minutes);
        let cutoff_ms = self
            .clock
            .now_ms()
            .saturating_sub((delay as i64).saturating_mul(60_000));
        let stale = self.store.stale_pending_searches(cutoff_ms).await?;

        let mut results = Vec::with_capacity(stale.len());
        for record in stale {
            match self
                .reconcile(&record.solution_id, None, CheckType::AutoCheck)
                .await
            {
                Ok(outcome) => results.push(outcome),
                Err(err) => {
                    warn!(
                        solution_id = %record.solution_id,
                        error = %err,
                        "sweep left search pending for the next pass"
                    );
                }
            }
        }

        Ok(SweepSummary {
            checked: results.len(),
            results,
        })
    }

    /// Manual variant of the sweep for one named search, bypassing the
    /// staleness filter.
    pub async fn check_one(&mut self, solution_id: &str) -> Result<ReconcileOutcome> {
        self.observability.record_request();
        self.observability.record_sweep();
        self.reconcile(solution_id, None, CheckType::AutoCheck).await
    }

    pub async fn quota_snapshot(&mut self, user_id: &str) -> Result<QuotaSnapshot> {
        self.observability.record_request();
        self.quota.snapshot(user_id).await
    }

    /// Write path for the external worker's supplier matches.
    pub async fn ingest_matches(
        &mut self,
        solution_id: &str,
        supplier_names: &[String],
    ) -> Result<usize> {
        self.observability.record_request();
        if self.store.search(solution_id).await?.is_none() {
            return Err(ServiceError::not_found(format!("solution {solution_id}")));
        }
        let inserted = self
            .store
            .insert_supplier_matches(solution_id, supplier_names)
            .await?;
        Ok(inserted)
    }

    /// Both triggers converge here. Terminal records are a quota no-op, so
    /// at-least-once webhook delivery can never refund twice. The status
    /// transition, the refund, the monitoring row, and the analytics event
    /// are applied in that order, each best-effort after the transition.
    async fn reconcile(
        &mut self,
        solution_id: &str,
        report: Option<CompletionReport>,
        check_type: CheckType,
    ) -> Result<ReconcileOutcome> {
        let Some(record) = self.store.search(solution_id).await? else {
            return Err(ServiceError::not_found(format!("solution {solution_id}")));
        };

        if record.fast_search_status.is_terminal() {
            let suppliers_found = self.store.supplier_match_count(solution_id).await.unwrap_or(0);
            return Ok(ReconcileOutcome {
                solution_id: solution_id.to_string(),
                status: record.fast_search_status,
                suppliers_found,
                refunded: false,
                reason: None,
            });
        }

        // A count failure leaves the record pending; the next sweep or the
        // webhook redelivery picks it up.
        let suppliers_found = self.store.supplier_match_count(solution_id).await?;
        let decision = decide(report.as_ref(), suppliers_found, check_type);

        let checked_at_ms = self.clock.now_ms();
        let transitioned = self
            .store
            .finish_search(solution_id, decision.status, checked_at_ms)
            .await?;
        if !transitioned {
            // Lost the race against the other trigger; its refund stands.
            let status = self
                .store
                .search(solution_id)
                .await?
                .map(|current| current.fast_search_status)
                .unwrap_or(decision.status);
            return Ok(ReconcileOutcome {
                solution_id: solution_id.to_string(),
                status,
                suppliers_found,
                refunded: false,
                reason: None,
            });
        }
        self.observability.record_reconciled();

        let mut refunded = false;
        let mut refund_error = None;
        if decision.refund {
            let reason = decision.reason.as_deref().unwrap_or("fast search refund");
            match self.quota.credit(&record.user_id, reason).await {
                Ok(_) => {
                    refunded = true;
                    self.observability.record_refund();
                }
                Err(err) => {
                    // Status transition stands even when the refund write
                    // fails; the monitoring row records the discrepancy.
                    warn!(solution_id, error = %err, "quota refund did not apply");
                    refund_error = Some(err.to_string());
                }
            }
        }

        let reported_status = report.as_ref().map(|r| r.status);
        let details = serde_json::json!({
            "check_type": check_type,
            "reported_status": reported_status,
            "reason": decision.reason,
            "refund_error": refund_error,
        });
        let log_entry = MonitoringLogEntry {
            solution_id: solution_id.to_string(),
            brief_id: record.brief_id.clone(),
            user_id: record.user_id.clone(),
            check_type,
            status: decision.status,
            suppliers_found,
            refunded,
            details,
        };
        if let Err(err) = self.store.append_monitoring_log(&log_entry).await {
            warn!(solution_id, error = %err, "monitoring log append failed");
        }

        let delivered = self
            .analytics
            .publish(AnalyticsEvent {
                name: "fast_search_reconciled",
                payload: serde_json::json!({
                    "solution_id": solution_id,
                    "brief_id": record.brief_id,
                    "user_id": record.user_id,
                    "status": decision.status,
                    "suppliers_found": suppliers_found,
                    "refunded": refunded,
                    "check_type": check_type,
                }),
            })
            .await;
        if !delivered {
            self.observability.record_analytics_failure();
        }

        Ok(ReconcileOutcome {
            solution_id: solution_id.to_string(),
            status: decision.status,
            suppliers_found,
            refunded,
            reason: decision.reason,
        })
    }
}

fn generate_solution_id(now_ms: i64) -> String {
    let seq = SOLUTION_ID_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("sol-{now_ms}-{seq}")
}
