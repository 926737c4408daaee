use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ObservabilitySnapshot {
    pub requests: u64,
    pub launches: u64,
    pub duplicate_launches: u64,
    pub quota_denied: u64,
    pub callbacks: u64,
    pub sweeps: u64,
    pub reconciled: u64,
    pub refunds: u64,
    pub analytics_failures: u64,
}

#[derive(Debug, Default)]
pub struct Observability {
    snapshot: ObservabilitySnapshot,
}

impl Observability {
    pub fn record_request(&mut self) {
        self.snapshot.requests = self.snapshot.requests.saturating_add(1);
    }

    pub fn record_launch(&mut self) {
        self.snapshot.launches = self.snapshot.launches.saturating_add(1);
    }

    pub fn record_duplicate_launch(&mut self) {
        self.snapshot.duplicate_launches = self.snapshot.duplicate_launches.saturating_add(1);
    }

    pub fn record_quota_denied(&mut self) {
        self.snapshot.quota_denied = self.snapshot.quota_denied.saturating_add(1);
    }

    pub fn record_callback(&mut self) {
        self.snapshot.callbacks = self.snapshot.callbacks.saturating_add(1);
    }

    pub fn record_sweep(&mut self) {
        self.snapshot.sweeps = self.snapshot.sweeps.saturating_add(1);
    }

    pub fn record_reconciled(&mut self) {
        self.snapshot.reconciled = self.snapshot.reconciled.saturating_add(1);
    }

    pub fn record_refund(&mut self) {
        self.snapshot.refunds = self.snapshot.refunds.saturating_add(1);
    }

    pub fn record_analytics_failure(&mut self) {
        self.snapshot.analytics_failures = self.snapshot.analytics_failures.saturating_add(1);
    }

    pub fn snapshot(&self) -> ObservabilitySnapshot {
        self.snapshot.clone()
    }
}
