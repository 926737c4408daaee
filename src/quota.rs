use tracing::info;

use crate::error::{Result, ServiceError};
use crate::sqlite_store::SqliteStore;
use crate::store::QuotaSnapshot;

/// The one billable action this service meters.
pub const FAST_SEARCH_ACTION: &str = "fast_search";

/// Per-user fast-search quota. Consumption and credit are single conditional
/// UPDATEs in the store, so the ledger never overshoots its limit and never
/// goes negative, even under concurrent requests.
#[derive(Clone, Debug)]
pub struct QuotaLedger {
    store: SqliteStore,
    default_limit: i64,
}

impl QuotaLedger {
    pub fn new(store: SqliteStore, default_limit: i64) -> Self {
        Self {
            store,
            default_limit,
        }
    }

    pub async fn snapshot(&self, user_id: &str) -> Result<QuotaSnapshot> {
        let snapshot = self
            .store
            .quota_snapshot(user_id, FAST_SEARCH_ACTION, self.default_limit)
            .await?;
        Ok(snapshot)
    }

    pub async fn consume(&self, user_id: &str) -> Result<QuotaSnapshot> {
        let (consumed, snapshot) = self
            .store
            .try_consume_quota(user_id, FAST_SEARCH_ACTION, self.default_limit)
            .await?;
        if !consumed {
            return Err(ServiceError::QuotaExceeded {
                used: snapshot.used,
                limit: snapshot.limit,
            });
        }
        Ok(snapshot)
    }

    pub async fn credit(&self, user_id: &str, reason: &str) -> Result<QuotaSnapshot> {
        let snapshot = self
            .store
            .credit_quota(user_id, FAST_SEARCH_ACTION, self.default_limit)
            .await?;
        info!(user_id, reason, used = snapshot.used, "fast search quota credited");
        Ok(snapshot)
    }
}
