use crate::error::{Result, ServiceError};
use crate::sqlite_store::SqliteStore;

/// Launch-request deduplication keyed by the client-supplied request id.
/// Keys live in the store with an expiry column rather than an in-process
/// map, so horizontally scaled instances share the window.
#[derive(Clone, Debug)]
pub struct RequestDedup {
    store: SqliteStore,
    ttl_ms: i64,
}

impl RequestDedup {
    pub fn new(store: SqliteStore, ttl_seconds: u64) -> Self {
        Self {
            store,
            ttl_ms: (ttl_seconds as i64).saturating_mul(1_000),
        }
    }

    /// Errors with `DuplicateRequest` when the same key was claimed within
    /// the TTL window.
    pub async fn claim(&self, user_id: &str, request_id: &str, now_ms: i64) -> Result<()> {
        let key = format!("{user_id}:{request_id}");
        let claimed = self.store.claim_dedup_key(&key, now_ms, self.ttl_ms).await?;
        if !claimed {
            return Err(ServiceError::DuplicateRequest {
                request_id: request_id.to_string(),
            });
        }
        Ok(())
    }
}
