use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::OptionalExtension;
use thiserror::Error;

use crate::store::{
    CheckType, MonitoringLogEntry, MonitoringLogRecord, QuotaSnapshot, SearchRecord, SearchStatus,
};

/// SQLite-backed store. Connections are opened per call on a blocking thread;
/// WAL mode keeps the webhook and sweep paths from blocking each other.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    path: PathBuf,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid status value: {value}")]
    InvalidStatus { value: String },
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            Ok(())
        })
        .await?
    }

    /// Current `(used, limit)` for a user's ledger, seeding a fresh row from
    /// `default_limit` when the user has never consumed the action.
    pub async fn quota_snapshot(
        &self,
        user_id: &str,
        action_kind: &str,
        default_limit: i64,
    ) -> Result<QuotaSnapshot, StoreError> {
        let path = self.path.clone();
        let user_id = user_id.to_string();
        let action_kind = action_kind.to_string();
        let ts_ms = now_millis();

        tokio::task::spawn_blocking(move || -> Result<QuotaSnapshot, StoreError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            seed_quota_row(&conn, &user_id, &action_kind, default_limit, ts_ms)?;
            read_quota_row(&conn, &user_id, &action_kind)
        })
        .await?
    }

    /// Atomic quota consumption: one conditional UPDATE, so two concurrent
    /// consumers can never push `quota_used` past `quota_limit`. Returns
    /// `(consumed, snapshot)`; `consumed == false` means the ledger was
    /// already exhausted and nothing changed.
    pub async fn try_consume_quota(
        &self,
        user_id: &str,
        action_kind: &str,
        default_limit: i64,
    ) -> Result<(bool, QuotaSnapshot), StoreError> {
        let path = self.path.clone();
        let user_id = user_id.to_string();
        let action_kind = action_kind.to_string();
        let ts_ms = now_millis();

        tokio::task::spawn_blocking(move || -> Result<(bool, QuotaSnapshot), StoreError> {
            let mut conn = open_connection(path)?;
            init_schema(&conn)?;
            let tx = conn.transaction()?;

            seed_quota_row(&tx, &user_id, &action_kind, default_limit, ts_ms)?;
            let changed = tx.execute(
                "UPDATE quota_ledger
                 SET quota_used = quota_used + 1, updated_at_ms = ?3
                 WHERE user_id = ?1 AND action_kind = ?2 AND quota_used < quota_limit",
                rusqlite::params![user_id, action_kind, ts_ms],
            )?;
            let snapshot = read_quota_row(&tx, &user_id, &action_kind)?;

            tx.commit()?;
            Ok((changed > 0, snapshot))
        })
        .await?
    }

    /// Atomic refund: decrement floored at zero. Crediting an already-zero
    /// ledger is a no-op, never an error.
    pub async fn credit_quota(
        &self,
        user_id: &str,
        action_kind: &str,
        default_limit: i64,
    ) -> Result<QuotaSnapshot, StoreError> {
        let path = self.path.clone();
        let user_id = user_id.to_string();
        let action_kind = action_kind.to_string();
        let ts_ms = now_millis();

        tokio::task::spawn_blocking(move || -> Result<QuotaSnapshot, StoreError> {
            let mut conn = open_connection(path)?;
            init_schema(&conn)?;
            let tx = conn.transaction()?;

            seed_quota_row(&tx, &user_id, &action_kind, default_limit, ts_ms)?;
            tx.execute(
                "UPDATE quota_ledger
                 SET quota_used = CASE WHEN quota_used > 0 THEN quota_used - 1 ELSE 0 END,
                     updated_at_ms = ?3
                 WHERE user_id = ?1 AND action_kind = ?2",
                rusqlite::params![user_id, action_kind, ts_ms],
            )?;
            let snapshot = read_quota_row(&tx, &user_id, &action_kind)?;

            tx.commit()?;
            Ok(snapshot)
        })
        .await?
    }

    pub async fn insert_search(&self, record: &SearchRecord) -> Result<(), StoreError> {
        let path = self.path.clone();
        let record = record.clone();

        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            conn.execute(
                "INSERT INTO searches
                     (solution_id, brief_id, user_id, launched_at_ms,
                      fast_search_status, fast_search_checked_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    record.solution_id,
                    record.brief_id,
                    record.user_id,
                    record.launched_at_ms,
                    record.fast_search_status.as_str(),
                    record.fast_search_checked_at_ms,
                ],
            )?;
            Ok(())
        })
        .await?
    }

    pub async fn search(&self, solution_id: &str) -> Result<Option<SearchRecord>, StoreError> {
        let path = self.path.clone();
        let solution_id = solution_id.to_string();

        tokio::task::spawn_blocking(move || -> Result<Option<SearchRecord>, StoreError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            let row = conn
                .query_row(
                    "SELECT solution_id, brief_id, user_id, launched_at_ms,
                            fast_search_status, fast_search_checked_at_ms
                     FROM searches WHERE solution_id = ?1",
                    rusqlite::params![solution_id],
                    search_row_tuple,
                )
                .optional()?;
            row.map(search_record_from_tuple).transpose()
        })
        .await?
    }

    /// All `pending` searches launched at or before `cutoff_ms`, oldest
    /// first. Terminal records are never selected, whatever their age.
    pub async fn stale_pending_searches(
        &self,
        cutoff_ms: i64,
    ) -> Result<Vec<SearchRecord>, StoreError> {
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<SearchRecord>, StoreError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT solution_id, brief_id, user_id, launched_at_ms,
                        fast_search_status, fast_search_checked_at_ms
                 FROM searches
                 WHERE fast_search_status = 'pending' AND launched_at_ms <= ?1
                 ORDER BY launched_at_ms",
            )?;
            let rows = stmt.query_map(rusqlite::params![cutoff_ms], search_row_tuple)?;

            let mut out = Vec::new();
            for row in rows {
                out.push(search_record_from_tuple(row?)?);
            }
            Ok(out)
        })
        .await?
    }

    /// The single pending-to-terminal transition, guarded on the current
    /// status. Returns false when the record was already terminal, which is
    /// the signal that a concurrent trigger won and no refund is owed here.
    pub async fn finish_search(
        &self,
        solution_id: &str,
        status: SearchStatus,
        checked_at_ms: i64,
    ) -> Result<bool, StoreError> {
        let path = self.path.clone();
        let solution_id = solution_id.to_string();

        tokio::task::spawn_blocking(move || -> Result<bool, StoreError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            let changed = conn.execute(
                "UPDATE searches
                 SET fast_search_status = ?2, fast_search_checked_at_ms = ?3
                 WHERE solution_id = ?1 AND fast_search_status = 'pending'",
                rusqlite::params![solution_id, status.as_str(), checked_at_ms],
            )?;
            Ok(changed > 0)
        })
        .await?
    }

    pub async fn supplier_match_count(&self, solution_id: &str) -> Result<i64, StoreError> {
        let path = self.path.clone();
        let solution_id = solution_id.to_string();

        tokio::task::spawn_blocking(move || -> Result<i64, StoreError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            let count = conn.query_row(
                "SELECT COUNT(*) FROM supplier_matches WHERE solution_id = ?1",
                rusqlite::params![solution_id],
                |row| row.get::<_, i64>(0),
            )?;
            Ok(count)
        })
        .await?
    }

    pub async fn insert_supplier_matches(
        &self,
        solution_id: &str,
        supplier_names: &[String],
    ) -> Result<usize, StoreError> {
        let path = self.path.clone();
        let solution_id = solution_id.to_string();
        let supplier_names = supplier_names.to_vec();
        let ts_ms = now_millis();

        tokio::task::spawn_blocking(move || -> Result<usize, StoreError> {
            let mut conn = open_connection(path)?;
            init_schema(&conn)?;
            let tx = conn.transaction()?;
            for name in &supplier_names {
                tx.execute(
                    "INSERT INTO supplier_matches (solution_id, supplier_name, created_at_ms)
                     VALUES (?1, ?2, ?3)",
                    rusqlite::params![solution_id, name, ts_ms],
                )?;
            }
            tx.commit()?;
            Ok(supplier_names.len())
        })
        .await?
    }

    pub async fn append_monitoring_log(
        &self,
        entry: &MonitoringLogEntry,
    ) -> Result<(), StoreError> {
        let path = self.path.clone();
        let entry = entry.clone();
        let details_json = serde_json::to_string(&entry.details)?;
        let ts_ms = now_millis();

        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            conn.execute(
                "INSERT INTO monitoring_log
                     (solution_id, brief_id, user_id, check_type, status,
                      suppliers_found, refunded, details_json, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    entry.solution_id,
                    entry.brief_id,
                    entry.user_id,
                    entry.check_type.as_str(),
                    entry.status.as_str(),
                    entry.suppliers_found,
                    entry.refunded as i64,
                    details_json,
                    ts_ms,
                ],
            )?;
            Ok(())
        })
        .await?
    }

    pub async fn monitoring_logs(
        &self,
        solution_id: &str,
    ) -> Result<Vec<MonitoringLogRecord>, StoreError> {
        let path = self.path.clone();
        let solution_id = solution_id.to_string();

        tokio::task::spawn_blocking(move || -> Result<Vec<MonitoringLogRecord>, StoreError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT id, solution_id, brief_id, user_id, check_type, status,
                        suppliers_found, refunded, details_json, created_at_ms
                 FROM monitoring_log
                 WHERE solution_id = ?1
                 ORDER BY id",
            )?;
            let rows = stmt.query_map(rusqlite::params![solution_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, i64>(9)?,
                ))
            })?;

            let mut out = Vec::new();
            for row in rows {
                let (
                    id,
                    solution_id,
                    brief_id,
                    user_id,
                    check_type,
                    status,
                    suppliers_found,
                    refunded,
                    details_json,
                    created_at_ms,
                ) = row?;
                out.push(MonitoringLogRecord {
                    id,
                    solution_id,
                    brief_id,
                    user_id,
                    check_type: parse_check_type(&check_type)?,
                    status: parse_status(&status)?,
                    suppliers_found,
                    refunded: refunded != 0,
                    details: serde_json::from_str(&details_json)?,
                    created_at_ms,
                });
            }
            Ok(out)
        })
        .await?
    }

    /// Claim a deduplication key. Returns false when the key was claimed
    /// within the TTL window; expired keys are evicted on the way in, so the
    /// table stays bounded by the launch rate times the TTL.
    pub async fn claim_dedup_key(
        &self,
        key: &str,
        now_ms: i64,
        ttl_ms: i64,
    ) -> Result<bool, StoreError> {
        let path = self.path.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || -> Result<bool, StoreError> {
            let mut conn = open_connection(path)?;
            init_schema(&conn)?;
            let tx = conn.transaction()?;

            tx.execute(
                "DELETE FROM request_dedup WHERE expires_at_ms <= ?1",
                rusqlite::params![now_ms],
            )?;
            let claimed = tx.execute(
                "INSERT OR IGNORE INTO request_dedup (dedup_key, expires_at_ms)
                 VALUES (?1, ?2)",
                rusqlite::params![key, now_ms.saturating_add(ttl_ms)],
            )?;

            tx.commit()?;
            Ok(claimed > 0)
        })
        .await?
    }
}

type SearchRowTuple = (String, String, String, i64, String, Option<i64>);

fn search_row_tuple(row: &rusqlite::Row<'_>) -> rusqlite::Result<SearchRowTuple> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn search_record_from_tuple(tuple: SearchRowTuple) -> Result<SearchRecord, StoreError> {
    let (solution_id, brief_id, user_id, launched_at_ms, status, checked_at_ms) = tuple;
    Ok(SearchRecord {
        solution_id,
        brief_id,
        user_id,
        launched_at_ms,
        fast_search_status: parse_status(&status)?,
        fast_search_checked_at_ms: checked_at_ms,
    })
}

fn parse_status(raw: &str) -> Result<SearchStatus, StoreError> {
    SearchStatus::parse(raw).ok_or_else(|| StoreError::InvalidStatus {
        value: raw.to_string(),
    })
}

fn parse_check_type(raw: &str) -> Result<CheckType, StoreError> {
    match raw {
        "n8n_callback" => Ok(CheckType::Callback),
        "auto_check" => Ok(CheckType::AutoCheck),
        other => Err(StoreError::InvalidStatus {
            value: other.to_string(),
        }),
    }
}

fn seed_quota_row(
    conn: &rusqlite::Connection,
    user_id: &str,
    action_kind: &str,
    default_limit: i64,
    ts_ms: i64,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR IGNORE INTO quota_ledger
             (user_id, action_kind, quota_limit, quota_used, updated_at_ms)
         VALUES (?1, ?2, ?3, 0, ?4)",
        rusqlite::params![user_id, action_kind, default_limit, ts_ms],
    )?;
    Ok(())
}

fn read_quota_row(
    conn: &rusqlite::Connection,
    user_id: &str,
    action_kind: &str,
) -> Result<QuotaSnapshot, StoreError> {
    let (used, limit) = conn.query_row(
        "SELECT quota_used, quota_limit FROM quota_ledger
         WHERE user_id = ?1 AND action_kind = ?2",
        rusqlite::params![user_id, action_kind],
        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
    )?;
    Ok(QuotaSnapshot { used, limit })
}

fn init_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS quota_ledger (
            user_id TEXT NOT NULL,
            action_kind TEXT NOT NULL,
            quota_limit INTEGER NOT NULL,
            quota_used INTEGER NOT NULL DEFAULT 0,
            updated_at_ms INTEGER NOT NULL,
            PRIMARY KEY (user_id, action_kind)
        );

        CREATE TABLE IF NOT EXISTS searches (
            solution_id TEXT PRIMARY KEY NOT NULL,
            brief_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            launched_at_ms INTEGER NOT NULL,
            fast_search_status TEXT NOT NULL,
            fast_search_checked_at_ms INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_searches_status_launched
            ON searches(fast_search_status, launched_at_ms);

        CREATE TABLE IF NOT EXISTS supplier_matches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            solution_id TEXT NOT NULL,
            supplier_name TEXT NOT NULL,
            created_at_ms INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_supplier_matches_solution_id
            ON supplier_matches(solution_id);

        CREATE TABLE IF NOT EXISTS monitoring_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            solution_id TEXT NOT NULL,
            brief_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            check_type TEXT NOT NULL,
            status TEXT NOT NULL,
            suppliers_found INTEGER NOT NULL,
            refunded INTEGER NOT NULL,
            details_json TEXT NOT NULL,
            created_at_ms INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_monitoring_log_solution_id
            ON monitoring_log(solution_id);

        CREATE TABLE IF NOT EXISTS request_dedup (
            dedup_key TEXT PRIMARY KEY NOT NULL,
            expires_at_ms INTEGER NOT NULL
        );",
    )?;
    Ok(())
}

fn open_connection(path: PathBuf) -> Result<rusqlite::Connection, rusqlite::Error> {
    let conn = rusqlite::Connection::open(path)?;
    let _ = conn.busy_timeout(Duration::from_secs(5));
    let _ = conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;");
    Ok(conn)
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}
