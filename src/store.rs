use serde::{Deserialize, Serialize};

/// Lifecycle of a launched fast search. A record moves from `Pending` to
/// exactly one terminal state, exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Pending,
    Success,
    NoResults,
    Failed,
}

impl SearchStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::NoResults => "no_results",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "success" => Some(Self::Success),
            "no_results" => Some(Self::NoResults),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Which trigger performed a reconciliation attempt. The wire values match
/// the monitoring dashboard's historical naming.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckType {
    #[serde(rename = "n8n_callback")]
    Callback,
    #[serde(rename = "auto_check")]
    AutoCheck,
}

impl CheckType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Callback => "n8n_callback",
            Self::AutoCheck => "auto_check",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchRecord {
    pub solution_id: String,
    pub brief_id: String,
    pub user_id: String,
    pub launched_at_ms: i64,
    pub fast_search_status: SearchStatus,
    pub fast_search_checked_at_ms: Option<i64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub used: i64,
    pub limit: i64,
}

/// One row of the append-only reconciliation audit trail.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitoringLogRecord {
    pub id: i64,
    pub solution_id: String,
    pub brief_id: String,
    pub user_id: String,
    pub check_type: CheckType,
    pub status: SearchStatus,
    pub suppliers_found: i64,
    pub refunded: bool,
    pub details: serde_json::Value,
    pub created_at_ms: i64,
}

/// Fields of a monitoring-log row as written by the reconciler; the store
/// assigns `id` and `created_at_ms`.
#[derive(Clone, Debug)]
pub struct MonitoringLogEntry {
    pub solution_id: String,
    pub brief_id: String,
    pub user_id: String,
    pub check_type: CheckType,
    pub status: SearchStatus,
    pub suppliers_found: i64,
    pub refunded: bool,
    pub details: serde_json::Value,
}
