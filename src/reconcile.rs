//! The decision rule shared by the completion webhook and the staleness
//! sweep. Pure: callers fetch the live supplier-match count and apply the
//! side effects.

use serde::{Deserialize, Serialize};

use crate::store::{CheckType, SearchStatus};

pub const DEFAULT_FAILURE_REASON: &str = "fast search failed";
pub const NO_SUPPLIERS_REASON: &str = "no suppliers found";
pub const TIMEOUT_REASON: &str = "timed out with no suppliers";

/// Outcome reported by the external workflow engine on the push path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportedStatus {
    Finished,
    Error,
}

#[derive(Clone, Debug)]
pub struct CompletionReport {
    pub status: ReportedStatus,
    pub error_message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    pub status: SearchStatus,
    pub refund: bool,
    pub reason: Option<String>,
}

/// Terminal status and refund decision for one search.
///
/// An explicit `error` report always fails the search and refunds. With no
/// error report, the supplier-match count decides: zero matches refunds
/// (recorded as `failed` when the engine said it finished, `no_results` when
/// the sweep gave up waiting), any match is a success with no refund.
pub fn decide(
    report: Option<&CompletionReport>,
    suppliers_found: i64,
    check_type: CheckType,
) -> Decision {
    if let Some(report) = report {
        if report.status == ReportedStatus::Error {
            let reason = report
                .error_message
                .clone()
                .filter(|message| !message.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FAILURE_REASON.to_string());
            return Decision {
                status: SearchStatus::Failed,
                refund: true,
                reason: Some(reason),
            };
        }
    }

    if suppliers_found > 0 {
        return Decision {
            status: SearchStatus::Success,
            refund: false,
            reason: None,
        };
    }

    match check_type {
        CheckType::Callback => Decision {
            status: SearchStatus::Failed,
            refund: true,
            reason: Some(NO_SUPPLIERS_REASON.to_string()),
        },
        CheckType::AutoCheck => Decision {
            status: SearchStatus::NoResults,
            refund: true,
            reason: Some(TIMEOUT_REASON.to_string()),
        },
    }
}

/// Result of one reconciliation attempt, as returned to both triggers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub solution_id: String,
    pub status: SearchStatus,
    pub suppliers_found: i64,
    pub refunded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
