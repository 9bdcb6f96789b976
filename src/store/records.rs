use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::domain::NewTransaction;

/// Delivery lifecycle of one transaction. Transitions are monotonic:
/// pending -> processing -> (completed | failed); a terminal state is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(thiserror::Error, Debug)]
#[error("unknown transaction state: {0}")]
pub struct UnknownState(String);

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownState> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownState(other.to_string())),
        }
    }

    pub fn is_terminal(&self) -> bool { matches!(self, Self::Completed | Self::Failed) }
}

/// The validated transaction as stored alongside its status record, so a
/// worker can rebuild the downstream request without a second lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionPayload {
    pub id: String,
    pub amount: f64,
    pub currency: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl From<NewTransaction> for TransactionPayload {
    fn from(t: NewTransaction) -> Self {
        Self {
            id: t.id.into(),
            amount: t.amount.get(),
            currency: t.currency.as_ref().to_string(),
            description: t.description.as_ref().to_string(),
            timestamp: t.timestamp,
            metadata: t.metadata,
        }
    }
}

/// One row of `status_records`; the single source of truth for a
/// transaction's fate.
#[derive(Debug, Clone)]
pub struct StatusRecord {
    pub transaction_id: String,
    pub state: TransactionState,
    pub submitted_at: DateTime<Utc>,
    /// Set exactly when the state is terminal.
    pub completed_at: Option<DateTime<Utc>>,
    /// Populated only on failure.
    pub error: Option<String>,
    /// Delivery attempts that ended in a confirmed pre-write failure.
    pub retry_count: i32,
    pub payload: TransactionPayload,
}

impl StatusRecord {
    /// Fresh record for a just-accepted submission.
    pub fn pending(
        payload: TransactionPayload,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            transaction_id: payload.id.clone(),
            state: TransactionState::Pending,
            submitted_at,
            completed_at: None,
            error: None,
            retry_count: 0,
            payload,
        }
    }
}

/// Pointer onto `work_queue`; the payload stays in the status record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueueEntry {
    pub transaction_id: String,
    pub queued_at: DateTime<Utc>,
}
