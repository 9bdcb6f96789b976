use chrono::DateTime;
use chrono::Utc;

use super::CurrencyCode;
use super::TransactionAmount;
use super::TransactionDescription;
use super::TransactionId;

/// A fully validated submission. Construction goes through the `parse`
/// functions of each field type, so an instance existing means the input was
/// acceptable.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub id: TransactionId,
    pub amount: TransactionAmount,
    pub currency: CurrencyCode,
    pub description: TransactionDescription,
    /// Defaults to the submission instant when the client omits it.
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}
