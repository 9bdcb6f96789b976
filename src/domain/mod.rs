mod currency_code;
mod new_transaction;
mod transaction_amount;
mod transaction_description;
mod transaction_id;

pub use currency_code::CurrencyCode;
pub use new_transaction::NewTransaction;
pub use transaction_amount::TransactionAmount;
pub use transaction_description::TransactionDescription;
pub use transaction_id::TransactionId;
