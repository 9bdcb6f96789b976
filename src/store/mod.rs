mod expiry;
mod persistence;
mod records;

pub use expiry::run_sweeper_until_stopped;
pub use persistence::TransactionStore;
pub use records::QueueEntry;
pub use records::StatusRecord;
pub use records::TransactionPayload;
pub use records::TransactionState;
