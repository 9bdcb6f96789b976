mod health_check;
mod transactions;

pub use health_check::*;
pub use transactions::*;
