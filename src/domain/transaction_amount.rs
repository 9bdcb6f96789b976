/// Positive, finite transaction amount. Zero, negatives, NaN and infinities
/// are rejected at intake, before any store mutation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransactionAmount(f64);

impl TransactionAmount {
    pub fn parse(amount: f64) -> Result<Self, String> {
        match amount.is_finite() && amount > 0.0 {
            true => Ok(Self(amount)),
            false => Err(format!("Invalid amount: {amount} (must be positive)")),
        }
    }

    pub fn get(&self) -> f64 { self.0 }
}
