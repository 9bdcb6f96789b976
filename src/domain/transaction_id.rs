use uuid::Uuid;

/// Client-supplied (or server-generated) opaque token identifying one
/// transaction. The field is private; instantiate via `parse` or `generate`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn parse(id: String) -> Result<Self, String> {
        let empty = id.trim().is_empty();
        let too_long = id.chars().count() > 64;
        let control = id.chars().any(char::is_control);
        match !empty && !too_long && !control {
            true => Ok(Self(id)),
            false => Err(format!("Invalid transaction id: {id:?}")),
        }
    }

    /// Fresh opaque token for submissions that carry no id.
    pub fn generate() -> Self { Self(Uuid::new_v4().to_string()) }
}

impl AsRef<str> for TransactionId {
    fn as_ref(&self) -> &str { &self.0 }
}

impl From<TransactionId> for String {
    fn from(value: TransactionId) -> Self { value.0 }
}
