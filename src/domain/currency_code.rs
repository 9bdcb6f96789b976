/// Three-letter ISO 4217 currency code, normalised to upper case. No
/// allowlist: the downstream service owns the catalogue of currencies it
/// accepts, we only enforce the shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn parse(code: String) -> Result<Self, String> {
        let code = code.trim();
        let three_letters = code.chars().count() == 3 && code.chars().all(|c| c.is_ascii_alphabetic());
        match three_letters {
            true => Ok(Self(code.to_ascii_uppercase())),
            false => Err(format!("Invalid currency code: {code:?}")),
        }
    }
}

impl AsRef<str> for CurrencyCode {
    fn as_ref(&self) -> &str { &self.0 }
}
