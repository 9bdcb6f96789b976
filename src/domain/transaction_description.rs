use unicode_segmentation::UnicodeSegmentation;

/// Free-form description, 1-255 graphemes after trimming surrounding
/// whitespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDescription(String);

impl TransactionDescription {
    pub fn parse(description: String) -> Result<Self, String> {
        let trimmed = description.trim();
        let length = trimmed.graphemes(true).count();
        match (1..=255).contains(&length) {
            true => Ok(Self(trimmed.to_string())),
            false => Err(format!(
                "Invalid description: {length} graphemes (must be 1-255)"
            )),
        }
    }
}

impl AsRef<str> for TransactionDescription {
    fn as_ref(&self) -> &str { &self.0 }
}
