//! Phone-number fingerprint.
//!
//! Deep phone-number format validation belongs to an external collaborator;
//! the core only rejects the one case that would break the key
//! grammar outright — an empty fingerprint segment.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A non-empty phone-number fingerprint, used as the `F` segment of
/// `<T>:write:<F>` keys and as half of the (CPF, phone) composite key for
/// verification records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Parse a phone number, rejecting only the empty string.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        if raw.trim().is_empty() {
            return Err(CoreError::Validation("phone number must not be empty".to_string()));
        }
        Ok(PhoneNumber(raw.to_string()))
    }

    /// The fingerprint string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PhoneNumber {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        PhoneNumber::parse(&value)
    }
}

impl From<PhoneNumber> for String {
    fn from(value: PhoneNumber) -> Self {
        value.0
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty() {
        assert!(PhoneNumber::parse("").is_err());
        assert!(PhoneNumber::parse("   ").is_err());
    }

    #[test]
    fn accepts_anything_nonempty() {
        assert!(PhoneNumber::parse("+5521987654321").is_ok());
    }
}
