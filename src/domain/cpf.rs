//! CPF (Cadastro de Pessoas Físicas) identifier.
//!
//! Full-strength CPF/CNPJ formatting rules are an external collaborator's
//! concern; the core only needs enough of the check-digit algorithm to
//! satisfy the boundary behavior the optimistic-update protocol depends on
//! (the fingerprint must be a real, well-formed identifier, not an
//! accidental duplicate of all-equal digits).

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated 11-digit CPF with correct check digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cpf(String);

impl Cpf {
    /// Parse and validate a CPF string. Rejects anything that is not
    /// exactly 11 ASCII digits, all-equal-digit strings (e.g. "11111111111"),
    /// and strings whose check digits don't match.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let digits: Vec<u32> = raw.chars().map(|c| c.to_digit(10)).collect::<Option<_>>().ok_or_else(|| {
            CoreError::Validation(format!("cpf must be 11 decimal digits, got {raw:?}"))
        })?;

        if digits.len() != 11 {
            return Err(CoreError::Validation(format!(
                "cpf must be exactly 11 digits, got {}",
                digits.len()
            )));
        }

        if digits.iter().all(|&d| d == digits[0]) {
            return Err(CoreError::Validation(
                "cpf with all-equal digits is not valid".to_string(),
            ));
        }

        if check_digit(&digits[0..9], 10) != digits[9] || check_digit(&digits[0..10], 11) != digits[10] {
            return Err(CoreError::Validation(format!("cpf {raw} fails check digit validation")));
        }

        Ok(Cpf(raw.to_string()))
    }

    /// The fingerprint string used as the `F` segment of `<T>:write:<F>` /
    /// `<T>:cache:<F>` keys.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// CPF check-digit algorithm (modulo-11 weighted sum, the standard
/// `starting_weight` ranges from 10 down to 2 for the first digit, 11 down
/// to 2 for the second).
fn check_digit(digits: &[u32], mut starting_weight: u32) -> u32 {
    let sum: u32 = digits
        .iter()
        .map(|&d| {
            let weight = starting_weight;
            starting_weight -= 1;
            d * weight
        })
        .sum();
    let remainder = (sum * 10) % 11;
    if remainder == 10 {
        0
    } else {
        remainder
    }
}

impl TryFrom<String> for Cpf {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Cpf::parse(&value)
    }
}

impl From<Cpf> for String {
    fn from(value: Cpf) -> Self {
        value.0
    }
}

impl fmt::Display for Cpf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_cpf() {
        assert!(Cpf::parse("11144477735").is_ok());
        assert!(Cpf::parse("52998224725").is_ok());
    }

    #[test]
    fn rejects_all_equal_digits() {
        for d in 0..=9 {
            let raw = d.to_string().repeat(11);
            assert!(Cpf::parse(&raw).is_err(), "expected {raw} to be rejected");
        }
    }

    #[test]
    fn rejects_bad_check_digits() {
        assert!(Cpf::parse("11144477736").is_err());
        assert!(Cpf::parse("12345678901").is_err());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(Cpf::parse("123").is_err());
        assert!(Cpf::parse("111444777350").is_err());
    }

    proptest::proptest! {
        #[test]
        fn never_panics_on_arbitrary_input(s in "\\PC*") {
            let _ = Cpf::parse(&s);
        }
    }
}
