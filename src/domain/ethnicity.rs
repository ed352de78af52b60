//! Self-declared ethnicity, a closed enumeration.
//!
//! Representing this as a Rust enum (rather than a free-form string) is
//! what makes "ethnicity not in the enumerated set" a
//! construct that the type system enforces rather than a runtime lookup
//! table an external validator owns.

use serde::{Deserialize, Serialize};

/// The closed set of self-declared ethnicities accepted by the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ethnicity {
    /// Branca
    Branca,
    /// Preta
    Preta,
    /// Parda
    Parda,
    /// Amarela
    Amarela,
    /// Indigena
    Indigena,
    /// Declined to answer
    NaoDeclarado,
}

impl Ethnicity {
    /// Parse the wire representation, returning `None` for anything outside
    /// the enumerated set (callers turn this into `CoreError::Validation`).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "branca" => Some(Ethnicity::Branca),
            "preta" => Some(Ethnicity::Preta),
            "parda" => Some(Ethnicity::Parda),
            "amarela" => Some(Ethnicity::Amarela),
            "indigena" => Some(Ethnicity::Indigena),
            "nao_declarado" => Some(Ethnicity::NaoDeclarado),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_values_outside_the_enumerated_set() {
        assert!(Ethnicity::parse("martian").is_none());
        assert!(Ethnicity::parse("").is_none());
    }

    #[test]
    fn accepts_every_enumerated_value() {
        for raw in ["branca", "preta", "parda", "amarela", "indigena", "nao_declarado"] {
            assert!(Ethnicity::parse(raw).is_some());
        }
    }
}
