//! Citizen record, self-declared overlay, and the composed effective view.

use super::ethnicity::Ethnicity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The authoritative citizen record, produced externally and only ever read
/// by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitizenRecord {
    /// CPF, duplicated here (not just the key) so the record is
    /// self-describing once deserialized out of the document store.
    pub cpf: String,
    /// Full legal name.
    pub name: String,
    /// Date of birth.
    pub birth_date: DateTime<Utc>,
    /// Base address on file.
    pub address: Option<String>,
    /// Base phone on file.
    pub phone: Option<String>,
    /// Base email on file.
    pub email: Option<String>,
}

/// The self-declared overlay: user-edited fields plus optimistic-concurrency
/// bookkeeping. One overlay per CPF, created on first edit, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitizenOverlay {
    /// CPF this overlay belongs to.
    pub cpf: String,
    /// Self-declared address, overriding the base record when present.
    pub address: Option<String>,
    /// Self-declared active phone, overriding the base record when present.
    /// Only ever set by a successful phone-verification confirmation.
    pub phone: Option<String>,
    /// Self-declared email, overriding the base record when present.
    pub email: Option<String>,
    /// Self-declared ethnicity, overriding nothing in the base record (the
    /// base record has no ethnicity field) but still overlaid for display.
    pub ethnicity: Option<Ethnicity>,
    /// Self-declared exhibition (preferred display) name.
    pub exhibition_name: Option<String>,
    /// A phone number awaiting verification; not overlaid onto the
    /// effective view until `ConfirmVerification` succeeds.
    pub pending_phone: Option<String>,
    /// Monotonically increasing version. Every successful update increments
    /// this by exactly one.
    pub version: i64,
    /// Timestamp of the most recent successful update.
    pub updated_at: DateTime<Utc>,
}

impl CitizenOverlay {
    /// A fresh overlay for a CPF that has never been edited, version 0 so
    /// the first update's expected-version is 0.
    pub fn new(cpf: String) -> Self {
        Self {
            cpf,
            address: None,
            phone: None,
            email: None,
            ethnicity: None,
            exhibition_name: None,
            pending_phone: None,
            version: 0,
            updated_at: Utc::now(),
        }
    }
}

/// The single updatable field an optimistic-update call targets, matching
/// address, phone, email, ethnicity, exhibition name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayField {
    /// Self-declared address.
    Address,
    /// Self-declared phone (set directly only by the verification flow;
    /// direct updates still go through this path for symmetry in tests).
    Phone,
    /// Self-declared email.
    Email,
    /// Self-declared ethnicity.
    Ethnicity,
    /// Self-declared exhibition name.
    ExhibitionName,
}

/// The value carried by a single-field optimistic update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// A plain string value (address, phone, email, exhibition name).
    Text(String),
    /// An ethnicity value.
    Ethnicity(Ethnicity),
}

/// The effective citizen view returned to callers: base fields with overlay
/// fields overridden field-by-field wherever the overlay has a non-null
/// value, per "base ⊕ overlay (overlay wins field-by-field)".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitizenView {
    /// CPF.
    pub cpf: String,
    /// Full legal name (never overlaid — not an updatable field).
    pub name: String,
    /// Effective address: overlay if present, else base.
    pub address: Option<String>,
    /// Effective phone: overlay if present, else base. Note this is the
    /// *verified* overlay phone, never the pending one.
    pub phone: Option<String>,
    /// Effective email: overlay if present, else base.
    pub email: Option<String>,
    /// Self-declared ethnicity, if any (base record has none).
    pub ethnicity: Option<Ethnicity>,
    /// Self-declared exhibition name, if any.
    pub exhibition_name: Option<String>,
    /// A phone awaiting verification, surfaced so clients can show
    /// "pending" state without it affecting `phone`.
    pub pending_phone: Option<String>,
    /// Overlay version, surfaced so clients can submit optimistic updates.
    pub version: i64,
}

impl CitizenView {
    /// Compose base and overlay into the effective view.
    pub fn compose(base: &CitizenRecord, overlay: Option<&CitizenOverlay>) -> Self {
        Self {
            cpf: base.cpf.clone(),
            name: base.name.clone(),
            address: overlay
                .and_then(|o| o.address.clone())
                .or_else(|| base.address.clone()),
            phone: overlay
                .and_then(|o| o.phone.clone())
                .or_else(|| base.phone.clone()),
            email: overlay
                .and_then(|o| o.email.clone())
                .or_else(|| base.email.clone()),
            ethnicity: overlay.and_then(|o| o.ethnicity),
            exhibition_name: overlay.and_then(|o| o.exhibition_name.clone()),
            pending_phone: overlay.and_then(|o| o.pending_phone.clone()),
            version: overlay.map(|o| o.version).unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> CitizenRecord {
        CitizenRecord {
            cpf: "11144477735".to_string(),
            name: "Maria Silva".to_string(),
            birth_date: Utc::now(),
            address: Some("Base Address".to_string()),
            phone: Some("+5521900000000".to_string()),
            email: Some("base@example.com".to_string()),
        }
    }

    #[test]
    fn overlay_wins_field_by_field() {
        let base = base();
        let mut overlay = CitizenOverlay::new(base.cpf.clone());
        overlay.email = Some("overlay@example.com".to_string());

        let view = CitizenView::compose(&base, Some(&overlay));
        assert_eq!(view.email, Some("overlay@example.com".to_string()));
        assert_eq!(view.address, Some("Base Address".to_string()));
    }

    #[test]
    fn no_overlay_falls_back_to_base() {
        let base = base();
        let view = CitizenView::compose(&base, None);
        assert_eq!(view.address, base.address);
        assert_eq!(view.version, 0);
    }

    #[test]
    fn pending_phone_never_overrides_active_phone() {
        let base = base();
        let mut overlay = CitizenOverlay::new(base.cpf.clone());
        overlay.pending_phone = Some("+5521911111111".to_string());

        let view = CitizenView::compose(&base, Some(&overlay));
        assert_eq!(view.phone, base.phone);
        assert_eq!(view.pending_phone, Some("+5521911111111".to_string()));
    }
}
