//! Phone mapping and quarantine state, and beta-group membership.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Status of a phone-number-to-CPF mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhoneMappingStatus {
    /// The phone is actively mapped to a CPF.
    Active,
    /// The phone is quarantined and cannot be mapped to a new CPF.
    Quarantined,
    /// The phone's quarantine has elapsed and it has been released.
    Released,
}

/// A phone-number-to-CPF(s) mapping entity, keyed by phone number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneMapping {
    /// The phone number this mapping describes.
    pub phone: String,
    /// CPFs currently associated with this phone (zero or more).
    pub cpfs: Vec<String>,
    /// Current status.
    pub status: PhoneMappingStatus,
    /// When quarantine ends, if currently quarantined.
    pub quarantine_until: Option<DateTime<Utc>>,
    /// Beta group this phone belongs to, if any.
    pub beta_group: Option<String>,
}

impl PhoneMapping {
    /// Create a fresh active mapping for a phone with no CPFs yet.
    pub fn new(phone: String) -> Self {
        Self {
            phone,
            cpfs: Vec::new(),
            status: PhoneMappingStatus::Active,
            quarantine_until: None,
            beta_group: None,
        }
    }

    /// Put this phone into quarantine for `duration`, starting from `now`.
    pub fn quarantine(&mut self, now: DateTime<Utc>, duration: chrono::Duration) {
        self.status = PhoneMappingStatus::Quarantined;
        self.quarantine_until = Some(now + duration);
    }

    /// The status a reader should observe right now: quarantine whose
    /// `quarantine_until` has passed reads as released, never quarantined.
    pub fn effective_status(&self, now: DateTime<Utc>) -> PhoneMappingStatus {
        match self.status {
            PhoneMappingStatus::Quarantined => match self.quarantine_until {
                Some(until) if until <= now => PhoneMappingStatus::Released,
                _ => PhoneMappingStatus::Quarantined,
            },
            other => other,
        }
    }
}

/// A named beta group and its membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetaGroup {
    /// Unique group name.
    pub name: String,
    /// CPFs of current members.
    pub members: HashSet<String>,
}

impl BetaGroup {
    /// An empty beta group with the given name.
    pub fn new(name: String) -> Self {
        Self {
            name,
            members: HashSet::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarantine_auto_releases_once_the_window_passes() {
        let mut mapping = PhoneMapping::new("+5521900000000".to_string());
        let now = Utc::now();
        mapping.quarantine(now, chrono::Duration::seconds(1));

        assert_eq!(mapping.effective_status(now), PhoneMappingStatus::Quarantined);
        assert_eq!(
            mapping.effective_status(now + chrono::Duration::seconds(2)),
            PhoneMappingStatus::Released
        );
    }
}
