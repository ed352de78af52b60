//! Domain types: the citizen record/overlay/view, fingerprint newtypes, and
//! supporting entities (phone mapping, beta group).

pub mod citizen;
pub mod cpf;
pub mod ethnicity;
pub mod phone_mapping;
pub mod phone_number;

pub use citizen::{CitizenOverlay, CitizenRecord, CitizenView, FieldValue, OverlayField};
pub use cpf::Cpf;
pub use ethnicity::Ethnicity;
pub use phone_mapping::{BetaGroup, PhoneMapping, PhoneMappingStatus};
pub use phone_number::PhoneNumber;
