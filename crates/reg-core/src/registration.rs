//! # Registrations
//!
//! One participant enrolled in one event, with the price snapshotted from the
//! batch that was active at admission.

use crate::error::ValidationErrors;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Minimum participant name length (characters)
pub const MIN_NAME_LEN: usize = 3;

/// Minimum participant phone length (characters)
pub const MIN_PHONE_LEN: usize = 10;

/// Free-form participant attributes, stored as-is
pub type ParticipantAttributes = BTreeMap<String, Option<String>>;

/// Participant data submitted for admission
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantPayload {
    #[serde(default)]
    pub participant_name: String,

    #[serde(default)]
    pub participant_email: String,

    #[serde(default)]
    pub participant_phone: String,

    /// Opaque extra fields (shirt size, church, etc.)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub participant_data: ParticipantAttributes,
}

impl ParticipantPayload {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        phone: impl Into<String>,
    ) -> Self {
        Self {
            participant_name: name.into(),
            participant_email: email.into(),
            participant_phone: phone.into(),
            participant_data: BTreeMap::new(),
        }
    }

    /// Builder: add an attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        self.participant_data.insert(key.into(), value);
        self
    }

    /// Check every field and report all failures together
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        if self.participant_name.trim().chars().count() < MIN_NAME_LEN {
            errors.push(
                "participant_name",
                format!("participant name must have at least {MIN_NAME_LEN} characters"),
            );
        }

        if !is_valid_email(self.participant_email.trim()) {
            errors.push("participant_email", "participant email is invalid");
        }

        if self.participant_phone.trim().chars().count() < MIN_PHONE_LEN {
            errors.push("participant_phone", "participant phone is invalid");
        }

        errors
    }
}

/// Syntactic email check: `local@domain.tld`, no whitespace
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };

    if local.is_empty() || domain.contains('@') || email.chars().any(char::is_whitespace) {
        return false;
    }
    if local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return false;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    labels.iter().all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_alphanumeric() || c == '-')
    })
}

/// A participant's enrollment in an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub id: Uuid,
    pub package_id: Uuid,
    pub event_id: Uuid,
    pub participant_name: String,
    pub participant_email: String,
    pub participant_phone: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub participant_data: ParticipantAttributes,

    /// Batch price at admission, never recomputed
    pub price_paid: Decimal,

    pub created_at: DateTime<Utc>,
}

impl Registration {
    pub(crate) fn admit(
        package_id: Uuid,
        event_id: Uuid,
        payload: ParticipantPayload,
        price_paid: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            package_id,
            event_id,
            participant_name: payload.participant_name.trim().to_string(),
            participant_email: payload.participant_email.trim().to_string(),
            participant_phone: payload.participant_phone.trim().to_string(),
            participant_data: payload.participant_data,
            price_paid: price_paid.round_dp(2),
            created_at: now,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_test(package_id: Uuid, event_id: Uuid, price_paid: Decimal) -> Self {
        Self::admit(
            package_id,
            event_id,
            ParticipantPayload::new("Test Participant", "p@example.com", "11999990000"),
            price_paid,
            Utc::now(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_payload() {
        let payload = ParticipantPayload::new("Ana Souza", "ana@example.com.br", "11987654321");
        assert!(payload.validate().is_empty());
    }

    #[test]
    fn test_validation_collects_every_field() {
        let payload = ParticipantPayload::new("Al", "not-an-email", "12345");
        let errors = payload.validate();

        assert_eq!(errors.len(), 3);
        assert!(errors.has_field("participant_name"));
        assert!(errors.has_field("participant_email"));
        assert!(errors.has_field("participant_phone"));
    }

    #[test]
    fn test_validation_reports_only_offending_fields() {
        let payload = ParticipantPayload::new("Ana Souza", "ana@", "11987654321");
        let errors = payload.validate();

        assert_eq!(errors.len(), 1);
        assert!(errors.has_field("participant_email"));
    }

    #[test]
    fn test_email_syntax() {
        assert!(is_valid_email("a@b.co"));
        assert!(is_valid_email("first.last+tag@sub.example.org"));

        assert!(!is_valid_email(""));
        assert!(!is_valid_email("plain"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("a@example"));
        assert!(!is_valid_email("a@@example.com"));
        assert!(!is_valid_email("a b@example.com"));
        assert!(!is_valid_email("a@-example.com"));
        assert!(!is_valid_email("a..b@example.com"));
        assert!(!is_valid_email("a@example..com"));
    }

    #[test]
    fn test_attributes_pass_through() {
        let payload = ParticipantPayload::new("Ana Souza", "ana@example.com", "11987654321")
            .with_attribute("shirt_size", Some("M".into()))
            .with_attribute("church", None);

        let registration = Registration::admit(
            Uuid::new_v4(),
            Uuid::new_v4(),
            payload,
            Decimal::new(10000, 2),
            Utc::now(),
        );

        assert_eq!(
            registration.participant_data.get("shirt_size"),
            Some(&Some("M".to_string()))
        );
        assert_eq!(registration.participant_data.get("church"), Some(&None));
    }
}
