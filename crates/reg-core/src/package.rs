//! # Package Aggregate
//!
//! A package bundles one or more event registrations bought together.
//! It carries the computed total and a status driven by the payment flow.
//!
//! ## Status machine
//!
//! ```text
//!            ┌──────────────── retry ────────────────┐
//!            ▼                                       │
//!   ┌──────────────┐  intent   ┌──────────────┐  approved  ┌──────────────┐
//!   │    draft     │──────────►│   pending    │───────────►│  confirmed   │
//!   └──────┬───────┘           └──────┬───────┘            └──────────────┘
//!          │                          │
//!          └────────────┬─────────────┘
//!                       ▼
//!               ┌──────────────┐
//!               │  cancelled   │
//!               └──────────────┘
//! ```
//!
//! `confirmed` and `cancelled` are absorbing: the only accepted transition
//! out of them is to the same status, which is a no-op.

use crate::error::{PackageError, PackageResult, StateError};
use crate::registration::Registration;
use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Prefix of every package number
pub const PACKAGE_NUMBER_PREFIX: &str = "PKG";

/// Length of the random package number suffix
pub const PACKAGE_NUMBER_SUFFIX_LEN: usize = 6;

/// Attempts before a package number collision is treated as fatal
pub const MAX_PACKAGE_NUMBER_ATTEMPTS: u32 = 8;

const SUFFIX_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Package lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageStatus {
    /// Accepting registrations, awaiting checkout
    Draft,
    /// Payment intent created, awaiting processor outcome
    Pending,
    /// Paid
    Confirmed,
    Cancelled,
}

impl PackageStatus {
    pub const ALL: [PackageStatus; 4] = [
        PackageStatus::Draft,
        PackageStatus::Pending,
        PackageStatus::Confirmed,
        PackageStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PackageStatus::Draft => "draft",
            PackageStatus::Pending => "pending",
            PackageStatus::Confirmed => "confirmed",
            PackageStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the state machine allows `self -> target`
    pub fn can_transition_to(self, target: PackageStatus) -> bool {
        use PackageStatus::*;
        matches!(
            (self, target),
            (Draft, Pending)
                | (Draft, Cancelled)
                | (Pending, Draft)
                | (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, Confirmed)
                | (Cancelled, Cancelled)
        )
    }

    /// Confirmed and cancelled never leave their state
    pub fn is_absorbing(self) -> bool {
        matches!(self, PackageStatus::Confirmed | PackageStatus::Cancelled)
    }
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment methods offered at checkout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Instant bank transfer via QR code
    Pix,
    CreditCard,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Pix => "pix",
            PaymentMethod::CreditCard => "credit_card",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = PackageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pix" => Ok(PaymentMethod::Pix),
            "credit_card" => Ok(PaymentMethod::CreditCard),
            other => Err(PackageError::InvalidPaymentMethod(other.to_string())),
        }
    }
}

/// The user a package belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageOwner {
    pub user_id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A purchasable bundle of registrations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: Uuid,

    /// Human-readable number, also sent to the processor as external reference
    pub package_number: String,

    pub owner: PackageOwner,

    pub status: PackageStatus,

    /// Sum of registrations' `price_paid`, 2 decimal places
    pub total_amount: Decimal,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<PaymentMethod>,

    /// Processor payment id, recorded for audit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Package {
    /// A fresh draft package with zero total
    pub fn new(package_number: impl Into<String>, owner: PackageOwner, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            package_number: package_number.into(),
            owner,
            status: PackageStatus::Draft,
            total_amount: Decimal::ZERO,
            payment_method: None,
            payment_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a status transition.
    ///
    /// Leaves the package untouched when the pair is not allowed.
    pub fn transition_status(&mut self, target: PackageStatus) -> Result<(), StateError> {
        if !self.status.can_transition_to(target) {
            return Err(StateError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }
        if self.status != target {
            self.status = target;
            self.touch();
        }
        Ok(())
    }

    /// Set the total to the sum of `registrations`' price snapshots
    pub fn recompute_total(&mut self, registrations: &[Registration]) -> Decimal {
        let total: Decimal = registrations.iter().map(|r| r.price_paid).sum();
        let total = total.round_dp(2);
        if self.total_amount != total {
            self.total_amount = total;
            self.touch();
        }
        total
    }

    /// Registrations may only be added or removed while in draft
    pub fn ensure_modifiable(&self) -> Result<(), StateError> {
        match self.status {
            PackageStatus::Confirmed => Err(StateError::ConfirmedPackage),
            PackageStatus::Cancelled => Err(StateError::CancelledPackage),
            PackageStatus::Pending => Err(StateError::PendingPackage),
            PackageStatus::Draft => Ok(()),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == PackageStatus::Confirmed
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Generate a package number such as `PKG-20250114-7QK2ZD`.
///
/// The suffix comes from the thread-local CSPRNG.
pub fn generate_package_number(date: NaiveDate) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..PACKAGE_NUMBER_SUFFIX_LEN)
        .map(|_| SUFFIX_CHARSET[rng.random_range(0..SUFFIX_CHARSET.len())] as char)
        .collect();
    format!(
        "{}-{}-{}",
        PACKAGE_NUMBER_PREFIX,
        date.format("%Y%m%d"),
        suffix
    )
}

/// Generate a package number not rejected by `is_taken`, within a bounded
/// number of attempts.
pub fn allocate_package_number(
    date: NaiveDate,
    is_taken: impl Fn(&str) -> bool,
) -> PackageResult<String> {
    for _ in 0..MAX_PACKAGE_NUMBER_ATTEMPTS {
        let candidate = generate_package_number(date);
        if !is_taken(&candidate) {
            return Ok(candidate);
        }
        tracing::warn!(package_number = %candidate, "Package number collision, regenerating");
    }
    Err(PackageError::Configuration(format!(
        "could not allocate a unique package number after {} attempts",
        MAX_PACKAGE_NUMBER_ATTEMPTS
    )))
}
