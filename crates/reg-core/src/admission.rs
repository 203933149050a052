//! # Registration Admission
//!
//! Adds participants to packages, priced from the event's active batch, and
//! removes them again while the package is still a draft.
//!
//! Checks run in a fixed order so callers always get the most fundamental
//! failure first:
//!
//! 1. package confirmed
//! 2. package cancelled
//! 3. package pending (payment in flight)
//! 4. event inactive
//! 5. no active batch today
//! 6. participant payload (all fields collected)

use crate::actor::ActorContext;
use crate::clock::SharedClock;
use crate::error::{PackageError, PackageResult, ValidationErrors};
use crate::event::{self, EventCatalog};
use crate::package::Package;
use crate::registration::{ParticipantPayload, Registration};
use crate::store::{PackageRecord, PackageStore};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// A package with the registrations it owns
#[derive(Debug, Clone, Serialize)]
pub struct PackageView {
    #[serde(flatten)]
    pub package: Package,
    pub registrations: Vec<Registration>,
}

impl From<&PackageRecord> for PackageView {
    fn from(record: &PackageRecord) -> Self {
        Self {
            package: record.package.clone(),
            registrations: record.registrations.clone(),
        }
    }
}

/// Result of admitting a registration
#[derive(Debug, Clone, Serialize)]
pub struct Admission {
    pub registration: Registration,
    pub package: Package,
}

/// Result of removing a registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovalOutcome {
    pub package_id: Uuid,
    pub removed_registration_id: Uuid,
    /// The last registration was removed and the package with it
    pub package_deleted: bool,
    pub total_amount: Decimal,
}

/// Package creation, admission and removal
#[derive(Clone)]
pub struct RegistrationService {
    store: Arc<PackageStore>,
    catalog: Arc<EventCatalog>,
    clock: SharedClock,
}

impl RegistrationService {
    pub fn new(store: Arc<PackageStore>, catalog: Arc<EventCatalog>, clock: SharedClock) -> Self {
        Self {
            store,
            catalog,
            clock,
        }
    }

    /// Resolve the event and its batch price for today, then the payload
    fn price_admission(&self, event_id: Uuid, payload: &ParticipantPayload) -> PackageResult<Decimal> {
        let event = self
            .catalog
            .get(event_id)
            .ok_or_else(|| PackageError::not_found("event", event_id))?;
        event::ensure_event_open(&event)?;

        let batch = self
            .catalog
            .find_active_batch(event_id, self.clock.today())?
            .ok_or_else(|| {
                PackageError::Validation(ValidationErrors::single(
                    "event",
                    "no active batch for this event",
                ))
            })?;

        payload.validate().into_result()?;
        Ok(batch.price)
    }

    /// Create a draft package for the actor holding its first registration.
    ///
    /// A package never exists without registrations, so creation and first
    /// admission are one step.
    #[instrument(skip(self, actor, payload), fields(user_id = %actor.user_id))]
    pub fn create_package(
        &self,
        actor: &ActorContext,
        event_id: Uuid,
        payload: ParticipantPayload,
    ) -> PackageResult<Admission> {
        let price = self.price_admission(event_id, &payload)?;
        let now = self.clock.now();

        let record = self
            .store
            .create(actor.as_owner(), self.clock.today(), now, |package_id| {
                Registration::admit(package_id, event_id, payload, price, now)
            })?;

        let registration = record
            .registrations
            .first()
            .cloned()
            .ok_or_else(|| PackageError::Configuration("stored package lost its registration".into()))?;

        info!(
            package_number = %record.package.package_number,
            event_id = %event_id,
            price_paid = %price,
            "Created package with first registration"
        );

        Ok(Admission {
            registration,
            package: record.package,
        })
    }

    /// Admit a participant into an existing package, or into a new one when
    /// `package_id` is `None`.
    #[instrument(skip(self, actor, payload), fields(user_id = %actor.user_id))]
    pub async fn add_registration(
        &self,
        actor: &ActorContext,
        package_id: Option<Uuid>,
        event_id: Uuid,
        payload: ParticipantPayload,
    ) -> PackageResult<Admission> {
        let Some(package_id) = package_id else {
            return self.create_package(actor, event_id, payload);
        };

        let mut guard = self.store.lock(package_id).await?;
        actor.ensure_can_access(&guard.package)?;
        guard.package.ensure_modifiable()?;

        let price = self.price_admission(event_id, &payload)?;
        let registration =
            Registration::admit(package_id, event_id, payload, price, self.clock.now());
        guard.push_registration(registration.clone());

        info!(
            package_number = %guard.package.package_number,
            event_id = %event_id,
            price_paid = %price,
            total = %guard.package.total_amount,
            "Added registration"
        );

        Ok(Admission {
            registration,
            package: guard.package.clone(),
        })
    }

    /// Remove a registration from a draft package.
    ///
    /// Removing the last registration deletes the package.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn remove_registration(
        &self,
        actor: &ActorContext,
        package_id: Uuid,
        registration_id: Uuid,
    ) -> PackageResult<RemovalOutcome> {
        let mut guard = self.store.lock(package_id).await?;
        actor.ensure_can_access(&guard.package)?;
        guard.package.ensure_modifiable()?;

        guard
            .take_registration(registration_id)
            .ok_or_else(|| PackageError::not_found("registration", registration_id))?;

        let package_deleted = guard.registrations.is_empty();
        if package_deleted {
            self.store.delete(&mut guard);
        }

        info!(
            package_number = %guard.package.package_number,
            registration_id = %registration_id,
            package_deleted,
            total = %guard.package.total_amount,
            "Removed registration"
        );

        Ok(RemovalOutcome {
            package_id,
            removed_registration_id: registration_id,
            package_deleted,
            total_amount: guard.package.total_amount,
        })
    }

    /// Current total of a package
    pub async fn get_total(&self, actor: &ActorContext, package_id: Uuid) -> PackageResult<Decimal> {
        let guard = self.store.lock(package_id).await?;
        actor.ensure_can_access(&guard.package)?;
        Ok(guard.package.total_amount)
    }

    pub async fn get_package(
        &self,
        actor: &ActorContext,
        package_id: Uuid,
    ) -> PackageResult<PackageView> {
        let guard = self.store.lock(package_id).await?;
        actor.ensure_can_access(&guard.package)?;
        Ok(PackageView::from(&*guard))
    }

    /// The actor's packages, newest first (every package for administrators).
    ///
    /// Reads committed snapshots, so a package mid-mutation shows its state
    /// from before the mutation.
    pub fn list_packages(&self, actor: &ActorContext) -> Vec<PackageView> {
        let mut views: Vec<PackageView> = self
            .store
            .snapshots()
            .iter()
            .filter(|record| actor.is_privileged || actor.owns(&record.package))
            .map(PackageView::from)
            .collect();
        views.sort_by(|a, b| b.package.created_at.cmp(&a.package.created_at));
        views
    }
}
