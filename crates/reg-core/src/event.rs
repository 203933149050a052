//! # Events and Rate Batch Catalog
//!
//! Events open for registration, together with their rate batches.
//! The catalog is loaded from `config/events.toml` at startup and batch
//! mutations go through [`EventCatalog`] so the non-overlap invariant is
//! checked and written under one lock.

use crate::actor::ActorContext;
use crate::batch::{self, BatchInput, RateBatch};
use crate::error::{PackageError, PackageResult, ValidationErrors};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;
use uuid::Uuid;

/// An event participants can register for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub event_date: DateTime<Utc>,
    /// Inactive events accept no new registrations
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl Event {
    pub fn new(name: impl Into<String>, event_date: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            event_date,
            active: true,
        }
    }

    /// Builder: set description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Builder: mark inactive
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Event with its currently active batch, for listings
#[derive(Debug, Clone, Serialize)]
pub struct EventListing {
    #[serde(flatten)]
    pub event: Event,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_batch: Option<RateBatch>,
}

#[derive(Debug, Clone)]
struct EventEntry {
    event: Event,
    batches: Vec<RateBatch>,
}

/// Events and their rate batches
#[derive(Debug, Default)]
pub struct EventCatalog {
    entries: RwLock<HashMap<Uuid, EventEntry>>,
}

impl EventCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, EventEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, EventEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or replace an event (batches are kept on replace)
    pub fn upsert_event(&self, event: Event) {
        let mut entries = self.write();
        match entries.get_mut(&event.id) {
            Some(entry) => entry.event = event,
            None => {
                entries.insert(
                    event.id,
                    EventEntry {
                        event,
                        batches: Vec::new(),
                    },
                );
            }
        }
    }

    /// Find an event by ID
    pub fn get(&self, event_id: Uuid) -> Option<Event> {
        self.read().get(&event_id).map(|e| e.event.clone())
    }

    /// All events ordered by date, each with the batch active on `as_of`
    pub fn listings(&self, as_of: NaiveDate) -> Vec<EventListing> {
        let entries = self.read();
        let mut listings: Vec<EventListing> = entries
            .values()
            .map(|entry| EventListing {
                event: entry.event.clone(),
                active_batch: batch::find_active_batch(&entry.batches, as_of).cloned(),
            })
            .collect();
        listings.sort_by_key(|l| l.event.event_date);
        listings
    }

    /// Number of events
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Batches of an event, ordered by start date
    pub fn batches(&self, event_id: Uuid) -> PackageResult<Vec<RateBatch>> {
        let entries = self.read();
        let entry = entries
            .get(&event_id)
            .ok_or_else(|| PackageError::not_found("event", event_id))?;
        let mut batches = entry.batches.clone();
        batches.sort_by_key(|b| b.start_date);
        Ok(batches)
    }

    /// The batch in effect for `event_id` on `as_of`
    pub fn find_active_batch(
        &self,
        event_id: Uuid,
        as_of: NaiveDate,
    ) -> PackageResult<Option<RateBatch>> {
        let entries = self.read();
        let entry = entries
            .get(&event_id)
            .ok_or_else(|| PackageError::not_found("event", event_id))?;
        Ok(batch::find_active_batch(&entry.batches, as_of).cloned())
    }

    /// True iff `candidate` overlaps no batch of the event other than `exclude`
    pub fn validate_no_overlap(
        &self,
        event_id: Uuid,
        candidate: &batch::DateRange,
        exclude_batch_id: Option<Uuid>,
    ) -> PackageResult<bool> {
        let entries = self.read();
        let entry = entries
            .get(&event_id)
            .ok_or_else(|| PackageError::not_found("event", event_id))?;
        Ok(batch::validate_no_overlap(
            &entry.batches,
            candidate,
            exclude_batch_id,
        ))
    }

    /// Create a batch (administrators only)
    pub fn create_batch(
        &self,
        actor: &ActorContext,
        event_id: Uuid,
        input: BatchInput,
    ) -> PackageResult<RateBatch> {
        actor.ensure_privileged("manage rate batches")?;
        self.insert_batch(event_id, input)
    }

    fn insert_batch(&self, event_id: Uuid, input: BatchInput) -> PackageResult<RateBatch> {
        let range = input.validate()?;

        let mut entries = self.write();
        let entry = entries
            .get_mut(&event_id)
            .ok_or_else(|| PackageError::not_found("event", event_id))?;

        if !batch::validate_no_overlap(&entry.batches, &range, None) {
            return Err(PackageError::Overlap { range });
        }

        let created = RateBatch::new(event_id, input.price, range);
        entry.batches.push(created.clone());

        info!(
            event_id = %event_id,
            batch_id = %created.id,
            price = %created.price,
            "Created rate batch {}",
            range
        );
        Ok(created)
    }

    /// Update a batch's price and window (administrators only)
    pub fn update_batch(
        &self,
        actor: &ActorContext,
        event_id: Uuid,
        batch_id: Uuid,
        input: BatchInput,
    ) -> PackageResult<RateBatch> {
        actor.ensure_privileged("manage rate batches")?;
        let range = input.validate()?;

        let mut entries = self.write();
        let entry = entries
            .get_mut(&event_id)
            .ok_or_else(|| PackageError::not_found("event", event_id))?;

        if !entry.batches.iter().any(|b| b.id == batch_id) {
            return Err(PackageError::not_found("rate batch", batch_id));
        }
        if !batch::validate_no_overlap(&entry.batches, &range, Some(batch_id)) {
            return Err(PackageError::Overlap { range });
        }

        let existing = entry
            .batches
            .iter_mut()
            .find(|b| b.id == batch_id)
            .ok_or_else(|| PackageError::not_found("rate batch", batch_id))?;

        existing.price = input.price.round_dp(2);
        existing.start_date = range.start;
        existing.end_date = range.end;

        info!(event_id = %event_id, batch_id = %batch_id, "Updated rate batch to {}", range);
        Ok(existing.clone())
    }

    /// Delete a batch (administrators only).
    ///
    /// Registrations keep the price they were admitted with.
    pub fn delete_batch(
        &self,
        actor: &ActorContext,
        event_id: Uuid,
        batch_id: Uuid,
    ) -> PackageResult<()> {
        actor.ensure_privileged("manage rate batches")?;

        let mut entries = self.write();
        let entry = entries
            .get_mut(&event_id)
            .ok_or_else(|| PackageError::not_found("event", event_id))?;

        let before = entry.batches.len();
        entry.batches.retain(|b| b.id != batch_id);
        if entry.batches.len() == before {
            return Err(PackageError::not_found("rate batch", batch_id));
        }

        info!(event_id = %event_id, batch_id = %batch_id, "Deleted rate batch");
        Ok(())
    }

    /// Load catalog from TOML string.
    ///
    /// Batches go through the same validation as `create_batch`.
    pub fn from_toml(toml_str: &str) -> PackageResult<Self> {
        let file: CatalogFile = toml::from_str(toml_str)
            .map_err(|e| PackageError::Configuration(format!("invalid event catalog: {e}")))?;

        let catalog = Self::new();
        for config in file.events {
            let event = Event {
                id: config.id.unwrap_or_else(Uuid::new_v4),
                name: config.name,
                description: config.description,
                event_date: config.event_date,
                active: config.active,
            };
            let event_id = event.id;
            catalog.upsert_event(event);

            for input in config.batches {
                catalog.insert_batch(event_id, input).map_err(|e| {
                    PackageError::Configuration(format!(
                        "invalid batch for event {event_id}: {e}"
                    ))
                })?;
            }
        }
        Ok(catalog)
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    events: Vec<EventConfig>,
}

#[derive(Debug, Deserialize)]
struct EventConfig {
    #[serde(default)]
    id: Option<Uuid>,
    name: String,
    #[serde(default)]
    description: String,
    event_date: DateTime<Utc>,
    #[serde(default = "default_true")]
    active: bool,
    #[serde(default)]
    batches: Vec<BatchInput>,
}

/// Reject an inactive event as a validation failure on `event`
pub(crate) fn ensure_event_open(event: &Event) -> PackageResult<()> {
    if event.active {
        Ok(())
    } else {
        Err(PackageError::Validation(ValidationErrors::single(
            "event",
            "this event is no longer open for registration",
        )))
    }
}
