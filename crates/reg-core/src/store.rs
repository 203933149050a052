//! # Package Store
//!
//! In-memory persistence for packages and their registrations.
//!
//! Every package lives behind its own `tokio::sync::Mutex`, which is the
//! single serialization point for admission, removal, total recompute and
//! status changes. The index (`id -> record`, `package_number -> id`) sits
//! behind a short-lived `RwLock` that is never held across an `.await`.
//!
//! Releasing a package lock publishes the record as the package's committed
//! snapshot. Listings read snapshots and never wait on a package lock.

use crate::error::{PackageError, PackageResult};
use crate::package::{self, Package, PackageOwner};
use crate::registration::Registration;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

/// A package together with the registrations it owns
#[derive(Debug, Clone)]
pub struct PackageRecord {
    pub package: Package,
    pub registrations: Vec<Registration>,
    deleted: bool,
}

impl PackageRecord {
    fn new(package: Package) -> Self {
        Self {
            package,
            registrations: Vec::new(),
            deleted: false,
        }
    }

    /// Append a registration and refresh the total
    pub(crate) fn push_registration(&mut self, registration: Registration) {
        self.registrations.push(registration);
        self.package.recompute_total(&self.registrations);
    }

    /// Remove a registration by id and refresh the total
    pub(crate) fn take_registration(&mut self, registration_id: Uuid) -> Option<Registration> {
        let position = self
            .registrations
            .iter()
            .position(|r| r.id == registration_id)?;
        let removed = self.registrations.remove(position);
        self.package.recompute_total(&self.registrations);
        Some(removed)
    }
}

/// Exclusive access to one package for the duration of a mutation
pub struct PackageGuard {
    record: OwnedMutexGuard<PackageRecord>,
    committed: Arc<RwLock<PackageRecord>>,
}

impl Deref for PackageGuard {
    type Target = PackageRecord;

    fn deref(&self) -> &PackageRecord {
        &self.record
    }
}

impl DerefMut for PackageGuard {
    fn deref_mut(&mut self) -> &mut PackageRecord {
        &mut self.record
    }
}

impl Drop for PackageGuard {
    fn drop(&mut self) {
        // Still holding the package mutex here
        *self.committed.write().unwrap_or_else(PoisonError::into_inner) = self.record.clone();
    }
}

impl fmt::Debug for PackageGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PackageGuard").field(&*self.record).finish()
    }
}

#[derive(Debug, Clone)]
struct Entry {
    record: Arc<Mutex<PackageRecord>>,
    committed: Arc<RwLock<PackageRecord>>,
}

impl Entry {
    fn new(record: PackageRecord) -> Self {
        Self {
            committed: Arc::new(RwLock::new(record.clone())),
            record: Arc::new(Mutex::new(record)),
        }
    }

    async fn lock(self) -> PackageGuard {
        PackageGuard {
            record: self.record.lock_owned().await,
            committed: self.committed,
        }
    }

    fn snapshot(&self) -> PackageRecord {
        self.committed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug, Default)]
struct StoreIndex {
    by_id: HashMap<Uuid, Entry>,
    by_number: HashMap<String, Uuid>,
}

/// Packages keyed by id and by package number
#[derive(Debug, Default)]
pub struct PackageStore {
    index: RwLock<StoreIndex>,
}

impl PackageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreIndex> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreIndex> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a draft package and store it together with its first
    /// registration.
    ///
    /// The package number is allocated and reserved under the index write
    /// lock, so two concurrent creations can never share a number.
    pub fn create(
        &self,
        owner: PackageOwner,
        today: NaiveDate,
        now: DateTime<Utc>,
        first_registration: impl FnOnce(Uuid) -> Registration,
    ) -> PackageResult<PackageRecord> {
        let mut index = self.write();

        let number = package::allocate_package_number(today, |candidate| {
            index.by_number.contains_key(candidate)
        })?;

        let mut record = PackageRecord::new(Package::new(number, owner, now));
        let registration = first_registration(record.package.id);
        record.push_registration(registration);

        let id = record.package.id;
        index
            .by_number
            .insert(record.package.package_number.clone(), id);
        index
            .by_id
            .insert(id, Entry::new(record.clone()));

        debug!(
            package_id = %id,
            package_number = %record.package.package_number,
            "Stored new package"
        );
        Ok(record)
    }

    /// Store an existing record as-is, rejecting a duplicate package number
    pub fn insert(&self, package: Package, registrations: Vec<Registration>) -> PackageResult<()> {
        let mut index = self.write();
        if index.by_number.contains_key(&package.package_number) {
            return Err(PackageError::Configuration(format!(
                "package number {} already exists",
                package.package_number
            )));
        }

        let id = package.id;
        index.by_number.insert(package.package_number.clone(), id);
        let mut record = PackageRecord::new(package);
        record.registrations = registrations;
        index.by_id.insert(id, Entry::new(record));
        Ok(())
    }

    pub fn number_exists(&self, package_number: &str) -> bool {
        self.read().by_number.contains_key(package_number)
    }

    /// Lock a package by id.
    ///
    /// Returns not-found when the package never existed or was deleted while
    /// this caller waited for the lock.
    pub async fn lock(&self, package_id: Uuid) -> PackageResult<PackageGuard> {
        let entry = self
            .read()
            .by_id
            .get(&package_id)
            .cloned()
            .ok_or_else(|| PackageError::not_found("package", package_id))?;

        let guard = entry.lock().await;
        if guard.deleted {
            return Err(PackageError::not_found("package", package_id));
        }
        Ok(guard)
    }

    /// Lock a package by its number (the processor's external reference)
    pub async fn lock_by_number(&self, package_number: &str) -> PackageResult<PackageGuard> {
        let not_found = || PackageError::PackageNotFound {
            reference: package_number.to_string(),
        };

        let entry = {
            let index = self.read();
            let id = index.by_number.get(package_number).ok_or_else(not_found)?;
            index.by_id.get(id).cloned().ok_or_else(not_found)?
        };

        let guard = entry.lock().await;
        if guard.deleted {
            return Err(not_found());
        }
        Ok(guard)
    }

    /// Delete the locked package and its registrations.
    ///
    /// The record is tombstoned before it leaves the index, so anyone already
    /// queued on its lock observes not-found.
    pub fn delete(&self, guard: &mut PackageGuard) {
        guard.deleted = true;
        guard.registrations.clear();

        let mut index = self.write();
        index.by_id.remove(&guard.package.id);
        index.by_number.remove(&guard.package.package_number);

        debug!(package_number = %guard.package.package_number, "Deleted package");
    }

    /// Ids of every stored package
    pub fn ids(&self) -> Vec<Uuid> {
        self.read().by_id.keys().copied().collect()
    }

    /// Last committed state of every stored package, without locking any
    pub fn snapshots(&self) -> Vec<PackageRecord> {
        self.read()
            .by_id
            .values()
            .map(Entry::snapshot)
            .filter(|record| !record.deleted)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().by_id.is_empty()
    }
}
