//! # Actor Context
//!
//! Caller identity passed explicitly into every operation that needs
//! authorization. How the identity is established is up to the caller.

use crate::error::{PackageError, PackageResult};
use crate::package::{Package, PackageOwner};
use serde::{Deserialize, Serialize};

/// Who is performing an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    /// Stable user identifier from the authentication layer
    pub user_id: String,

    /// Contact email, used as payer and notification recipient
    pub email: String,

    /// Display name (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Administrators may manage batches and any package
    #[serde(default)]
    pub is_privileged: bool,
}

impl ActorContext {
    /// A regular user
    pub fn user(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
            name: None,
            is_privileged: false,
        }
    }

    /// An administrator
    pub fn privileged(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            is_privileged: true,
            ..Self::user(user_id, email)
        }
    }

    /// Builder: set display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Owner record for a package created by this actor
    pub fn as_owner(&self) -> PackageOwner {
        PackageOwner {
            user_id: self.user_id.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
        }
    }

    pub fn owns(&self, package: &Package) -> bool {
        package.owner.user_id == self.user_id
    }

    /// Owner or administrator
    pub fn ensure_can_access(&self, package: &Package) -> PackageResult<()> {
        if self.is_privileged || self.owns(package) {
            Ok(())
        } else {
            Err(PackageError::Forbidden(format!(
                "user {} may not access package {}",
                self.user_id, package.package_number
            )))
        }
    }

    pub fn ensure_privileged(&self, action: &str) -> PackageResult<()> {
        if self.is_privileged {
            Ok(())
        } else {
            Err(PackageError::Forbidden(format!(
                "user {} may not {}",
                self.user_id, action
            )))
        }
    }
}
