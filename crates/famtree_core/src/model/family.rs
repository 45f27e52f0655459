//! Family (tenant boundary) model.
//!
//! # Responsibility
//! - Define the aggregate root that owns members and relationships.
//!
//! # Invariants
//! - `id` and `owner_id` are never nil.
//! - `name` is non-blank after trim.

use crate::model::{now_epoch_ms, UserId};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable family identifier.
pub type FamilyId = Uuid;

/// Validation failures for family records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FamilyValidationError {
    NilId,
    NilOwner,
    BlankName,
}

impl Display for FamilyValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NilId => write!(f, "family id must not be nil"),
            Self::NilOwner => write!(f, "family owner must not be nil"),
            Self::BlankName => write!(f, "family name must not be blank"),
        }
    }
}

impl Error for FamilyValidationError {}

/// Tenant boundary for one family tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Family {
    pub id: FamilyId,
    /// User that created the family.
    pub owner_id: UserId,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Family {
    /// Creates a new family with a generated id.
    pub fn new(name: impl Into<String>, owner_id: UserId) -> Result<Self, FamilyValidationError> {
        Self::with_id(Uuid::new_v4(), name, owner_id)
    }

    /// Creates a family with a caller-provided id (hydration/import paths).
    pub fn with_id(
        id: FamilyId,
        name: impl Into<String>,
        owner_id: UserId,
    ) -> Result<Self, FamilyValidationError> {
        let now = now_epoch_ms();
        let family = Self {
            id,
            owner_id,
            name: name.into().trim().to_string(),
            created_at: now,
            updated_at: now,
        };
        family.validate()?;
        Ok(family)
    }

    pub fn validate(&self) -> Result<(), FamilyValidationError> {
        if self.id.is_nil() {
            return Err(FamilyValidationError::NilId);
        }
        if self.owner_id.is_nil() {
            return Err(FamilyValidationError::NilOwner);
        }
        if self.name.trim().is_empty() {
            return Err(FamilyValidationError::BlankName);
        }
        Ok(())
    }

    /// Bumps `updated_at`; called whenever the family's graph commits a change.
    pub fn touch(&mut self) {
        self.updated_at = now_epoch_ms().max(self.updated_at);
    }
}

#[cfg(test)]
mod tests {
    use super::{Family, FamilyValidationError};
    use uuid::Uuid;

    #[test]
    fn new_trims_name() {
        let family = Family::new("  The Smiths ", Uuid::new_v4()).unwrap();
        assert_eq!(family.name, "The Smiths");
        assert_eq!(family.created_at, family.updated_at);
    }

    #[test]
    fn rejects_blank_name_and_nil_owner() {
        assert_eq!(
            Family::new("   ", Uuid::new_v4()).unwrap_err(),
            FamilyValidationError::BlankName
        );
        assert_eq!(
            Family::new("Smiths", Uuid::nil()).unwrap_err(),
            FamilyValidationError::NilOwner
        );
    }
}
