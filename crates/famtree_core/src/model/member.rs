//! Family member (graph node) model.
//!
//! # Responsibility
//! - Define the person record stored at every node of a family graph.
//! - Separate hard validation failures from soft data-quality warnings.
//!
//! # Invariants
//! - `date_of_death`, when set, is not earlier than `date_of_birth`.
//! - `full_name` is trimmed, non-blank and has no repeated whitespace.
//! - `generation` is owned by the generation calculator; profile edits never
//!   change it.
//! - `biography` is an opaque payload and is passed through verbatim.

use crate::model::family::FamilyId;
use crate::model::now_epoch_ms;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable member identifier.
pub type MemberId = Uuid;

/// Depth coordinate: a parent is exactly one less than each of its children.
pub type Generation = i32;

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
}

/// Hard validation failures; a member in this state is never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberValidationError {
    NilId,
    NilFamilyId,
    BlankName,
    DeathBeforeBirth { date_of_birth: i64, date_of_death: i64 },
}

impl Display for MemberValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NilId => write!(f, "member id must not be nil"),
            Self::NilFamilyId => write!(f, "member family id must not be nil"),
            Self::BlankName => write!(f, "member full name must not be blank"),
            Self::DeathBeforeBirth {
                date_of_birth,
                date_of_death,
            } => write!(
                f,
                "date_of_death ({date_of_death}) must be >= date_of_birth ({date_of_birth})"
            ),
        }
    }
}

impl Error for MemberValidationError {}

/// Soft data-quality findings. Reported and logged, never blocking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberWarning {
    /// `is_alive = false` but no date of death was recorded.
    DeceasedWithoutDateOfDeath,
    /// `is_alive = true` while a date of death is recorded.
    AliveWithDateOfDeath,
}

impl MemberWarning {
    /// Stable code used in log lines.
    pub fn code(self) -> &'static str {
        match self {
            Self::DeceasedWithoutDateOfDeath => "deceased_without_date_of_death",
            Self::AliveWithDateOfDeath => "alive_with_date_of_death",
        }
    }
}

impl Display for MemberWarning {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeceasedWithoutDateOfDeath => {
                write!(f, "member is marked deceased but has no date of death")
            }
            Self::AliveWithDateOfDeath => {
                write!(f, "member is marked alive but has a date of death")
            }
        }
    }
}

/// Caller-editable profile fields of a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberProfile {
    pub full_name: String,
    pub gender: Gender,
    /// Epoch milliseconds.
    pub date_of_birth: i64,
    /// Epoch milliseconds. Must be >= `date_of_birth` when set.
    pub date_of_death: Option<i64>,
    pub is_alive: bool,
    /// Reference into the host's media storage.
    pub avatar: Option<String>,
    /// Opaque payload; the engine never inspects it.
    pub biography: Option<String>,
}

impl MemberProfile {
    /// Profile for a living person with no optional data.
    pub fn living(full_name: impl Into<String>, gender: Gender, date_of_birth: i64) -> Self {
        Self {
            full_name: full_name.into(),
            gender,
            date_of_birth,
            date_of_death: None,
            is_alive: true,
            avatar: None,
            biography: None,
        }
    }
}

/// Request to create a member, optionally placing it at a known generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMember {
    pub profile: MemberProfile,
    /// Defaults to `0` when absent.
    pub generation: Option<Generation>,
}

impl From<MemberProfile> for NewMember {
    fn from(profile: MemberProfile) -> Self {
        Self {
            profile,
            generation: None,
        }
    }
}

/// Person node of a family graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MemberWire")]
pub struct FamilyMember {
    pub id: MemberId,
    pub family_id: FamilyId,
    pub full_name: String,
    pub gender: Gender,
    pub date_of_birth: i64,
    pub date_of_death: Option<i64>,
    pub is_alive: bool,
    pub avatar: Option<String>,
    pub biography: Option<String>,
    pub generation: Generation,
    pub created_at: i64,
    pub updated_at: i64,
}

impl FamilyMember {
    /// Creates a member with a generated id.
    pub fn new(family_id: FamilyId, request: NewMember) -> Result<Self, MemberValidationError> {
        Self::with_id(Uuid::new_v4(), family_id, request)
    }

    /// Creates a member with a caller-provided id (import/hydration paths).
    pub fn with_id(
        id: MemberId,
        family_id: FamilyId,
        request: NewMember,
    ) -> Result<Self, MemberValidationError> {
        let now = now_epoch_ms();
        let profile = request.profile;
        let member = Self {
            id,
            family_id,
            full_name: normalize_full_name(&profile.full_name)
                .ok_or(MemberValidationError::BlankName)?,
            gender: profile.gender,
            date_of_birth: profile.date_of_birth,
            date_of_death: profile.date_of_death,
            is_alive: profile.is_alive,
            avatar: profile.avatar,
            biography: profile.biography,
            generation: request.generation.unwrap_or(0),
            created_at: now,
            updated_at: now,
        };
        member.validate()?;
        Ok(member)
    }

    /// Checks hard invariants.
    pub fn validate(&self) -> Result<(), MemberValidationError> {
        if self.id.is_nil() {
            return Err(MemberValidationError::NilId);
        }
        if self.family_id.is_nil() {
            return Err(MemberValidationError::NilFamilyId);
        }
        if self.full_name.trim().is_empty() {
            return Err(MemberValidationError::BlankName);
        }
        if let Some(date_of_death) = self.date_of_death {
            if date_of_death < self.date_of_birth {
                return Err(MemberValidationError::DeathBeforeBirth {
                    date_of_birth: self.date_of_birth,
                    date_of_death,
                });
            }
        }
        Ok(())
    }

    /// Returns soft findings for the current state.
    pub fn warnings(&self) -> Vec<MemberWarning> {
        let mut warnings = Vec::new();
        match (self.is_alive, self.date_of_death) {
            (false, None) => warnings.push(MemberWarning::DeceasedWithoutDateOfDeath),
            (true, Some(_)) => warnings.push(MemberWarning::AliveWithDateOfDeath),
            _ => {}
        }
        warnings
    }

    /// Returns the editable profile view.
    pub fn profile(&self) -> MemberProfile {
        MemberProfile {
            full_name: self.full_name.clone(),
            gender: self.gender,
            date_of_birth: self.date_of_birth,
            date_of_death: self.date_of_death,
            is_alive: self.is_alive,
            avatar: self.avatar.clone(),
            biography: self.biography.clone(),
        }
    }

    /// Replaces profile fields, leaving identity and generation untouched.
    ///
    /// The member is not modified when the new profile fails validation.
    pub fn apply_profile(&mut self, profile: MemberProfile) -> Result<(), MemberValidationError> {
        let mut candidate = self.clone();
        candidate.full_name =
            normalize_full_name(&profile.full_name).ok_or(MemberValidationError::BlankName)?;
        candidate.gender = profile.gender;
        candidate.date_of_birth = profile.date_of_birth;
        candidate.date_of_death = profile.date_of_death;
        candidate.is_alive = profile.is_alive;
        candidate.avatar = profile.avatar;
        candidate.biography = profile.biography;
        candidate.validate()?;
        candidate.updated_at = now_epoch_ms().max(self.updated_at);
        *self = candidate;
        Ok(())
    }
}

/// Trims and collapses whitespace runs. Returns `None` for blank input.
pub fn normalize_full_name(value: &str) -> Option<String> {
    let collapsed = WHITESPACE_RE.replace_all(value.trim(), " ");
    if collapsed.is_empty() {
        return None;
    }
    Some(collapsed.into_owned())
}

/// Unvalidated serde shape; converted through `FamilyMember::validate`.
#[derive(Deserialize)]
struct MemberWire {
    id: MemberId,
    family_id: FamilyId,
    full_name: String,
    gender: Gender,
    date_of_birth: i64,
    date_of_death: Option<i64>,
    is_alive: bool,
    avatar: Option<String>,
    biography: Option<String>,
    generation: Generation,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<MemberWire> for FamilyMember {
    type Error = MemberValidationError;

    fn try_from(wire: MemberWire) -> Result<Self, Self::Error> {
        let member = Self {
            id: wire.id,
            family_id: wire.family_id,
            full_name: wire.full_name,
            gender: wire.gender,
            date_of_birth: wire.date_of_birth,
            date_of_death: wire.date_of_death,
            is_alive: wire.is_alive,
            avatar: wire.avatar,
            biography: wire.biography,
            generation: wire.generation,
            created_at: wire.created_at,
            updated_at: wire.updated_at,
        };
        member.validate()?;
        Ok(member)
    }
}
