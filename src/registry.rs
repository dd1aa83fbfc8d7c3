//! At-most-one-active enforcement per subject.
//!
//! The registry is a thin layer over an [`ActiveSlotStore`]: one slot per
//! `(subject, kind)` key, claimed with an atomic conditional insert and released
//! with an atomic compare-and-delete. There is never a separate read followed by
//! a write, so two concurrent activations for the same subject cannot both win.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{SafeguardError, SafeguardResult};
use crate::ids::SubjectId;
use crate::storage::ActiveSlotStore;

/// Kinds of occurrence subject to the at-most-one-active rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccurrenceKind {
    Panic,
    Escort,
}

impl fmt::Display for OccurrenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Panic => write!(f, "panic event"),
            Self::Escort => write!(f, "escort session"),
        }
    }
}

/// Slot key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActiveKey {
    pub subject: SubjectId,
    pub kind: OccurrenceKind,
}

impl ActiveKey {
    #[must_use]
    pub const fn new(subject: SubjectId, kind: OccurrenceKind) -> Self {
        Self { subject, kind }
    }
}

/// Enforces at most one active occurrence per `(subject, kind)`.
#[derive(Clone)]
pub struct SubjectRegistry {
    slots: Arc<dyn ActiveSlotStore>,
}

impl SubjectRegistry {
    #[must_use]
    pub fn new(slots: Arc<dyn ActiveSlotStore>) -> Self {
        Self { slots }
    }

    /// Claims the slot for `occurrence`.
    ///
    /// # Errors
    ///
    /// `Conflict` if the slot is already held; `Storage` on backend failure.
    pub fn claim(&self, subject: SubjectId, kind: OccurrenceKind, occurrence: Uuid) -> SafeguardResult<()> {
        let key = ActiveKey::new(subject, kind);
        if self.slots.try_claim(key, occurrence)? {
            Ok(())
        } else {
            Err(SafeguardError::already_active(subject, kind))
        }
    }

    /// The occurrence currently holding the slot, if any.
    ///
    /// # Errors
    ///
    /// `Storage` on backend failure.
    pub fn current(&self, subject: SubjectId, kind: OccurrenceKind) -> SafeguardResult<Option<Uuid>> {
        Ok(self.slots.holder(ActiveKey::new(subject, kind))?)
    }

    /// Like [`Self::current`] but maps an empty slot to `NotFound`.
    ///
    /// # Errors
    ///
    /// `NotFound` when no occurrence is active.
    pub fn require_current(&self, subject: SubjectId, kind: OccurrenceKind) -> SafeguardResult<Uuid> {
        self.current(subject, kind)?
            .ok_or_else(|| SafeguardError::no_active(subject, kind))
    }

    /// Releases the slot if and only if `occurrence` still holds it.
    ///
    /// Returns whether this call released it.
    ///
    /// # Errors
    ///
    /// `Storage` on backend failure.
    pub fn release(&self, subject: SubjectId, kind: OccurrenceKind, occurrence: Uuid) -> SafeguardResult<bool> {
        Ok(self.slots.release(ActiveKey::new(subject, kind), occurrence)?)
    }
}
