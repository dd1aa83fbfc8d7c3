//! Escort sessions: `Active -> Ended -> Purged`.
//!
//! While a session is Active the subject's live position is projected onto the
//! session record. Stopping clears the projection at once but keeps the trail
//! until `purge_at`, after which the [`crate::reaper::RetentionReaper`] deletes
//! the whole record.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SafeguardConfig;
use crate::error::{SafeguardError, SafeguardResult};
use crate::geo::LocationFix;
use crate::ids::{EscortSessionId, SubjectId};
use crate::registry::{OccurrenceKind, SubjectRegistry};
use crate::storage::EscortSessionStore;

/// Escort session state.
///
/// `Purged` is never stored; it is what the reaper reports for a session it
/// deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscortState {
    Active,
    Ended,
    Purged,
}

/// An escort session and its location history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscortSession {
    pub id: EscortSessionId,
    pub subject: SubjectId,
    pub state: EscortState,
    /// Live-location projection. `Some` only while Active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live: Option<LocationFix>,
    pub trail: Vec<LocationFix>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purge_at: Option<DateTime<Utc>>,
}

impl EscortSession {
    fn start(subject: SubjectId, origin: LocationFix) -> Self {
        Self {
            id: EscortSessionId::new(),
            subject,
            state: EscortState::Active,
            live: Some(origin.clone()),
            trail: vec![origin],
            started_at: Utc::now(),
            ended_at: None,
            purge_at: None,
        }
    }

    /// True when the session is Ended and its retention window has elapsed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == EscortState::Ended && self.purge_at.is_some_and(|at| at <= now)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == EscortState::Active
    }
}

/// Owns the escort session state machine.
///
/// Entitlement checks happen before this component is called.
#[derive(Clone)]
pub struct EscortSessionMachine {
    sessions: Arc<dyn EscortSessionStore>,
    registry: SubjectRegistry,
    retention: Duration,
}

impl EscortSessionMachine {
    #[must_use]
    pub fn new(sessions: Arc<dyn EscortSessionStore>, registry: SubjectRegistry, config: &SafeguardConfig) -> Self {
        Self {
            sessions,
            registry,
            retention: config.retention_window(),
        }
    }

    /// Retention window applied on stop.
    #[must_use]
    pub const fn retention(&self) -> Duration {
        self.retention
    }

    /// Start a session at `origin`.
    ///
    /// # Errors
    ///
    /// `Conflict` if the subject already has an Active session.
    pub fn start(&self, subject: SubjectId, origin: LocationFix) -> SafeguardResult<EscortSessionId> {
        origin.validate()?;
        let session = EscortSession::start(subject, origin);
        let id = session.id;

        self.registry
            .claim(subject, OccurrenceKind::Escort, *id.as_uuid())?;

        if let Err(e) = self.sessions.insert(session) {
            if let Err(release_err) = self.registry.release(subject, OccurrenceKind::Escort, *id.as_uuid()) {
                tracing::error!(
                    subject = %subject,
                    session_id = %id,
                    error = %release_err,
                    "failed to release escort slot after insert failure"
                );
            }
            return Err(e.into());
        }

        tracing::info!(subject = %subject, session_id = %id, "escort started");
        Ok(id)
    }

    /// Append to the trail and move the live projection.
    ///
    /// # Errors
    ///
    /// `NotFound` if no Active session exists.
    pub fn log_location(&self, subject: SubjectId, fix: LocationFix) -> SafeguardResult<()> {
        fix.validate()?;
        let id = EscortSessionId::from_uuid(self.registry.require_current(subject, OccurrenceKind::Escort)?);
        if !self.sessions.append_trail(id, fix)? {
            return Err(SafeguardError::no_active(subject, OccurrenceKind::Escort));
        }
        tracing::trace!(subject = %subject, session_id = %id, "escort location logged");
        Ok(())
    }

    /// End the Active session and schedule its purge.
    ///
    /// # Errors
    ///
    /// `NotFound` if no Active session exists.
    pub fn stop(&self, subject: SubjectId) -> SafeguardResult<EscortSession> {
        let id = EscortSessionId::from_uuid(self.registry.require_current(subject, OccurrenceKind::Escort)?);
        let ended_at = Utc::now();
        let purge_at = ended_at
            .checked_add_signed(self.retention)
            .ok_or_else(|| SafeguardError::internal(format!("purge time overflows for escort session {id}")))?;

        let Some(ended) = self.sessions.end(id, ended_at, purge_at)? else {
            return Err(SafeguardError::no_active(subject, OccurrenceKind::Escort));
        };
        if !self
            .registry
            .release(subject, OccurrenceKind::Escort, *id.as_uuid())?
        {
            tracing::warn!(subject = %subject, session_id = %id, "escort slot already released");
        }

        tracing::info!(
            subject = %subject,
            session_id = %id,
            purge_at = %purge_at,
            "escort stopped"
        );
        Ok(ended)
    }

    /// Where the subject is right now, if an escort is Active.
    ///
    /// # Errors
    ///
    /// `Storage` on backend failure.
    pub fn live_location(&self, subject: SubjectId) -> SafeguardResult<Option<LocationFix>> {
        let Some(id) = self.registry.current(subject, OccurrenceKind::Escort)? else {
            return Ok(None);
        };
        Ok(self
            .sessions
            .get(EscortSessionId::from_uuid(id))?
            .filter(EscortSession::is_active)
            .and_then(|s| s.live))
    }

    /// Unpurged sessions of `subject`, oldest first.
    ///
    /// # Errors
    ///
    /// `Storage` on backend failure.
    pub fn history(&self, subject: SubjectId) -> SafeguardResult<Vec<EscortSession>> {
        Ok(self.sessions.find_by_subject(subject)?)
    }
}
