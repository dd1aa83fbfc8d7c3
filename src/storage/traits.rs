//! Abstract storage traits.
//!
//! These traits define the contract a document store must honour. Every
//! conditional method (`try_claim`, `release`, `append_trail`, `end`,
//! `deactivate`, `mark_uploaded`, `purge_if_expired`) must be a single atomic
//! operation in the backend: a conditional update/delete, never a read followed
//! by a separate write.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::escort::EscortSession;
use crate::geo::{Catchment, GeoPoint, LocationFix};
use crate::geo_index::ResponderTeam;
use crate::ids::{EscortSessionId, PanicEventId, ReportId, ResponderId, SubjectId};
use crate::panic::PanicEvent;
use crate::registry::ActiveKey;
use crate::reports::IncidentReport;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Record not found where one was required.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Connection failed.
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

/// Result of a conditional upload-flag update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMark {
    /// The flag was set by this call.
    Marked,
    /// The report was already uploaded.
    AlreadyUploaded,
    /// No report with that id owned by that subject.
    NotFound,
}

/// Responder catchments. Upsert semantics, no history.
pub trait ResponderStore: Send + Sync {
    /// Insert or replace the catchment of `team.responder`.
    fn upsert(&self, team: ResponderTeam) -> Result<(), StorageError>;

    /// Get a responder's catchment.
    fn get(&self, responder: ResponderId) -> Result<Option<ResponderTeam>, StorageError>;

    /// Every responder whose own catchment covers `point`.
    ///
    /// `max_radius_km` is a prefilter bound for backends with a `$near`-style
    /// index: responders farther than it from `point` may be skipped.
    fn find_covering(&self, point: &GeoPoint, max_radius_km: f64) -> Result<Vec<ResponderTeam>, StorageError>;
}

/// Slot table behind the subject registry.
pub trait ActiveSlotStore: Send + Sync {
    /// Insert `occurrence` under `key` iff the key is empty. Returns whether it was inserted.
    fn try_claim(&self, key: ActiveKey, occurrence: Uuid) -> Result<bool, StorageError>;

    /// Current holder of `key`.
    fn holder(&self, key: ActiveKey) -> Result<Option<Uuid>, StorageError>;

    /// Delete `key` iff it is held by `occurrence`. Returns whether it was deleted.
    fn release(&self, key: ActiveKey, occurrence: Uuid) -> Result<bool, StorageError>;
}

/// Panic events.
pub trait PanicEventStore: Send + Sync {
    /// Insert a new event. Returns error if the id already exists.
    fn insert(&self, event: PanicEvent) -> Result<(), StorageError>;

    /// Get an event by id.
    fn get(&self, id: PanicEventId) -> Result<Option<PanicEvent>, StorageError>;

    /// Append to the trail iff the event is Active. Returns whether it was appended.
    fn append_trail(&self, id: PanicEventId, fix: LocationFix) -> Result<bool, StorageError>;

    /// Transition Active -> Deactivated. Returns false if not Active.
    fn deactivate(&self, id: PanicEventId, at: DateTime<Utc>) -> Result<bool, StorageError>;

    /// All events of a subject, oldest first.
    fn find_by_subject(&self, subject: SubjectId) -> Result<Vec<PanicEvent>, StorageError>;

    /// Active events whose latest trail point lies inside `catchment`.
    fn find_active_within(&self, catchment: &Catchment) -> Result<Vec<PanicEvent>, StorageError>;
}

/// Escort sessions, including the live-location projection.
pub trait EscortSessionStore: Send + Sync {
    /// Insert a new session. Returns error if the id already exists.
    fn insert(&self, session: EscortSession) -> Result<(), StorageError>;

    /// Get a session by id.
    fn get(&self, id: EscortSessionId) -> Result<Option<EscortSession>, StorageError>;

    /// Iff Active: append to the trail and overwrite the live projection.
    fn append_trail(&self, id: EscortSessionId, fix: LocationFix) -> Result<bool, StorageError>;

    /// Iff Active: set Ended, stamp `ended_at`/`purge_at`, drop the live
    /// projection. Returns the ended record, or `None` if it was not Active.
    fn end(
        &self,
        id: EscortSessionId,
        ended_at: DateTime<Utc>,
        purge_at: DateTime<Utc>,
    ) -> Result<Option<EscortSession>, StorageError>;

    /// All sessions of a subject, oldest first.
    fn find_by_subject(&self, subject: SubjectId) -> Result<Vec<EscortSession>, StorageError>;

    /// Ended sessions whose `purge_at` is at or before `now`.
    fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<EscortSessionId>, StorageError>;

    /// Delete the session iff it is Ended and `purge_at <= now`.
    /// Returns the removed record.
    fn purge_if_expired(&self, id: EscortSessionId, now: DateTime<Utc>) -> Result<Option<EscortSession>, StorageError>;
}

/// Incident reports. Immutable apart from the one-shot upload flag.
pub trait IncidentReportStore: Send + Sync {
    /// Insert a new report. Returns error if the id already exists.
    fn insert(&self, report: IncidentReport) -> Result<(), StorageError>;

    /// Get a report by id.
    fn get(&self, id: ReportId) -> Result<Option<IncidentReport>, StorageError>;

    /// Set `uploaded` and replace the media reference, iff owned by `owner` and not yet uploaded.
    fn mark_uploaded(&self, id: ReportId, owner: SubjectId, media_url: &str) -> Result<UploadMark, StorageError>;

    /// A subject's reports, newest first, at most `limit`.
    fn find_by_subject(&self, subject: SubjectId, limit: usize) -> Result<Vec<IncidentReport>, StorageError>;

    /// Reports located inside `catchment`, newest first.
    fn find_within(&self, catchment: &Catchment) -> Result<Vec<IncidentReport>, StorageError>;
}
