//! In-memory storage backend.
//!
//! This module provides thread-safe in-memory implementations of the storage traits.
//! It is intended for embedded usage, tests, and as a reference implementation.
//! Every conditional method holds the write lock for its whole check-and-set,
//! which gives the atomicity the traits require.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::escort::{EscortSession, EscortState};
use crate::geo::{Catchment, GeoPoint, LocationFix};
use crate::geo_index::ResponderTeam;
use crate::ids::{EscortSessionId, PanicEventId, ReportId, ResponderId, SubjectId};
use crate::panic::{PanicEvent, PanicState};
use crate::registry::ActiveKey;
use crate::reports::IncidentReport;
use crate::storage::traits::{
    ActiveSlotStore, EscortSessionStore, IncidentReportStore, PanicEventStore, ResponderStore,
    StorageError, UploadMark,
};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Thread-safe in-memory responder store.
#[derive(Debug, Default)]
pub struct InMemoryResponderStore {
    by_id: RwLock<HashMap<ResponderId, ResponderTeam>>,
}

impl InMemoryResponderStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResponderStore for InMemoryResponderStore {
    fn upsert(&self, team: ResponderTeam) -> Result<(), StorageError> {
        let mut by_id = self
            .by_id
            .write()
            .map_err(|_| lock_err("responder.upsert"))?;
        by_id.insert(team.responder, team);
        Ok(())
    }

    fn get(&self, responder: ResponderId) -> Result<Option<ResponderTeam>, StorageError> {
        let by_id = self.by_id.read().map_err(|_| lock_err("responder.get"))?;
        Ok(by_id.get(&responder).cloned())
    }

    fn find_covering(&self, point: &GeoPoint, max_radius_km: f64) -> Result<Vec<ResponderTeam>, StorageError> {
        let by_id = self
            .by_id
            .read()
            .map_err(|_| lock_err("responder.find_covering"))?;
        Ok(by_id
            .values()
            .filter(|t| t.catchment.center.distance_km(point) <= max_radius_km)
            .filter(|t| t.catchment.covers(point))
            .cloned()
            .collect())
    }
}

/// Thread-safe in-memory slot table.
///
/// A single mutex guards the whole table.
#[derive(Debug, Default)]
pub struct InMemoryActiveSlotStore {
    slots: Mutex<HashMap<ActiveKey, Uuid>>,
}

impl InMemoryActiveSlotStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ActiveSlotStore for InMemoryActiveSlotStore {
    fn try_claim(&self, key: ActiveKey, occurrence: Uuid) -> Result<bool, StorageError> {
        let mut slots = self.slots.lock().map_err(|_| lock_err("slot.try_claim"))?;
        if slots.contains_key(&key) {
            return Ok(false);
        }
        slots.insert(key, occurrence);
        Ok(true)
    }

    fn holder(&self, key: ActiveKey) -> Result<Option<Uuid>, StorageError> {
        let slots = self.slots.lock().map_err(|_| lock_err("slot.holder"))?;
        Ok(slots.get(&key).copied())
    }

    fn release(&self, key: ActiveKey, occurrence: Uuid) -> Result<bool, StorageError> {
        let mut slots = self.slots.lock().map_err(|_| lock_err("slot.release"))?;
        if slots.get(&key) == Some(&occurrence) {
            slots.remove(&key);
            return Ok(true);
        }
        Ok(false)
    }
}

#[derive(Debug, Default)]
struct PanicTable {
    by_id: HashMap<PanicEventId, PanicEvent>,
    by_subject: HashMap<SubjectId, Vec<PanicEventId>>,
}

/// Thread-safe in-memory panic event store.
#[derive(Debug, Default)]
pub struct InMemoryPanicEventStore {
    state: RwLock<PanicTable>,
}

impl InMemoryPanicEventStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PanicEventStore for InMemoryPanicEventStore {
    fn insert(&self, event: PanicEvent) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("panic.insert"))?;
        if state.by_id.contains_key(&event.id) {
            return Err(StorageError::DuplicateKey(event.id.to_string()));
        }
        state.by_subject.entry(event.subject).or_default().push(event.id);
        state.by_id.insert(event.id, event);
        Ok(())
    }

    fn get(&self, id: PanicEventId) -> Result<Option<PanicEvent>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("panic.get"))?;
        Ok(state.by_id.get(&id).cloned())
    }

    fn append_trail(&self, id: PanicEventId, fix: LocationFix) -> Result<bool, StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("panic.append_trail"))?;
        match state.by_id.get_mut(&id) {
            Some(event) if event.state == PanicState::Active => {
                event.trail.push(fix);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn deactivate(&self, id: PanicEventId, at: DateTime<Utc>) -> Result<bool, StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("panic.deactivate"))?;
        match state.by_id.get_mut(&id) {
            Some(event) if event.state == PanicState::Active => {
                event.state = PanicState::Deactivated;
                event.deactivated_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn find_by_subject(&self, subject: SubjectId) -> Result<Vec<PanicEvent>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("panic.find_by_subject"))?;
        let Some(ids) = state.by_subject.get(&subject) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| state.by_id.get(id).cloned())
            .collect())
    }

    fn find_active_within(&self, catchment: &Catchment) -> Result<Vec<PanicEvent>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("panic.find_active_within"))?;
        Ok(state
            .by_id
            .values()
            .filter(|e| e.state == PanicState::Active)
            .filter(|e| e.latest().is_some_and(|fix| catchment.covers(&fix.point)))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
struct EscortTable {
    by_id: HashMap<EscortSessionId, EscortSession>,
    by_subject: HashMap<SubjectId, Vec<EscortSessionId>>,
}

/// Thread-safe in-memory escort session store.
#[derive(Debug, Default)]
pub struct InMemoryEscortSessionStore {
    state: RwLock<EscortTable>,
}

impl InMemoryEscortSessionStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EscortSessionStore for InMemoryEscortSessionStore {
    fn insert(&self, session: EscortSession) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("escort.insert"))?;
        if state.by_id.contains_key(&session.id) {
            return Err(StorageError::DuplicateKey(session.id.to_string()));
        }
        state
            .by_subject
            .entry(session.subject)
            .or_default()
            .push(session.id);
        state.by_id.insert(session.id, session);
        Ok(())
    }

    fn get(&self, id: EscortSessionId) -> Result<Option<EscortSession>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("escort.get"))?;
        Ok(state.by_id.get(&id).cloned())
    }

    fn append_trail(&self, id: EscortSessionId, fix: LocationFix) -> Result<bool, StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("escort.append_trail"))?;
        match state.by_id.get_mut(&id) {
            Some(session) if session.state == EscortState::Active => {
                session.live = Some(fix.clone());
                session.trail.push(fix);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn end(
        &self,
        id: EscortSessionId,
        ended_at: DateTime<Utc>,
        purge_at: DateTime<Utc>,
    ) -> Result<Option<EscortSession>, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("escort.end"))?;
        match state.by_id.get_mut(&id) {
            Some(session) if session.state == EscortState::Active => {
                session.state = EscortState::Ended;
                session.live = None;
                session.ended_at = Some(ended_at);
                session.purge_at = Some(purge_at);
                Ok(Some(session.clone()))
            }
            _ => Ok(None),
        }
    }

    fn find_by_subject(&self, subject: SubjectId) -> Result<Vec<EscortSession>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("escort.find_by_subject"))?;
        let Some(ids) = state.by_subject.get(&subject) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| state.by_id.get(id).cloned())
            .collect())
    }

    fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<EscortSessionId>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("escort.find_expired"))?;
        Ok(state
            .by_id
            .values()
            .filter(|s| s.is_expired(now))
            .map(|s| s.id)
            .collect())
    }

    fn purge_if_expired(&self, id: EscortSessionId, now: DateTime<Utc>) -> Result<Option<EscortSession>, StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("escort.purge_if_expired"))?;
        if !state.by_id.get(&id).is_some_and(|s| s.is_expired(now)) {
            return Ok(None);
        }
        let Some(removed) = state.by_id.remove(&id) else {
            return Ok(None);
        };
        if let Some(ids) = state.by_subject.get_mut(&removed.subject) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                state.by_subject.remove(&removed.subject);
            }
        }
        Ok(Some(removed))
    }
}

#[derive(Debug, Default)]
struct ReportTable {
    by_id: HashMap<ReportId, IncidentReport>,
    by_subject: HashMap<SubjectId, Vec<ReportId>>,
}

/// Thread-safe in-memory incident report store.
#[derive(Debug, Default)]
pub struct InMemoryIncidentReportStore {
    state: RwLock<ReportTable>,
}

impl InMemoryIncidentReportStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(reports: &mut [IncidentReport]) {
    reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

impl IncidentReportStore for InMemoryIncidentReportStore {
    fn insert(&self, report: IncidentReport) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("report.insert"))?;
        if state.by_id.contains_key(&report.id) {
            return Err(StorageError::DuplicateKey(report.id.to_string()));
        }
        state
            .by_subject
            .entry(report.subject)
            .or_default()
            .push(report.id);
        state.by_id.insert(report.id, report);
        Ok(())
    }

    fn get(&self, id: ReportId) -> Result<Option<IncidentReport>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("report.get"))?;
        Ok(state.by_id.get(&id).cloned())
    }

    fn mark_uploaded(&self, id: ReportId, owner: SubjectId, media_url: &str) -> Result<UploadMark, StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("report.mark_uploaded"))?;
        match state.by_id.get_mut(&id) {
            Some(report) if report.subject == owner => {
                if report.uploaded {
                    return Ok(UploadMark::AlreadyUploaded);
                }
                report.uploaded = true;
                report.media_url = media_url.to_string();
                Ok(UploadMark::Marked)
            }
            _ => Ok(UploadMark::NotFound),
        }
    }

    fn find_by_subject(&self, subject: SubjectId, limit: usize) -> Result<Vec<IncidentReport>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("report.find_by_subject"))?;
        let Some(ids) = state.by_subject.get(&subject) else {
            return Ok(Vec::new());
        };
        // Insertion order reversed keeps equal timestamps newest-first after the stable sort.
        let mut out: Vec<IncidentReport> = ids
            .iter()
            .rev()
            .filter_map(|id| state.by_id.get(id).cloned())
            .collect();
        newest_first(&mut out);
        out.truncate(limit);
        Ok(out)
    }

    fn find_within(&self, catchment: &Catchment) -> Result<Vec<IncidentReport>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("report.find_within"))?;
        let mut out: Vec<IncidentReport> = state
            .by_id
            .values()
            .filter(|r| catchment.covers(&r.location))
            .cloned()
            .collect();
        newest_first(&mut out);
        Ok(out)
    }
}

/// Convenience bundle of in-memory stores.
#[derive(Debug, Default)]
pub struct InMemoryStores {
    /// Responder catchments.
    pub responders: InMemoryResponderStore,
    /// Active-occurrence slots.
    pub slots: InMemoryActiveSlotStore,
    /// Panic events.
    pub panics: InMemoryPanicEventStore,
    /// Escort sessions.
    pub escorts: InMemoryEscortSessionStore,
    /// Incident reports.
    pub reports: InMemoryIncidentReportStore,
}

impl InMemoryStores {
    /// Create a new bundle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
