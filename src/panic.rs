//! Panic events: `Active -> Deactivated`.
//!
//! A subject holds at most one Active panic event. Activation claims the
//! subject's panic slot in the [`SubjectRegistry`], persists the event with a
//! one-point trail and dispatches it to covering responders. Deactivation only
//! changes state; the trail is kept.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dispatch::{DispatchEvent, DispatchOutcome, EventDispatcher, EventKind};
use crate::error::{SafeguardError, SafeguardResult};
use crate::geo::{Catchment, GeoPoint, LocationFix};
use crate::ids::{PanicEventId, SubjectId};
use crate::registry::{OccurrenceKind, SubjectRegistry};
use crate::storage::PanicEventStore;

/// Emergency category chosen at activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyCategory {
    Violence,
    Robbery,
    Kidnapping,
    BreakIn,
    Harassment,
    Medical,
    Fire,
    Accident,
    /// Catch-all when no category was given.
    #[default]
    Other,
}

impl EmergencyCategory {
    /// Human-readable label. Presentation only.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Violence => "Violence / Assault",
            Self::Robbery => "Robbery",
            Self::Kidnapping => "Kidnapping",
            Self::BreakIn => "Break-in",
            Self::Harassment => "Harassment",
            Self::Medical => "Medical Emergency",
            Self::Fire => "Fire",
            Self::Accident => "Accident",
            Self::Other => "Other Emergency",
        }
    }

    /// Stable wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Violence => "violence",
            Self::Robbery => "robbery",
            Self::Kidnapping => "kidnapping",
            Self::BreakIn => "break_in",
            Self::Harassment => "harassment",
            Self::Medical => "medical",
            Self::Fire => "fire",
            Self::Accident => "accident",
            Self::Other => "other",
        }
    }

    /// Lenient parse: unknown or empty input maps to [`Self::Other`].
    #[must_use]
    pub fn parse_lenient(raw: &str) -> Self {
        raw.parse().unwrap_or_default()
    }
}

impl FromStr for EmergencyCategory {
    type Err = crate::error::ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Ok(match normalized.as_str() {
            "violence" | "assault" => Self::Violence,
            "robbery" => Self::Robbery,
            "kidnapping" => Self::Kidnapping,
            "break_in" | "breakin" | "burglary" => Self::BreakIn,
            "harassment" => Self::Harassment,
            "medical" => Self::Medical,
            "fire" => Self::Fire,
            "accident" => Self::Accident,
            "other" => Self::Other,
            _ => {
                return Err(crate::error::ValidationError::UnknownVariant {
                    field: "emergency_category",
                    value: s.to_string(),
                })
            }
        })
    }
}

impl fmt::Display for EmergencyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Panic event state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanicState {
    Active,
    Deactivated,
}

/// A panic activation and its location trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanicEvent {
    pub id: PanicEventId,
    pub subject: SubjectId,
    pub category: EmergencyCategory,
    pub state: PanicState,
    /// Append-only; the first entry is the activation point.
    pub trail: Vec<LocationFix>,
    pub activated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl PanicEvent {
    fn activate(subject: SubjectId, origin: LocationFix, category: EmergencyCategory) -> Self {
        Self {
            id: PanicEventId::new(),
            subject,
            category,
            state: PanicState::Active,
            trail: vec![origin],
            activated_at: Utc::now(),
            deactivated_at: None,
        }
    }

    /// Activation location.
    #[must_use]
    pub fn origin(&self) -> Option<&LocationFix> {
        self.trail.first()
    }

    /// Most recent trail entry.
    #[must_use]
    pub fn latest(&self) -> Option<&LocationFix> {
        self.trail.last()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == PanicState::Active
    }
}

/// Result of a successful activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanicActivation {
    pub event_id: PanicEventId,
    pub dispatch: DispatchOutcome,
}

/// Responder-facing view of an active panic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyPanic {
    pub event_id: PanicEventId,
    pub subject: SubjectId,
    pub category: EmergencyCategory,
    pub category_label: String,
    pub activated_at: DateTime<Utc>,
    pub origin: LocationFix,
    pub latest: LocationFix,
    pub trail_len: usize,
    pub distance_km: f64,
}

/// Owns the panic event state machine.
#[derive(Clone)]
pub struct PanicEventMachine {
    events: Arc<dyn PanicEventStore>,
    registry: SubjectRegistry,
    dispatcher: EventDispatcher,
}

impl PanicEventMachine {
    #[must_use]
    pub fn new(events: Arc<dyn PanicEventStore>, registry: SubjectRegistry, dispatcher: EventDispatcher) -> Self {
        Self {
            events,
            registry,
            dispatcher,
        }
    }

    /// Activate a panic for `subject` at `origin`.
    ///
    /// # Errors
    ///
    /// `Validation` for a malformed fix, `Conflict` if the subject already has
    /// an Active panic, `Storage` if the event could not be persisted. Dispatch
    /// failures are reported in the returned outcome, never as an error.
    pub fn activate(
        &self,
        subject: SubjectId,
        origin: LocationFix,
        category: Option<EmergencyCategory>,
    ) -> SafeguardResult<PanicActivation> {
        origin.validate()?;
        let location = origin.point;
        let event = PanicEvent::activate(subject, origin, category.unwrap_or_default());
        let event_id = event.id;

        self.registry
            .claim(subject, OccurrenceKind::Panic, *event_id.as_uuid())?;

        if let Err(e) = self.events.insert(event.clone()) {
            // Undo the claim so no partial state survives.
            if let Err(release_err) = self.registry.release(subject, OccurrenceKind::Panic, *event_id.as_uuid()) {
                tracing::error!(
                    subject = %subject,
                    event_id = %event_id,
                    error = %release_err,
                    "failed to release panic slot after insert failure"
                );
            }
            return Err(e.into());
        }

        tracing::info!(
            subject = %subject,
            event_id = %event_id,
            category = %event.category,
            "panic activated"
        );

        let dispatch = self.dispatcher.dispatch(&dispatch_event(&event, location));
        Ok(PanicActivation { event_id, dispatch })
    }

    /// Append a trail point to the subject's Active panic. Never re-dispatches.
    ///
    /// # Errors
    ///
    /// `NotFound` if there is no Active panic for `subject`.
    pub fn append_location(&self, subject: SubjectId, fix: LocationFix) -> SafeguardResult<()> {
        fix.validate()?;
        let event_id = PanicEventId::from_uuid(self.registry.require_current(subject, OccurrenceKind::Panic)?);
        if !self.events.append_trail(event_id, fix)? {
            return Err(SafeguardError::no_active(subject, OccurrenceKind::Panic));
        }
        tracing::trace!(subject = %subject, event_id = %event_id, "panic trail appended");
        Ok(())
    }

    /// Deactivate the subject's Active panic.
    ///
    /// # Errors
    ///
    /// `NotFound` if there is no Active panic, including when it was already
    /// deactivated.
    pub fn deactivate(&self, subject: SubjectId) -> SafeguardResult<PanicEventId> {
        let event_id = PanicEventId::from_uuid(self.registry.require_current(subject, OccurrenceKind::Panic)?);

        // Only one concurrent caller can win the conditional transition.
        if !self.events.deactivate(event_id, Utc::now())? {
            return Err(SafeguardError::no_active(subject, OccurrenceKind::Panic));
        }
        if !self
            .registry
            .release(subject, OccurrenceKind::Panic, *event_id.as_uuid())?
        {
            tracing::warn!(subject = %subject, event_id = %event_id, "panic slot already released");
        }

        tracing::info!(subject = %subject, event_id = %event_id, "panic deactivated");
        Ok(event_id)
    }

    /// The subject's Active panic, if any.
    ///
    /// # Errors
    ///
    /// `Storage` on backend failure.
    pub fn active(&self, subject: SubjectId) -> SafeguardResult<Option<PanicEvent>> {
        let Some(id) = self.registry.current(subject, OccurrenceKind::Panic)? else {
            return Ok(None);
        };
        Ok(self
            .events
            .get(PanicEventId::from_uuid(id))?
            .filter(PanicEvent::is_active))
    }

    /// Every panic event of `subject`, oldest first.
    ///
    /// # Errors
    ///
    /// `Storage` on backend failure.
    pub fn history(&self, subject: SubjectId) -> SafeguardResult<Vec<PanicEvent>> {
        Ok(self.events.find_by_subject(subject)?)
    }

    /// Active panics whose latest position lies in `catchment`, nearest first.
    ///
    /// # Errors
    ///
    /// `Storage` on backend failure.
    pub fn nearby(&self, catchment: &Catchment) -> SafeguardResult<Vec<NearbyPanic>> {
        let mut out: Vec<NearbyPanic> = self
            .events
            .find_active_within(catchment)?
            .into_iter()
            .filter_map(|event| {
                let origin = event.origin()?.clone();
                let latest = event.latest()?.clone();
                Some(NearbyPanic {
                    event_id: event.id,
                    subject: event.subject,
                    category: event.category,
                    category_label: event.category.label().to_string(),
                    activated_at: event.activated_at,
                    distance_km: catchment.center.distance_km(&latest.point),
                    origin,
                    latest,
                    trail_len: event.trail.len(),
                })
            })
            .collect();
        out.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        Ok(out)
    }
}

fn dispatch_event(event: &PanicEvent, location: GeoPoint) -> DispatchEvent {
    DispatchEvent {
        event_id: *event.id.as_uuid(),
        kind: EventKind::Panic,
        location,
        title: "Panic alert nearby".to_string(),
        body: format!("{} reported at {location}", event.category.label()),
        payload: serde_json::json!({
            "category": event.category.as_str(),
            "category_label": event.category.label(),
            "subject_id": event.subject.to_string(),
            "activated_at": event.activated_at.to_rfc3339(),
        }),
    }
}
