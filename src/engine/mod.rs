//! Execution engine.
//!
//! `SafeguardEngine` wires the components together over explicitly passed
//! storage handles and applies [`Operation`]s on behalf of a [`Principal`].
//! Capability checks always run before any component is touched.

/// Routed runtime isolating urgent work from queries.
pub mod runtime;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::auth::{authorize, authorize_subject_read, Capability, Principal};
use crate::config::SafeguardConfig;
use crate::dispatch::{EventDispatcher, NotificationGateway};
use crate::error::SafeguardResult;
use crate::escort::{EscortSession, EscortSessionMachine};
use crate::geo::LocationFix;
use crate::geo_index::{GeoIndex, ResponderTeam};
use crate::ids::{EscortSessionId, PanicEventId, SubjectId};
use crate::ir::{Operation, SafeguardIR};
use crate::panic::{EmergencyCategory, NearbyPanic, PanicActivation, PanicEvent, PanicEventMachine};
use crate::reaper::RetentionReaper;
use crate::registry::SubjectRegistry;
use crate::reports::{IncidentReport, NearbyReport, ReportCreated, ReportStore};
use crate::storage::{
    ActiveSlotStore, EscortSessionStore, InMemoryStores, IncidentReportStore, PanicEventStore,
    ResponderStore,
};

/// Storage handles the engine is built from.
#[derive(Clone)]
pub struct EngineStores {
    pub responders: Arc<dyn ResponderStore>,
    pub slots: Arc<dyn ActiveSlotStore>,
    pub panics: Arc<dyn PanicEventStore>,
    pub escorts: Arc<dyn EscortSessionStore>,
    pub reports: Arc<dyn IncidentReportStore>,
}

impl From<InMemoryStores> for EngineStores {
    fn from(stores: InMemoryStores) -> Self {
        Self {
            responders: Arc::new(stores.responders),
            slots: Arc::new(stores.slots),
            panics: Arc::new(stores.panics),
            escorts: Arc::new(stores.escorts),
            reports: Arc::new(stores.reports),
        }
    }
}

/// Past panics and escort sessions of one subject.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectHistory {
    pub subject: SubjectId,
    pub panics: Vec<PanicEvent>,
    pub escorts: Vec<EscortSession>,
}

/// Result of executing an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum EngineResponse {
    /// Acknowledgement with no body.
    Ack,
    PanicActivated(PanicActivation),
    PanicDeactivated {
        event_id: PanicEventId,
    },
    EscortStarted {
        session_id: EscortSessionId,
    },
    EscortStopped(EscortSession),
    ReportCreated(ReportCreated),
    Reports(Vec<IncidentReport>),
    NearbyReports(Vec<NearbyReport>),
    NearbyPanics(Vec<NearbyPanic>),
    History(SubjectHistory),
    /// `None` when the subject has no Active escort.
    LiveLocation(Option<LocationFix>),
    Catchment(ResponderTeam),
}

/// The core facade.
#[derive(Clone)]
pub struct SafeguardEngine {
    geo: GeoIndex,
    dispatcher: EventDispatcher,
    panics: PanicEventMachine,
    escorts: EscortSessionMachine,
    reports: ReportStore,
    escort_store: Arc<dyn EscortSessionStore>,
    config: SafeguardConfig,
}

impl SafeguardEngine {
    /// Wire an engine over `stores`.
    #[must_use]
    pub fn new(stores: EngineStores, gateway: Arc<dyn NotificationGateway>, config: SafeguardConfig) -> Self {
        let geo = GeoIndex::new(stores.responders, &config);
        let dispatcher = EventDispatcher::new(geo.clone(), gateway, &config);
        let registry = SubjectRegistry::new(stores.slots);
        let panics = PanicEventMachine::new(stores.panics, registry.clone(), dispatcher.clone());
        let escorts = EscortSessionMachine::new(Arc::clone(&stores.escorts), registry, &config);
        let reports = ReportStore::new(stores.reports, dispatcher.clone());
        Self {
            geo,
            dispatcher,
            panics,
            escorts,
            reports,
            escort_store: stores.escorts,
            config,
        }
    }

    /// An engine over fresh in-memory stores.
    #[must_use]
    pub fn in_memory(gateway: Arc<dyn NotificationGateway>, config: SafeguardConfig) -> Self {
        Self::new(InMemoryStores::new().into(), gateway, config)
    }

    #[must_use]
    pub const fn config(&self) -> &SafeguardConfig {
        &self.config
    }

    #[must_use]
    pub const fn geo(&self) -> &GeoIndex {
        &self.geo
    }

    #[must_use]
    pub const fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub const fn panics(&self) -> &PanicEventMachine {
        &self.panics
    }

    #[must_use]
    pub const fn escorts(&self) -> &EscortSessionMachine {
        &self.escorts
    }

    #[must_use]
    pub const fn reports(&self) -> &ReportStore {
        &self.reports
    }

    /// A reaper over this engine's escort store.
    #[must_use]
    pub fn reaper(&self) -> RetentionReaper {
        RetentionReaper::new(Arc::clone(&self.escort_store))
    }

    /// Validate and execute a request envelope.
    ///
    /// # Errors
    ///
    /// `Validation` for a malformed envelope, otherwise as [`Self::execute`].
    pub fn execute_ir(&self, principal: &Principal, ir: SafeguardIR) -> SafeguardResult<EngineResponse> {
        ir.validate()?;
        let span = tracing::debug_span!("request", request_id = %ir.request_id, op = ir.operation.name());
        let _guard = span.enter();
        self.execute(principal, ir.operation)
    }

    /// Execute `op` on behalf of `principal`.
    ///
    /// # Errors
    ///
    /// `Permission` if the principal may not run `op`; otherwise whatever the
    /// target component reports.
    pub fn execute(&self, principal: &Principal, op: Operation) -> SafeguardResult<EngineResponse> {
        let result = self.apply(principal, op);
        if let Err(e) = &result {
            tracing::debug!(principal = %principal.id, role = %principal.role, error = %e, "operation rejected");
        }
        result
    }

    fn apply(&self, principal: &Principal, op: Operation) -> SafeguardResult<EngineResponse> {
        match op {
            Operation::ActivatePanic(payload) => {
                authorize(principal, Capability::ActivatePanic)?;
                let fix = payload.location.to_fix()?;
                let category = payload.category.as_deref().map(EmergencyCategory::parse_lenient);
                let activation = self.panics.activate(principal.subject_id(), fix, category)?;
                Ok(EngineResponse::PanicActivated(activation))
            }
            Operation::LogPanicLocation(payload) => {
                authorize(principal, Capability::LogPanicLocation)?;
                self.panics
                    .append_location(principal.subject_id(), payload.to_fix()?)?;
                Ok(EngineResponse::Ack)
            }
            Operation::DeactivatePanic => {
                authorize(principal, Capability::DeactivatePanic)?;
                let event_id = self.panics.deactivate(principal.subject_id())?;
                Ok(EngineResponse::PanicDeactivated { event_id })
            }
            Operation::StartEscort(payload) => {
                authorize(principal, Capability::StartEscort)?;
                let session_id = self.escorts.start(principal.subject_id(), payload.to_fix()?)?;
                Ok(EngineResponse::EscortStarted { session_id })
            }
            Operation::LogEscortLocation(payload) => {
                authorize(principal, Capability::LogEscortLocation)?;
                self.escorts
                    .log_location(principal.subject_id(), payload.to_fix()?)?;
                Ok(EngineResponse::Ack)
            }
            Operation::StopEscort => {
                authorize(principal, Capability::StopEscort)?;
                Ok(EngineResponse::EscortStopped(self.escorts.stop(principal.subject_id())?))
            }
            Operation::CreateReport(input) => {
                authorize(principal, Capability::CreateReport)?;
                Ok(EngineResponse::ReportCreated(
                    self.reports.create(principal.subject_id(), input)?,
                ))
            }
            Operation::MarkReportUploaded(payload) => {
                authorize(principal, Capability::MarkReportUploaded)?;
                self.reports
                    .mark_uploaded(principal.subject_id(), payload.report_id, &payload.media_url)?;
                Ok(EngineResponse::Ack)
            }
            Operation::MyReports => {
                authorize(principal, Capability::ListOwnReports)?;
                Ok(EngineResponse::Reports(
                    self.reports.reports_for_subject(principal.subject_id())?,
                ))
            }
            Operation::NearbyReports => {
                authorize(principal, Capability::NearbyReports)?;
                let team = self.geo.responder(principal.responder_id())?;
                Ok(EngineResponse::NearbyReports(self.reports.nearby(&team.catchment)?))
            }
            Operation::NearbyPanics => {
                authorize(principal, Capability::NearbyPanics)?;
                let team = self.geo.responder(principal.responder_id())?;
                Ok(EngineResponse::NearbyPanics(self.panics.nearby(&team.catchment)?))
            }
            Operation::SubjectHistory(target) => {
                let subject = target.subject_id.unwrap_or_else(|| principal.subject_id());
                authorize_subject_read(principal, subject)?;
                Ok(EngineResponse::History(SubjectHistory {
                    subject,
                    panics: self.panics.history(subject)?,
                    escorts: self.escorts.history(subject)?,
                }))
            }
            Operation::LiveLocation(target) => {
                let subject = target.subject_id.unwrap_or_else(|| principal.subject_id());
                authorize_subject_read(principal, subject)?;
                Ok(EngineResponse::LiveLocation(self.escorts.live_location(subject)?))
            }
            Operation::SetCatchment(payload) => {
                authorize(principal, Capability::SetCatchment)?;
                let team = self.geo.set_responder_location(
                    principal.responder_id(),
                    payload.latitude,
                    payload.longitude,
                    payload.radius_km,
                )?;
                Ok(EngineResponse::Catchment(team))
            }
            Operation::ViewCatchment => {
                authorize(principal, Capability::ViewCatchment)?;
                Ok(EngineResponse::Catchment(self.geo.responder(principal.responder_id())?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Entitlement;
    use crate::dispatch::RecordingGateway;
    use crate::ids::ResponderId;
    use crate::ir::{ActivatePanicPayload, LocationPayload, SetCatchmentPayload, SubjectPayload};
    use crate::reports::{NewReport, ReportKind};

    fn engine() -> (SafeguardEngine, Arc<RecordingGateway>) {
        let gateway = Arc::new(RecordingGateway::new());
        let engine = SafeguardEngine::in_memory(gateway.clone(), SafeguardConfig::default());
        (engine, gateway)
    }

    fn activate(lat: f64, lon: f64, category: Option<&str>) -> Operation {
        Operation::ActivatePanic(ActivatePanicPayload {
            location: LocationPayload::new(lat, lon),
            category: category.map(str::to_string),
        })
    }

    fn set_catchment(lat: f64, lon: f64, radius_km: f64) -> Operation {
        Operation::SetCatchment(SetCatchmentPayload {
            latitude: lat,
            longitude: lon,
            radius_km,
        })
    }

    #[test]
    fn panic_reaches_covering_responder() {
        let (engine, gateway) = engine();
        let responder = Principal::responder(ResponderId::new());
        let civil = Principal::civil(SubjectId::new());

        engine.execute(&responder, set_catchment(6.5, 3.38, 10.0)).unwrap();
        let EngineResponse::PanicActivated(activation) = engine
            .execute(&civil, activate(6.5244, 3.3792, Some("Robbery")))
            .unwrap()
        else {
            panic!("expected PanicActivated");
        };
        assert_eq!(activation.dispatch.notified, 1);
        assert_eq!(gateway.sent()[0].notification.data["category"], "robbery");

        let EngineResponse::NearbyPanics(nearby) = engine.execute(&responder, Operation::NearbyPanics).unwrap() else {
            panic!("expected NearbyPanics");
        };
        assert_eq!(nearby.len(), 1);
        assert_eq!(nearby[0].category, EmergencyCategory::Robbery);
    }

    #[test]
    fn unknown_category_falls_back_to_other() {
        let (engine, _gateway) = engine();
        let subject = SubjectId::new();
        engine
            .execute(&Principal::civil(subject), activate(1.0, 1.0, Some("meteor")))
            .unwrap();
        let active = engine.panics().active(subject).unwrap().unwrap();
        assert_eq!(active.category, EmergencyCategory::Other);
    }

    #[test]
    fn permissions_are_checked_before_state_changes() {
        let (engine, gateway) = engine();
        let responder = Principal::responder(ResponderId::new());
        let civil = Principal::civil(SubjectId::new());

        let err = engine.execute(&responder, activate(1.0, 1.0, None)).unwrap_err();
        assert!(err.is_permission());
        let err = engine.execute(&civil, Operation::NearbyPanics).unwrap_err();
        assert!(err.is_permission());
        let err = engine.execute(&civil, set_catchment(1.0, 1.0, 5.0)).unwrap_err();
        assert!(err.is_permission());
        assert_eq!(gateway.calls(), 0);
    }

    #[test]
    fn escort_requires_entitlement() {
        let (engine, _gateway) = engine();
        let subject = SubjectId::new();
        let plain = Principal::civil(subject);
        let entitled = Principal::civil(subject).with_entitlement(Entitlement::Escort);
        let start = Operation::StartEscort(LocationPayload::new(1.0, 1.0));

        assert!(engine.execute(&plain, start.clone()).unwrap_err().is_permission());
        assert!(engine.escorts().history(subject).unwrap().is_empty());

        engine.execute(&entitled, start).unwrap();
        // Stopping does not need the entitlement.
        engine.execute(&plain, Operation::StopEscort).unwrap();
    }

    #[test]
    fn history_is_readable_by_self_and_responders_only() {
        let (engine, _gateway) = engine();
        let owner = SubjectId::new();
        engine
            .execute(&Principal::civil(owner), activate(1.0, 1.0, None))
            .unwrap();

        let target = SubjectPayload { subject_id: Some(owner) };
        let EngineResponse::History(own) = engine
            .execute(&Principal::civil(owner), Operation::SubjectHistory(SubjectPayload::default()))
            .unwrap()
        else {
            panic!("expected History");
        };
        assert_eq!(own.panics.len(), 1);

        let other = Principal::civil(SubjectId::new());
        assert!(engine
            .execute(&other, Operation::SubjectHistory(target.clone()))
            .unwrap_err()
            .is_permission());

        let responder = Principal::responder(ResponderId::new());
        assert!(engine.execute(&responder, Operation::SubjectHistory(target)).is_ok());
    }

    #[test]
    fn nearby_without_catchment_is_not_found() {
        let (engine, _gateway) = engine();
        let responder = Principal::responder(ResponderId::new());
        assert!(engine
            .execute(&responder, Operation::NearbyReports)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn report_flow_through_engine() {
        let (engine, _gateway) = engine();
        let owner = Principal::civil(SubjectId::new());
        let EngineResponse::ReportCreated(created) = engine
            .execute(
                &owner,
                Operation::CreateReport(NewReport::new(ReportKind::Audio, 1.0, 1.0, "blob://a")),
            )
            .unwrap()
        else {
            panic!("expected ReportCreated");
        };
        assert_eq!(created.dispatch.matched, 0);

        let EngineResponse::Reports(mine) = engine.execute(&owner, Operation::MyReports).unwrap() else {
            panic!("expected Reports");
        };
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, created.report_id);
    }

    #[test]
    fn execute_ir_validates_envelope() {
        let (engine, _gateway) = engine();
        let mut ir = SafeguardIR::new(Operation::StopEscort);
        ir.version = "2.0".to_string();
        let err = engine
            .execute_ir(&Principal::civil(SubjectId::new()), ir)
            .unwrap_err();
        assert!(err.is_validation());
    }
}
