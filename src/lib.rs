//! # SafeGuard core
//!
//! Geospatial event matching and session lifecycle engine behind a personal
//! emergency-response service. Civil users raise panic events, run escort
//! sessions and file incident reports; responder teams register a catchment
//! and are notified of every event that falls inside it.
//!
//! ## Core Concepts
//!
//! - **Catchment**: a responder's centre and radius; an event is dispatched to
//!   a responder iff it lies inside the responder's own catchment
//! - **Panic event**: `Active -> Deactivated`, at most one Active per subject
//! - **Escort session**: `Active -> Ended -> Purged`, with a live-location
//!   projection that disappears the moment the session ends
//! - **Incident report**: immutable media report, dispatched once at creation
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use safeguard::{
//!     ActivatePanicPayload, EngineResponse, LocationPayload, Operation, Principal,
//!     RecordingGateway, ResponderId, SafeguardConfig, SafeguardEngine, SetCatchmentPayload,
//!     SubjectId,
//! };
//!
//! let gateway = Arc::new(RecordingGateway::new());
//! let engine = SafeguardEngine::in_memory(gateway.clone(), SafeguardConfig::default());
//!
//! let team = Principal::responder(ResponderId::new());
//! engine.execute(&team, Operation::SetCatchment(SetCatchmentPayload {
//!     latitude: 6.5,
//!     longitude: 3.38,
//!     radius_km: 10.0,
//! }))?;
//!
//! let civil = Principal::civil(SubjectId::new());
//! let response = engine.execute(&civil, Operation::ActivatePanic(ActivatePanicPayload {
//!     location: LocationPayload::new(6.5244, 3.3792),
//!     category: Some("robbery".to_string()),
//! }))?;
//!
//! let EngineResponse::PanicActivated(activation) = response else { unreachable!() };
//! assert_eq!(activation.dispatch.notified, 1);
//! # Ok::<(), safeguard::SafeguardError>(())
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod auth;
pub mod config;
pub mod error;
pub mod geo;
pub mod ids;

// Storage and components
pub mod dispatch;
pub mod escort;
pub mod geo_index;
pub mod panic;
pub mod reaper;
pub mod registry;
pub mod reports;
pub mod storage;

// Requests and execution
pub mod engine;
pub mod ir;
pub mod telemetry;

// Re-export primary types at crate root for convenience
pub use auth::{authorize, AuthContext, Capability, Entitlement, Principal, Role, StaticAuthContext};
pub use config::{RuntimeConfig, SafeguardConfig};
pub use error::{
    ConflictError, DependencyError, NotFoundError, PermissionError, RuntimeError, SafeguardError,
    SafeguardResult, ValidationError,
};
pub use geo::{haversine_km, Catchment, GeoPoint, LocationFix, EARTH_RADIUS_KM};
pub use ids::{EscortSessionId, PanicEventId, ReportId, ResponderId, SubjectId};

pub use dispatch::{
    DispatchEvent, DispatchOutcome, EventDispatcher, EventKind, Notification, NotificationGateway,
    RecordingGateway, SendReceipt, TracingGateway,
};
pub use escort::{EscortSession, EscortSessionMachine, EscortState};
pub use geo_index::{GeoIndex, ResponderTeam};
pub use panic::{EmergencyCategory, NearbyPanic, PanicActivation, PanicEvent, PanicEventMachine, PanicState};
pub use reaper::{ReaperWorker, RetentionReaper, SweepReport};
pub use registry::{OccurrenceKind, SubjectRegistry};
pub use reports::{IncidentReport, NearbyReport, NewReport, ReportCreated, ReportKind, ReportStore};
pub use storage::{InMemoryStores, StorageError};

pub use engine::runtime::{DefaultRouter, EngineRuntime, ExecutionHandle, ExecutionPath, OperationRouter};
pub use engine::{EngineResponse, EngineStores, SafeguardEngine, SubjectHistory};
pub use ir::{
    ActivatePanicPayload, LocationPayload, MarkUploadedPayload, Operation, SafeguardIR,
    SetCatchmentPayload, SubjectPayload,
};
