//! Roles, entitlements and per-operation capability checks.
//!
//! Authentication itself happens outside the core. An [`AuthContext`] turns an
//! inbound credential into a [`Principal`]; the core only ever branches on the
//! principal's [`Role`] and [`Entitlement`]s.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PermissionError, SafeguardError, SafeguardResult};
use crate::ids::{ResponderId, SubjectId};
use crate::storage::StorageError;

/// Closed set of actor roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A member of the public.
    Civil,
    /// A responder team.
    Responder,
    /// Operator with read access across subjects.
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Civil => write!(f, "civil"),
            Self::Responder => write!(f, "responder"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// Paid or granted feature flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entitlement {
    /// Live escort tracking.
    Escort,
}

impl fmt::Display for Entitlement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Escort => write!(f, "escort"),
        }
    }
}

/// The resolved caller of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Stable identity. Interpreted as a subject or a responder depending on role.
    pub id: Uuid,
    /// Caller role.
    pub role: Role,
    /// Granted entitlements.
    #[serde(default)]
    pub entitlements: BTreeSet<Entitlement>,
}

impl Principal {
    #[must_use]
    pub fn civil(subject: SubjectId) -> Self {
        Self {
            id: *subject.as_uuid(),
            role: Role::Civil,
            entitlements: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn responder(responder: ResponderId) -> Self {
        Self {
            id: *responder.as_uuid(),
            role: Role::Responder,
            entitlements: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn admin(id: Uuid) -> Self {
        Self {
            id,
            role: Role::Admin,
            entitlements: BTreeSet::new(),
        }
    }

    /// Grants an entitlement.
    #[must_use]
    pub fn with_entitlement(mut self, entitlement: Entitlement) -> Self {
        self.entitlements.insert(entitlement);
        self
    }

    #[must_use]
    pub const fn subject_id(&self) -> SubjectId {
        SubjectId::from_uuid(self.id)
    }

    #[must_use]
    pub const fn responder_id(&self) -> ResponderId {
        ResponderId::from_uuid(self.id)
    }

    #[must_use]
    pub fn has(&self, entitlement: Entitlement) -> bool {
        self.entitlements.contains(&entitlement)
    }
}

/// One capability per externally exposed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    ActivatePanic,
    LogPanicLocation,
    DeactivatePanic,
    StartEscort,
    LogEscortLocation,
    StopEscort,
    CreateReport,
    MarkReportUploaded,
    ListOwnReports,
    NearbyReports,
    NearbyPanics,
    SetCatchment,
    ViewCatchment,
    /// Reading another subject's history or live location.
    ViewSubject,
}

impl Capability {
    /// Operation name used in permission errors and logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ActivatePanic => "activate_panic",
            Self::LogPanicLocation => "log_panic_location",
            Self::DeactivatePanic => "deactivate_panic",
            Self::StartEscort => "start_escort",
            Self::LogEscortLocation => "log_escort_location",
            Self::StopEscort => "stop_escort",
            Self::CreateReport => "create_report",
            Self::MarkReportUploaded => "mark_report_uploaded",
            Self::ListOwnReports => "list_own_reports",
            Self::NearbyReports => "nearby_reports",
            Self::NearbyPanics => "nearby_panics",
            Self::SetCatchment => "set_catchment",
            Self::ViewCatchment => "view_catchment",
            Self::ViewSubject => "view_subject",
        }
    }

    const fn allows(self, role: Role) -> bool {
        match self {
            Self::ActivatePanic
            | Self::LogPanicLocation
            | Self::DeactivatePanic
            | Self::StartEscort
            | Self::LogEscortLocation
            | Self::StopEscort
            | Self::CreateReport
            | Self::MarkReportUploaded
            | Self::ListOwnReports => matches!(role, Role::Civil),
            Self::NearbyReports | Self::NearbyPanics | Self::SetCatchment | Self::ViewCatchment => {
                matches!(role, Role::Responder)
            }
            Self::ViewSubject => matches!(role, Role::Responder | Role::Admin),
        }
    }

    const fn entitlement(self) -> Option<Entitlement> {
        match self {
            Self::StartEscort | Self::LogEscortLocation => Some(Entitlement::Escort),
            _ => None,
        }
    }
}

/// Checks that `principal` may exercise `capability`.
///
/// # Errors
///
/// [`PermissionError::RoleNotAllowed`] on a role mismatch, then
/// [`PermissionError::MissingEntitlement`] if a required entitlement is absent.
pub fn authorize(principal: &Principal, capability: Capability) -> Result<(), PermissionError> {
    if !capability.allows(principal.role) {
        return Err(PermissionError::RoleNotAllowed {
            operation: capability.name(),
            role: principal.role,
        });
    }
    if let Some(required) = capability.entitlement() {
        if !principal.has(required) {
            return Err(PermissionError::MissingEntitlement {
                operation: capability.name(),
                entitlement: required,
            });
        }
    }
    Ok(())
}

/// Authorizes reads about `subject`: the subject itself, or a role holding
/// [`Capability::ViewSubject`].
///
/// # Errors
///
/// [`PermissionError::RoleNotAllowed`] when neither condition holds.
pub fn authorize_subject_read(principal: &Principal, subject: SubjectId) -> Result<(), PermissionError> {
    if principal.role == Role::Civil && principal.subject_id() == subject {
        return Ok(());
    }
    authorize(principal, Capability::ViewSubject)
}

/// Resolves an inbound credential to a [`Principal`].
pub trait AuthContext: Send + Sync {
    /// Resolve `credential`, or fail with a permission error.
    fn resolve(&self, credential: &str) -> SafeguardResult<Principal>;
}

/// Token table, for embedded use and tests.
#[derive(Debug, Default)]
pub struct StaticAuthContext {
    tokens: RwLock<HashMap<String, Principal>>,
}

impl StaticAuthContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the principal behind `token`.
    ///
    /// # Errors
    ///
    /// Fails only if the table lock is poisoned.
    pub fn register(&self, token: impl Into<String>, principal: Principal) -> SafeguardResult<()> {
        let mut tokens = self
            .tokens
            .write()
            .map_err(|_| StorageError::BackendError("poisoned lock: auth.register".to_string()))?;
        tokens.insert(token.into(), principal);
        Ok(())
    }
}

impl AuthContext for StaticAuthContext {
    fn resolve(&self, credential: &str) -> SafeguardResult<Principal> {
        let tokens = self
            .tokens
            .read()
            .map_err(|_| StorageError::BackendError("poisoned lock: auth.resolve".to_string()))?;
        tokens.get(credential).cloned().ok_or_else(|| {
            SafeguardError::Permission(PermissionError::RoleNotAllowed {
                operation: "authenticate",
                role: Role::Civil,
            })
        })
    }
}
