//! Request envelope and operation payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::geo::{GeoPoint, LocationFix};
use crate::ids::{ReportId, SubjectId};
use crate::reports::NewReport;

/// Envelope for every request handed to the engine.
///
/// The engine rejects any `version` other than [`Self::CURRENT_VERSION`]
/// before the operation runs. `request_id` ends up on the request span, so
/// it ties the dispatch and state-transition logs back to the client call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafeguardIR {
    /// Protocol version (e.g., "1.0").
    pub version: String,

    /// Unique identifier for this request (for tracing/debugging).
    pub request_id: Uuid,

    /// When this request was created.
    pub timestamp: DateTime<Utc>,

    /// The operation to execute.
    pub operation: Operation,
}

impl SafeguardIR {
    /// Current protocol version.
    pub const CURRENT_VERSION: &'static str = "1.0";

    /// Creates a new envelope around `operation`.
    #[must_use]
    pub fn new(operation: Operation) -> Self {
        Self {
            version: Self::CURRENT_VERSION.to_string(),
            request_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            operation,
        }
    }

    /// Sets a custom request ID (useful for correlation).
    #[must_use]
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }
}

/// Every operation the core exposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "payload", rename_all = "snake_case")]
pub enum Operation {
    /// Raise a panic at the caller's position.
    ActivatePanic(ActivatePanicPayload),

    /// Append a point to the caller's Active panic trail.
    LogPanicLocation(LocationPayload),

    /// Deactivate the caller's Active panic.
    DeactivatePanic,

    /// Start an escort session.
    StartEscort(LocationPayload),

    /// Log a position on the caller's Active escort session.
    LogEscortLocation(LocationPayload),

    /// End the caller's Active escort session.
    StopEscort,

    /// File an incident report.
    CreateReport(NewReport),

    /// Set the one-shot upload flag on one of the caller's reports.
    MarkReportUploaded(MarkUploadedPayload),

    /// The caller's own reports.
    MyReports,

    /// Reports inside the calling responder's catchment.
    NearbyReports,

    /// Active panics inside the calling responder's catchment.
    NearbyPanics,

    /// Past panics and escort sessions of a subject.
    SubjectHistory(SubjectPayload),

    /// Current escort position of a subject.
    LiveLocation(SubjectPayload),

    /// Upsert the calling responder's catchment.
    SetCatchment(SetCatchmentPayload),

    /// Read the calling responder's catchment.
    ViewCatchment,
}

impl Operation {
    /// Stable operation name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ActivatePanic(_) => "activate_panic",
            Self::LogPanicLocation(_) => "log_panic_location",
            Self::DeactivatePanic => "deactivate_panic",
            Self::StartEscort(_) => "start_escort",
            Self::LogEscortLocation(_) => "log_escort_location",
            Self::StopEscort => "stop_escort",
            Self::CreateReport(_) => "create_report",
            Self::MarkReportUploaded(_) => "mark_report_uploaded",
            Self::MyReports => "my_reports",
            Self::NearbyReports => "nearby_reports",
            Self::NearbyPanics => "nearby_panics",
            Self::SubjectHistory(_) => "subject_history",
            Self::LiveLocation(_) => "live_location",
            Self::SetCatchment(_) => "set_catchment",
            Self::ViewCatchment => "view_catchment",
        }
    }
}

/// A position reported by a client device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationPayload {
    pub latitude: f64,
    pub longitude: f64,

    /// Horizontal accuracy in metres.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,

    /// Device time of the fix; server time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl LocationPayload {
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m: None,
            recorded_at: None,
        }
    }

    /// Validates coordinates and accuracy and builds the fix.
    ///
    /// # Errors
    ///
    /// Any [`ValidationError`] from [`GeoPoint::new`] or
    /// [`LocationFix::with_accuracy`].
    pub fn to_fix(&self) -> Result<LocationFix, ValidationError> {
        let point = GeoPoint::new(self.latitude, self.longitude)?;
        let fix = LocationFix::at(point, self.recorded_at.unwrap_or_else(Utc::now));
        match self.accuracy_m {
            Some(acc) => fix.with_accuracy(acc),
            None => Ok(fix),
        }
    }
}

/// Payload for `activate_panic`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivatePanicPayload {
    #[serde(flatten)]
    pub location: LocationPayload,

    /// Free-form category name; unknown names fall back to "other".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Payload for `mark_report_uploaded`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkUploadedPayload {
    pub report_id: ReportId,
    pub media_url: String,
}

/// Target of a subject read. `None` means the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<SubjectId>,
}

/// Payload for `set_catchment`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetCatchmentPayload {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_is_tagged() {
        let ir = SafeguardIR::new(Operation::ActivatePanic(ActivatePanicPayload {
            location: LocationPayload::new(6.5244, 3.3792),
            category: Some("robbery".to_string()),
        }));
        let v = serde_json::to_value(&ir).unwrap();
        assert_eq!(v["version"], "1.0");
        assert_eq!(v["operation"]["op"], "activate_panic");
        assert_eq!(v["operation"]["payload"]["latitude"], 6.5244);
        assert_eq!(v["operation"]["payload"]["category"], "robbery");

        let unit = serde_json::to_value(Operation::StopEscort).unwrap();
        assert_eq!(unit["op"], "stop_escort");
    }

    #[test]
    fn location_payload_builds_validated_fix() {
        let mut payload = LocationPayload::new(1.0, 2.0);
        payload.accuracy_m = Some(8.0);
        let fix = payload.to_fix().unwrap();
        assert_eq!(fix.accuracy_m, Some(8.0));

        assert!(LocationPayload::new(100.0, 0.0).to_fix().is_err());
        payload.accuracy_m = Some(-3.0);
        assert!(payload.to_fix().is_err());
    }
}
