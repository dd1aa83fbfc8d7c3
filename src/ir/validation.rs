//! Request validation.
//!
//! Engine components validate their own inputs, but envelope validation is
//! required to reject malformed or adversarial JSON before it is routed.

use crate::error::ValidationError;
use crate::ir::operations::{
    ActivatePanicPayload, LocationPayload, MarkUploadedPayload, Operation, SafeguardIR,
    SetCatchmentPayload,
};
use crate::reports::NewReport;

/// Conservative upper bound for free-form text fields.
pub const MAX_TEXT_LEN: usize = 4 * 1024;

/// Upper bound for a category name.
pub const MAX_CATEGORY_LEN: usize = 64;

fn validate_non_empty(field: &'static str, value: &str, max_length: usize) -> Result<(), ValidationError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(ValidationError::MissingField {
            field: field.to_string(),
        });
    }
    if v.len() > max_length {
        return Err(ValidationError::FieldTooLong {
            field: field.to_string(),
            max_length,
        });
    }
    Ok(())
}

fn validate_optional_text(field: &'static str, value: Option<&str>, max_length: usize) -> Result<(), ValidationError> {
    match value {
        Some(v) if v.len() > max_length => Err(ValidationError::FieldTooLong {
            field: field.to_string(),
            max_length,
        }),
        _ => Ok(()),
    }
}

fn validate_finite(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::NonFiniteCoordinate { field })
    }
}

impl LocationPayload {
    /// Validates this payload.
    ///
    /// # Errors
    ///
    /// Non-finite or out-of-range coordinates, or a bad accuracy.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.to_fix().map(|_| ())
    }
}

impl ActivatePanicPayload {
    /// Validates this payload.
    ///
    /// # Errors
    ///
    /// As [`LocationPayload::validate`], or an oversize category.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.location.validate()?;
        validate_optional_text("category", self.category.as_deref(), MAX_CATEGORY_LEN)
    }
}

impl MarkUploadedPayload {
    /// Validates this payload.
    ///
    /// # Errors
    ///
    /// Missing or oversize media URL.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_non_empty("media_url", &self.media_url, MAX_TEXT_LEN)
    }
}

impl SetCatchmentPayload {
    /// Validates this payload. Radius bounds are enforced by the geo index.
    ///
    /// # Errors
    ///
    /// Non-finite values.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_finite("latitude", self.latitude)?;
        validate_finite("longitude", self.longitude)?;
        validate_finite("radius_km", self.radius_km)
    }
}

fn validate_new_report(report: &NewReport) -> Result<(), ValidationError> {
    validate_finite("latitude", report.latitude)?;
    validate_finite("longitude", report.longitude)?;
    validate_non_empty("media_url", &report.media_url, MAX_TEXT_LEN)?;
    validate_optional_text("caption", report.caption.as_deref(), MAX_TEXT_LEN)?;
    validate_optional_text("thumbnail_url", report.thumbnail_url.as_deref(), MAX_TEXT_LEN)
}

impl Operation {
    /// Validate the operation payload.
    ///
    /// # Errors
    ///
    /// The first [`ValidationError`] found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::ActivatePanic(p) => p.validate(),
            Self::LogPanicLocation(p) | Self::StartEscort(p) | Self::LogEscortLocation(p) => p.validate(),
            Self::CreateReport(p) => validate_new_report(p),
            Self::MarkReportUploaded(p) => p.validate(),
            Self::SetCatchment(p) => p.validate(),
            Self::DeactivatePanic
            | Self::StopEscort
            | Self::MyReports
            | Self::NearbyReports
            | Self::NearbyPanics
            | Self::SubjectHistory(_)
            | Self::LiveLocation(_)
            | Self::ViewCatchment => Ok(()),
        }
    }
}

impl SafeguardIR {
    /// Validates the envelope and its operation.
    ///
    /// # Errors
    ///
    /// [`ValidationError::UnsupportedVersion`] for a foreign protocol version,
    /// otherwise as [`Operation::validate`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.version != Self::CURRENT_VERSION {
            return Err(ValidationError::UnsupportedVersion {
                version: self.version.clone(),
            });
        }
        self.operation.validate()
    }
}
