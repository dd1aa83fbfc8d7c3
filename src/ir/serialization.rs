//! Request serialization helpers.
//!
//! Serde already provides JSON serialization. This module centralizes
//! convenience helpers used by clients/servers and keeps formatting stable.

use crate::error::SafeguardError;
use crate::ir::operations::SafeguardIR;

/// Serialize a request to pretty JSON.
///
/// # Errors
///
/// `Internal` if serialization fails.
pub fn to_json_pretty(ir: &SafeguardIR) -> Result<String, SafeguardError> {
    serde_json::to_string_pretty(ir).map_err(|e| SafeguardError::internal(format!("serialize request: {e}")))
}

/// Deserialize a request from JSON.
///
/// Callers should then invoke `ir.validate()` before executing.
///
/// # Errors
///
/// `Internal` if the document is not a well-formed request.
pub fn from_json(s: &str) -> Result<SafeguardIR, SafeguardError> {
    serde_json::from_str::<SafeguardIR>(s).map_err(|e| SafeguardError::internal(format!("deserialize request: {e}")))
}
