//! Request representation.
//!
//! A serializable, transport-agnostic envelope for every operation the core
//! exposes. This enables:
//! - Network transport between clients and the daemon
//! - Request logging with correlation ids
//! - Validation before any component is touched

mod operations;
mod serialization;
mod validation;

pub use operations::{
    ActivatePanicPayload, LocationPayload, MarkUploadedPayload, Operation, SafeguardIR,
    SetCatchmentPayload, SubjectPayload,
};

pub use serialization::{from_json, to_json_pretty};
pub use validation::{MAX_CATEGORY_LEN, MAX_TEXT_LEN};
