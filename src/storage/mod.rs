//! Storage layer.
//!
//! The traits in this module are the only contract the core relies on; the
//! in-memory backend is the reference implementation.

mod memory;
mod traits;

pub use memory::{
    InMemoryActiveSlotStore, InMemoryEscortSessionStore, InMemoryIncidentReportStore,
    InMemoryPanicEventStore, InMemoryResponderStore, InMemoryStores,
};
pub use traits::{
    ActiveSlotStore, EscortSessionStore, IncidentReportStore, PanicEventStore, ResponderStore,
    StorageError, UploadMark,
};
