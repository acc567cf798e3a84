//! annex-routing
//!
//! Pure classification and derivation logic for incoming webhook payloads:
//! routing (which dataset repo a payload belongs to), validation (is the
//! payload well-formed enough to enqueue), provenance extraction (canonical
//! source object reference) and event-ID derivation (idempotency key).
//!
//! Nothing in this crate performs I/O; everything is unit-testable.

pub mod event_id;
pub mod provenance;
pub mod router;

pub use event_id::derive_event_id;
pub use provenance::extract_source;
pub use router::{action_eligible, route, validate, RouterConfig};
