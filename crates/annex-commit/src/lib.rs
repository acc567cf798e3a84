//! annex-commit
//!
//! Client side of the remote dataset repository's commit API, plus the
//! shard path layout committed files are written under. The client is
//! single-shot: no retries live here; backoff and error attribution
//! belong to the outbox processor.

pub mod client;
pub mod path;

pub use client::{ClientCache, CommitClient, CommitOperation};
pub use path::{build_shard_path, safe_path_component};
