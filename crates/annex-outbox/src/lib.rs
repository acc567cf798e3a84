//! annex-outbox
//!
//! The transactional outbox pipeline: the enqueue path (webhook payload →
//! routing → validation → idempotent insert) and the flush loop (claim →
//! group → JSONL shard → remote commit → finalize). The database is the
//! queue; there are no in-memory buffers between the two halves.

pub mod enqueue;
pub mod processor;

pub use enqueue::{enqueue_webhook, EnqueueConfig, EnqueueOutcome};
pub use processor::{Processor, ProcessorConfig};
