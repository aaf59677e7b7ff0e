//! Signal intake: normalization, deduplicated persistence and lifecycle.

pub mod error;
pub mod ingest;
pub mod normalizer;

pub use error::SignalError;
pub use ingest::{mark_discarded, mark_failed, mark_processed, IngestOutcome, SignalIngestor};
pub use normalizer::{dedup_hash, RawSignal, SignalNormalizer, METADATA_KEY};
