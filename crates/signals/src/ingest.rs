//! Deduplicated persistence and status transitions for signals.

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use signalflow_core::model::{Signal, SignalStatus};
use signalflow_storage::{Database, SignalStore, StorageError};

use crate::error::SignalError;
use crate::normalizer::{RawSignal, SignalNormalizer};

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Created(Signal),
    /// A signal with the same `(agencyId, dedupHash)` already existed.
    Duplicate(Signal),
}

impl IngestOutcome {
    pub fn signal(&self) -> &Signal {
        match self {
            IngestOutcome::Created(s) | IngestOutcome::Duplicate(s) => s,
        }
    }

    pub fn into_signal(self) -> Signal {
        match self {
            IngestOutcome::Created(s) | IngestOutcome::Duplicate(s) => s,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, IngestOutcome::Duplicate(_))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SignalIngestor {
    normalizer: SignalNormalizer,
}

impl SignalIngestor {
    pub fn new(normalizer: SignalNormalizer) -> Self {
        Self { normalizer }
    }

    /// Normalize and store `raw` unless the same logical event is already stored.
    ///
    /// Runs in its own transaction. Losing an insert race to a concurrent
    /// delivery of the same event yields `Duplicate` with the winner's row.
    pub async fn ingest(
        &self,
        db: &dyn Database,
        agency_id: Uuid,
        raw: &RawSignal,
    ) -> Result<IngestOutcome, SignalError> {
        let normalized = self.normalizer.normalize(agency_id, raw)?;
        let hash = normalized.dedup_hash.clone();

        let mut tx = db.begin().await?;
        if let Some(existing) = tx.find_signal_by_hash(agency_id, &hash).await? {
            tx.rollback().await?;
            debug!(signal_id = %existing.id, "duplicate signal");
            return Ok(IngestOutcome::Duplicate(existing));
        }

        let signal = Signal::from_normalized(normalized, Uuid::new_v4(), Utc::now());
        match tx.insert_signal(&signal).await {
            Ok(()) => {
                tx.commit().await?;
                info!(
                    signal_id = %signal.id,
                    source = %signal.source,
                    signal_type = %signal.signal_type,
                    "signal ingested"
                );
                Ok(IngestOutcome::Created(signal))
            }
            Err(e) if e.is_unique_violation() => {
                tx.rollback().await?;
                let mut tx = db.begin().await?;
                let existing = tx.find_signal_by_hash(agency_id, &hash).await?;
                tx.rollback().await?;
                let existing = existing.ok_or_else(|| StorageError::not_found("signal", &hash))?;
                debug!(signal_id = %existing.id, "concurrent duplicate signal");
                Ok(IngestOutcome::Duplicate(existing))
            }
            Err(e) => Err(e.into()),
        }
    }
}

async fn transition<S>(store: &mut S, id: Uuid, apply: impl FnOnce(&mut Signal)) -> Result<Signal, SignalError>
where
    S: SignalStore + ?Sized,
{
    let mut signal = store
        .get_signal(id)
        .await?
        .ok_or_else(|| StorageError::not_found("signal", id))?;
    if signal.status.is_final() {
        return Err(StorageError::Immutable(format!("signal {} is {}", id, signal.status.as_str())).into());
    }
    apply(&mut signal);
    store.update_signal(&signal).await?;
    Ok(signal)
}

/// Final: the signal was handled.
pub async fn mark_processed<S>(store: &mut S, id: Uuid) -> Result<Signal, SignalError>
where
    S: SignalStore + ?Sized,
{
    transition(store, id, |s| {
        s.status = SignalStatus::Processed;
        s.processed = true;
        s.processed_at = Some(Utc::now());
    })
    .await
}

/// Final: the signal was deliberately dropped.
pub async fn mark_discarded<S>(store: &mut S, id: Uuid) -> Result<Signal, SignalError>
where
    S: SignalStore + ?Sized,
{
    transition(store, id, |s| {
        s.status = SignalStatus::Discarded;
        s.processed_at = Some(Utc::now());
    })
    .await
}

/// Record a failed processing attempt; the signal stays eligible for retry.
pub async fn mark_failed<S>(store: &mut S, id: Uuid) -> Result<Signal, SignalError>
where
    S: SignalStore + ?Sized,
{
    let signal = transition(store, id, |s| {
        s.status = SignalStatus::Failed;
        s.retry_count += 1;
    })
    .await?;
    warn!(signal_id = %id, retry_count = signal.retry_count, "signal processing failed");
    Ok(signal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use signalflow_storage::MemoryDatabase;

    fn raw() -> RawSignal {
        RawSignal::from_value(&json!({
            "source": "ga4", "type": "session_drop", "data": {"sessions": 10}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn second_delivery_is_a_duplicate() {
        let db = MemoryDatabase::new();
        let agency = Uuid::new_v4();
        let ingestor = SignalIngestor::default();

        let first = ingestor.ingest(&db, agency, &raw()).await.unwrap();
        let second = ingestor.ingest(&db, agency, &raw()).await.unwrap();

        assert!(!first.is_duplicate());
        assert!(second.is_duplicate());
        assert_eq!(first.signal().id, second.signal().id);
        assert_eq!(db.snapshot().signals.len(), 1);
    }

    #[tokio::test]
    async fn invalid_signal_persists_nothing() {
        let db = MemoryDatabase::new();
        let mut bad = raw();
        bad.source = "carrier_pigeon".into();
        let err = SignalIngestor::default()
            .ingest(&db, Uuid::new_v4(), &bad)
            .await
            .unwrap_err();
        assert!(matches!(err, SignalError::Invalid(_)));
        assert!(db.snapshot().signals.is_empty());
    }

    #[tokio::test]
    async fn processed_signal_is_immutable() {
        let db = MemoryDatabase::new();
        let signal = SignalIngestor::default()
            .ingest(&db, Uuid::new_v4(), &raw())
            .await
            .unwrap()
            .into_signal();

        let mut tx = db.begin().await.unwrap();
        let failed = mark_failed(&mut *tx, signal.id).await.unwrap();
        assert_eq!(failed.retry_count, 1);
        assert_eq!(failed.status, SignalStatus::Failed);

        let done = mark_processed(&mut *tx, signal.id).await.unwrap();
        assert!(done.processed);
        assert!(done.processed_at.is_some());

        let err = mark_discarded(&mut *tx, signal.id).await.unwrap_err();
        assert!(matches!(err, SignalError::Storage(StorageError::Immutable(_))));
        tx.commit().await.unwrap();

        let stored = &db.snapshot().signals[&signal.id];
        assert_eq!(stored.status, SignalStatus::Processed);
        assert_eq!(stored.retry_count, 1);
    }
}
