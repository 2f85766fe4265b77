//! Bounded session store
//!
//! Owns the live buffer (every ingested record) and the flagged buffer
//! (records retained for triage) behind a single `tokio::sync::Mutex`, so an
//! ingest appends to both atomically and no reader ever sees a flagged record
//! that is missing from a concurrently taken live snapshot.
//!
//! Readers take a [`Snapshot`] (a copy of the `Arc`s) and release the lock
//! immediately; filtering, aggregation and extraction run on the snapshot.

use crate::risk;
use crate::session::buffer::BoundedBuffer;
use crate::session::normalize::{self, NormalizeOutcome};
use crate::session::types::CanonicalRecord;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Default live buffer capacity
pub const DEFAULT_LIVE_CAPACITY: usize = 5000;

/// Default flagged buffer capacity
pub const DEFAULT_FLAGGED_CAPACITY: usize = 1000;

/// Which buffer an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferKind {
    All,
    Flagged,
}

/// Result of one ingest call
#[derive(Debug, Clone)]
pub struct IngestReceipt {
    pub id: String,
    /// Also appended to the flagged buffer
    pub retained: bool,
    pub outcome: NormalizeOutcome,
}

/// Point-in-time copy of one buffer, oldest first
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub kind: BufferKind,
    records: Vec<Arc<CanonicalRecord>>,
}

impl Snapshot {
    pub fn new(kind: BufferKind, records: Vec<Arc<CanonicalRecord>>) -> Self {
        Self { kind, records }
    }

    pub fn records(&self) -> &[Arc<CanonicalRecord>] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Oldest → newest
    pub fn iter(&self) -> std::slice::Iter<'_, Arc<CanonicalRecord>> {
        self.records.iter()
    }
}

/// Buffer lengths and capacities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BufferCounts {
    pub live_len: usize,
    pub live_capacity: usize,
    pub flagged_len: usize,
    pub flagged_capacity: usize,
}

struct Buffers {
    all: BoundedBuffer<Arc<CanonicalRecord>>,
    flagged: BoundedBuffer<Arc<CanonicalRecord>>,
}

impl Buffers {
    fn get(&self, which: BufferKind) -> &BoundedBuffer<Arc<CanonicalRecord>> {
        match which {
            BufferKind::All => &self.all,
            BufferKind::Flagged => &self.flagged,
        }
    }
}

/// Bounded in-memory store of captured sessions
pub struct SessionStore {
    inner: Mutex<Buffers>,
}

impl SessionStore {
    pub fn new(live_capacity: usize, flagged_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Buffers {
                all: BoundedBuffer::new(live_capacity),
                flagged: BoundedBuffer::new(flagged_capacity),
            }),
        }
    }

    /// Normalize a raw payload and store it.
    ///
    /// Never fails: malformed payloads are stored as degraded records.
    pub async fn ingest(&self, raw: &serde_json::Value) -> IngestReceipt {
        let normalized = normalize::normalize(raw);
        self.ingest_record(normalized.record, normalized.outcome)
            .await
    }

    /// Store an already-normalized record.
    pub async fn ingest_record(
        &self,
        record: CanonicalRecord,
        outcome: NormalizeOutcome,
    ) -> IngestReceipt {
        let retained = risk::is_retained(&record);
        let record = Arc::new(record);
        let id = record.id.clone();

        {
            let mut buffers = self.inner.lock().await;
            if let Some(evicted) = buffers.all.push(Arc::clone(&record)) {
                tracing::trace!(session_id = %evicted.id, "Evicted oldest live session");
            }
            if retained {
                buffers.flagged.push(record);
            }
        }

        tracing::debug!(session_id = %id, retained, "Session ingested");

        IngestReceipt {
            id,
            retained,
            outcome,
        }
    }

    /// Copy the named buffer's contents.
    pub async fn snapshot(&self, which: BufferKind) -> Snapshot {
        let buffers = self.inner.lock().await;
        Snapshot::new(which, buffers.get(which).to_vec())
    }

    /// Copy both buffers under one lock acquisition.
    pub async fn snapshot_both(&self) -> (Snapshot, Snapshot) {
        let buffers = self.inner.lock().await;
        (
            Snapshot::new(BufferKind::All, buffers.all.to_vec()),
            Snapshot::new(BufferKind::Flagged, buffers.flagged.to_vec()),
        )
    }

    /// Empty only the named buffer, returning how many records were dropped.
    pub async fn clear(&self, which: BufferKind) -> usize {
        let mut buffers = self.inner.lock().await;
        match which {
            BufferKind::All => buffers.all.clear(),
            BufferKind::Flagged => buffers.flagged.clear(),
        }
    }

    /// Most recent live record with the given id.
    pub async fn find(&self, id: &str) -> Option<Arc<CanonicalRecord>> {
        let buffers = self.inner.lock().await;
        let found = buffers.all.iter().rev().find(|r| r.id == id).cloned();
        found
    }

    pub async fn counts(&self) -> BufferCounts {
        let buffers = self.inner.lock().await;
        BufferCounts {
            live_len: buffers.all.len(),
            live_capacity: buffers.all.capacity(),
            flagged_len: buffers.flagged.len(),
            flagged_capacity: buffers.flagged.capacity(),
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_LIVE_CAPACITY, DEFAULT_FLAGGED_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(id: u64, status: u16, annotation: Option<&str>) -> serde_json::Value {
        let mut value = json!({
            "id": id,
            "url": format!("http://host{}.example/", id % 7),
            "statusCode": status,
        });
        if let Some(text) = annotation {
            value["ekfiddleComments"] = json!(text);
        }
        value
    }

    #[tokio::test]
    async fn test_ingest_and_find() {
        let store = SessionStore::new(10, 5);
        let receipt = store.ingest(&payload(1, 200, None)).await;
        assert_eq!(receipt.id, "1");
        assert!(!receipt.retained);
        assert_eq!(receipt.outcome, NormalizeOutcome::Clean);

        let found = store.find("1").await.unwrap();
        assert_eq!(found.host, "host1.example");
        assert!(store.find("2").await.is_none());
    }

    #[tokio::test]
    async fn test_find_returns_most_recent_duplicate() {
        let store = SessionStore::new(10, 5);
        store.ingest(&json!({"id": 1, "url": "http://old.example/"})).await;
        store.ingest(&json!({"id": 1, "url": "http://new.example/"})).await;
        assert_eq!(store.find("1").await.unwrap().host, "new.example");
    }

    #[tokio::test]
    async fn test_bounded_memory() {
        let store = SessionStore::new(100, 10);
        for i in 0..1_000 {
            store.ingest(&payload(i, 500, None)).await;
        }
        let counts = store.counts().await;
        assert_eq!(counts.live_len, 100);
        assert_eq!(counts.flagged_len, 10);

        let snapshot = store.snapshot(BufferKind::All).await;
        let ids: Vec<&str> = snapshot.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids.first(), Some(&"900"));
        assert_eq!(ids.last(), Some(&"999"));
    }

    #[tokio::test]
    async fn test_retention_rule() {
        let store = SessionStore::new(10, 10);
        assert!(!store.ingest(&payload(1, 200, None)).await.retained);
        assert!(store.ingest(&payload(2, 404, None)).await.retained);
        assert!(store.ingest(&payload(3, 200, Some("High: eval"))).await.retained);
        assert!(!store.ingest(&payload(4, 200, Some("   "))).await.retained);

        let flagged = store.snapshot(BufferKind::Flagged).await;
        let ids: Vec<&str> = flagged.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3"]);
    }

    #[tokio::test]
    async fn test_flagged_subset_of_live_within_window() {
        let store = SessionStore::new(20, 5);
        for i in 0..50 {
            let annotation = (i % 3 == 0).then_some("Medium: suspicious");
            store.ingest(&payload(i, 200, annotation)).await;
        }
        let (live, flagged) = store.snapshot_both().await;
        let oldest_live = live.iter().next().unwrap().id.parse::<u64>().unwrap();
        for record in flagged.iter() {
            let id = record.id.parse::<u64>().unwrap();
            if id >= oldest_live {
                assert!(live.iter().any(|r| Arc::ptr_eq(r, record)));
            }
        }
    }

    #[tokio::test]
    async fn test_clear_isolation() {
        let store = SessionStore::new(10, 10);
        for i in 0..4 {
            store.ingest(&payload(i, 500, None)).await;
        }
        let before = store.snapshot(BufferKind::All).await;

        assert_eq!(store.clear(BufferKind::All).await, 4);
        let counts = store.counts().await;
        assert_eq!(counts.live_len, 0);
        assert_eq!(counts.flagged_len, 4);
        assert_eq!(before.len(), 4);

        assert_eq!(store.clear(BufferKind::Flagged).await, 4);
        assert_eq!(store.clear(BufferKind::Flagged).await, 0);
    }

    #[tokio::test]
    async fn test_degraded_payload_still_stored() {
        let store = SessionStore::default();
        let receipt = store.ingest(&json!("not an object")).await;
        assert!(receipt.id.starts_with("error-"));
        assert_eq!(receipt.outcome, NormalizeOutcome::Degraded);
        assert!(!receipt.retained);
        assert!(store.find(&receipt.id).await.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_ingest() {
        let store = Arc::new(SessionStore::new(500, 100));
        let mut handles = Vec::new();
        for worker in 0..8u64 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for i in 0..100u64 {
                    let id = worker * 1_000 + i;
                    let status = if i % 2 == 0 { 500 } else { 200 };
                    store.ingest(&payload(id, status, None)).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let counts = store.counts().await;
        assert_eq!(counts.live_len, 500);
        assert_eq!(counts.flagged_len, 100);

        let (live, flagged) = store.snapshot_both().await;
        let mut ids: Vec<&str> = live.iter().map(|r| r.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 500);
        assert!(flagged.iter().all(|r| r.status_code == 500));
    }
}
