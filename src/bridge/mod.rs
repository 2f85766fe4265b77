//! Capture bridge facade
//!
//! [`CaptureBridge`] ties the store, query engine, timeline and extractor
//! together. It is shared as `Arc<CaptureBridge>` by the HTTP layer; every
//! read runs on a snapshot, so the store lock is only held while copying.

pub mod intel;
pub mod views;

use crate::config::{BridgeConfig, ExtractionConfig};
use crate::error::Result;
use crate::extract::{ContentExtractor, Extraction};
use crate::query::{self, QueryFilters, QueryOrder, QueryResult, Timeline, TimelineRequest};
use crate::session::normalize::now_epoch;
use crate::session::{BufferKind, CanonicalRecord, IngestReceipt, SessionStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Live buffer utilization at which it is reported as full
const FULL_THRESHOLD: f64 = 0.95;

/// Which buffers to empty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearRequest {
    #[serde(default = "default_true")]
    pub all: bool,
    #[serde(default)]
    pub flagged: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ClearRequest {
    fn default() -> Self {
        Self {
            all: true,
            flagged: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub sessions_cleared: usize,
    pub flagged_cleared: usize,
}

/// Buffer occupancy and traffic rates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeStats {
    pub total_sessions: usize,
    pub flagged_sessions: usize,
    pub live_capacity: usize,
    pub flagged_capacity: usize,
    pub live_utilization: f64,
    pub flagged_utilization: f64,
    pub live_buffer_full: bool,
    /// Newest reception time in the live buffer
    pub last_activity: Option<f64>,
    pub last_minute: usize,
    pub last_hour: usize,
    pub uptime_seconds: f64,
}

/// Core facade over the bounded session store
pub struct CaptureBridge {
    store: SessionStore,
    extractor: ContentExtractor,
    extraction: ExtractionConfig,
    started: Instant,
}

impl CaptureBridge {
    pub fn new(config: &BridgeConfig) -> Self {
        tracing::info!(
            live_capacity = config.buffers.live_capacity,
            flagged_capacity = config.buffers.flagged_capacity,
            "Creating capture bridge"
        );
        Self {
            store: SessionStore::new(
                config.buffers.live_capacity,
                config.buffers.flagged_capacity,
            ),
            extractor: ContentExtractor::new(),
            extraction: config.extraction.clone(),
            started: Instant::now(),
        }
    }

    pub fn extraction_config(&self) -> &ExtractionConfig {
        &self.extraction
    }

    pub fn extractor(&self) -> &ContentExtractor {
        &self.extractor
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Normalize and store one raw payload. Never fails.
    pub async fn ingest(&self, raw: &serde_json::Value) -> IngestReceipt {
        self.store.ingest(raw).await
    }

    pub async fn query(
        &self,
        filters: &QueryFilters,
        which: BufferKind,
        order: QueryOrder,
    ) -> Result<QueryResult> {
        let snapshot = self.store.snapshot(which).await;
        query::query(&snapshot, filters, order, now_epoch())
    }

    pub async fn get_by_id(&self, id: &str) -> Option<Arc<CanonicalRecord>> {
        self.store.find(id).await
    }

    pub async fn aggregate_timeline(&self, request: &TimelineRequest) -> Timeline {
        let snapshot = self.store.snapshot(BufferKind::All).await;
        query::aggregate(&snapshot, request, now_epoch())
    }

    /// Budgeted extraction of a session's response body.
    pub async fn extract_content(&self, id: &str, budget: usize) -> Option<Extraction> {
        let record = self.store.find(id).await?;
        Some(
            self.extractor
                .extract(&record.response_body, &record.content_type, budget),
        )
    }

    pub async fn clear(&self, request: ClearRequest) -> ClearReport {
        let mut report = ClearReport::default();
        if request.all {
            report.sessions_cleared = self.store.clear(BufferKind::All).await;
        }
        if request.flagged {
            report.flagged_cleared = self.store.clear(BufferKind::Flagged).await;
        }
        tracing::info!(
            sessions_cleared = report.sessions_cleared,
            flagged_cleared = report.flagged_cleared,
            "Session buffers cleared"
        );
        report
    }

    pub async fn stats(&self) -> BridgeStats {
        let (live, flagged) = self.store.snapshot_both().await;
        let counts = self.store.counts().await;
        let now = now_epoch();

        let live_utilization = ratio(live.len(), counts.live_capacity);
        let last_activity = live.iter().map(|r| r.received_at).reduce(f64::max);
        let since = |secs: f64| live.iter().filter(|r| r.received_at >= now - secs).count();

        BridgeStats {
            total_sessions: live.len(),
            flagged_sessions: flagged.len(),
            live_capacity: counts.live_capacity,
            flagged_capacity: counts.flagged_capacity,
            live_utilization,
            flagged_utilization: ratio(flagged.len(), counts.flagged_capacity),
            live_buffer_full: live_utilization >= FULL_THRESHOLD,
            last_activity,
            last_minute: since(60.0),
            last_hour: since(3600.0),
            uptime_seconds: self.uptime_seconds(),
        }
    }

    pub(crate) fn store(&self) -> &SessionStore {
        &self.store
    }
}

fn ratio(len: usize, capacity: usize) -> f64 {
    if capacity == 0 {
        0.0
    } else {
        len as f64 / capacity as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BufferConfig;
    use crate::extract::ExtractionMethod;
    use serde_json::json;

    fn bridge(live: usize, flagged: usize) -> CaptureBridge {
        CaptureBridge::new(&BridgeConfig {
            buffers: BufferConfig {
                live_capacity: live,
                flagged_capacity: flagged,
            },
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_ingest_query_roundtrip() {
        let bridge = bridge(100, 10);
        for i in 0..5 {
            bridge
                .ingest(&json!({"id": i, "url": format!("http://a{}.com/", i), "statusCode": 200}))
                .await;
        }
        let result = bridge
            .query(&QueryFilters::default(), BufferKind::All, QueryOrder::Recent)
            .await
            .unwrap();
        assert_eq!(result.total_matched, 5);
        assert_eq!(result.records[0].id, "4");
        assert_eq!(bridge.get_by_id("2").await.unwrap().host, "a2.com");
        assert!(bridge.get_by_id("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_query_flagged_buffer() {
        let bridge = bridge(100, 10);
        bridge.ingest(&json!({"id": 1, "statusCode": 200})).await;
        bridge
            .ingest(&json!({"id": 2, "statusCode": 200, "sessionFlags": "High: eval"}))
            .await;
        let result = bridge
            .query(&QueryFilters::default(), BufferKind::Flagged, QueryOrder::Listing)
            .await
            .unwrap();
        assert_eq!(result.total_matched, 1);
        assert_eq!(result.statistics.flagged_count, 1);
    }

    #[tokio::test]
    async fn test_extract_content() {
        let bridge = bridge(10, 10);
        bridge
            .ingest(&json!({"id": "js", "responseBody": "eval(1)", "contentType": "text/javascript"}))
            .await;
        let extraction = bridge.extract_content("js", 100).await.unwrap();
        assert_eq!(extraction.head, "eval(1)");
        assert_eq!(extraction.metadata.extraction_method, ExtractionMethod::FullContent);
        assert_eq!(extraction.metadata.content_type, "text/javascript");
        assert!(bridge.extract_content("missing", 100).await.is_none());
    }

    #[tokio::test]
    async fn test_clear_requests() {
        let bridge = bridge(10, 10);
        for i in 0..3 {
            bridge.ingest(&json!({"id": i, "statusCode": 500})).await;
        }
        let report = bridge.clear(ClearRequest::default()).await;
        assert_eq!(report, ClearReport { sessions_cleared: 3, flagged_cleared: 0 });
        assert_eq!(bridge.stats().await.flagged_sessions, 3);

        let report = bridge
            .clear(ClearRequest {
                all: false,
                flagged: true,
            })
            .await;
        assert_eq!(report.flagged_cleared, 3);
        assert_eq!(bridge.stats().await.flagged_sessions, 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let bridge = bridge(20, 10);
        let now = now_epoch();
        for i in 0..19 {
            bridge.ingest(&json!({"id": i, "received_at": now - 10.0})).await;
        }
        bridge.ingest(&json!({"id": "old", "received_at": now - 7_200.0})).await;

        let stats = bridge.stats().await;
        assert_eq!(stats.total_sessions, 20);
        assert_eq!(stats.live_capacity, 20);
        assert_eq!(stats.live_utilization, 1.0);
        assert!(stats.live_buffer_full);
        assert_eq!(stats.last_minute, 19);
        assert_eq!(stats.last_hour, 19);
        assert_eq!(stats.flagged_utilization, 0.0);
        assert!(stats.last_activity.unwrap() >= now - 10.5);
    }

    #[tokio::test]
    async fn test_stats_below_full_threshold() {
        let bridge = bridge(100, 10);
        for i in 0..94 {
            bridge.ingest(&json!({"id": i})).await;
        }
        assert!(!bridge.stats().await.live_buffer_full);
        bridge.ingest(&json!({"id": 94})).await;
        assert!(bridge.stats().await.live_buffer_full);
    }

    #[tokio::test]
    async fn test_concurrent_ingest_and_read() {
        let bridge = Arc::new(bridge(1_000, 100));
        let mut handles = Vec::new();
        for worker in 0..4 {
            let bridge = Arc::clone(&bridge);
            handles.push(tokio::spawn(async move {
                for i in 0..200 {
                    bridge
                        .ingest(&json!({"id": format!("{}-{}", worker, i), "statusCode": 404}))
                        .await;
                    if i % 50 == 0 {
                        let result = bridge
                            .query(&QueryFilters::default(), BufferKind::All, QueryOrder::Recent)
                            .await
                            .unwrap();
                        assert!(result.records.len() <= 50);
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let stats = bridge.stats().await;
        assert_eq!(stats.total_sessions, 800);
        assert_eq!(stats.flagged_sessions, 100);
    }
}
