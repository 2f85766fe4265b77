//! Query execution over store snapshots

use crate::error::Result;
use crate::query::filter::{CompiledFilters, FilterWarning, QueryFilters};
use crate::risk;
use crate::session::store::Snapshot;
use crate::session::types::CanonicalRecord;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Entries kept per statistics table
const TOP_N: usize = 10;

/// Result ordering. Both orders yield newest records first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOrder {
    /// Walk the buffer newest → oldest
    #[default]
    Recent,
    /// Sort by reception time, newest first
    Listing,
}

/// One row of a frequency table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyCount {
    pub key: String,
    pub count: usize,
}

/// Aggregates over the full matched set
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryStatistics {
    pub top_hosts: Vec<KeyCount>,
    pub content_types: Vec<KeyCount>,
    pub status_codes: Vec<KeyCount>,
    /// Matched records whose classification carries a flag
    pub flagged_count: usize,
}

/// Reception-time range of the matched set
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimeBounds {
    pub oldest: Option<f64>,
    pub newest: Option<f64>,
    pub oldest_iso: Option<String>,
    pub newest_iso: Option<String>,
}

impl TimeBounds {
    fn new(oldest: Option<f64>, newest: Option<f64>) -> Self {
        Self {
            oldest,
            newest,
            oldest_iso: oldest.map(epoch_iso),
            newest_iso: newest.map(epoch_iso),
        }
    }
}

/// Records returned by [`query`] plus the context needed to render them
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub records: Vec<Arc<CanonicalRecord>>,
    pub total_matched: usize,
    /// Size of the buffer the query ran against
    pub total_buffered: usize,
    pub limit: usize,
    pub statistics: QueryStatistics,
    pub warnings: Vec<FilterWarning>,
    pub time_bounds: TimeBounds,
}

/// Run filters against a snapshot.
///
/// Fails only when a filter is invalid for this call (inverted ranges).
pub fn query(
    snapshot: &Snapshot,
    filters: &QueryFilters,
    order: QueryOrder,
    now: f64,
) -> Result<QueryResult> {
    let (compiled, warnings) = CompiledFilters::compile(filters, now)?;

    let matched: Vec<&Arc<CanonicalRecord>> =
        snapshot.iter().filter(|r| compiled.matches(r)).collect();

    let records: Vec<Arc<CanonicalRecord>> = match order {
        QueryOrder::Recent => matched
            .iter()
            .rev()
            .take(compiled.limit)
            .map(|r| Arc::clone(r))
            .collect(),
        QueryOrder::Listing => {
            let mut sorted = matched.clone();
            sorted.sort_by(|a, b| a.received_at.total_cmp(&b.received_at));
            let start = sorted.len().saturating_sub(compiled.limit);
            sorted[start..].iter().rev().map(|r| Arc::clone(r)).collect()
        }
    };

    let oldest = matched.iter().map(|r| r.received_at).reduce(f64::min);
    let newest = matched.iter().map(|r| r.received_at).reduce(f64::max);

    tracing::debug!(
        buffer = ?snapshot.kind,
        matched = matched.len(),
        returned = records.len(),
        "Query executed"
    );

    Ok(QueryResult {
        total_matched: matched.len(),
        total_buffered: snapshot.len(),
        limit: compiled.limit,
        statistics: collect_statistics(&matched),
        warnings,
        time_bounds: TimeBounds::new(oldest, newest),
        records,
    })
}

fn collect_statistics(records: &[&Arc<CanonicalRecord>]) -> QueryStatistics {
    let mut hosts: HashMap<String, usize> = HashMap::new();
    let mut content_types: HashMap<String, usize> = HashMap::new();
    let mut statuses: HashMap<String, usize> = HashMap::new();
    let mut flagged_count = 0;

    for record in records {
        if !record.host.is_empty() {
            *hosts.entry(record.host.clone()).or_default() += 1;
        }
        let base = record.base_content_type();
        if !base.is_empty() {
            *content_types.entry(base).or_default() += 1;
        }
        *statuses.entry(record.status_code.to_string()).or_default() += 1;
        if risk::classify(record).is_flagged() {
            flagged_count += 1;
        }
    }

    QueryStatistics {
        top_hosts: top_n(hosts),
        content_types: top_n(content_types),
        status_codes: top_n(statuses),
        flagged_count,
    }
}

/// Most frequent keys first, ties broken by key.
fn top_n(counts: HashMap<String, usize>) -> Vec<KeyCount> {
    let mut rows: Vec<KeyCount> = counts
        .into_iter()
        .map(|(key, count)| KeyCount { key, count })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    rows.truncate(TOP_N);
    rows
}

fn epoch_iso(secs: f64) -> String {
    let millis = (secs * 1000.0).round() as i64;
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::session::store::BufferKind;

    fn record(id: &str, host: &str, status: u16, received_at: f64) -> Arc<CanonicalRecord> {
        let mut record = CanonicalRecord::minimal(id.to_string(), received_at, String::new());
        record.host = host.to_string();
        record.url = format!("http://{}/{}", host, id);
        record.method = "GET".to_string();
        record.status_code = status;
        record.content_type = "text/html; charset=utf-8".to_string();
        Arc::new(record)
    }

    fn snapshot(records: Vec<Arc<CanonicalRecord>>) -> Snapshot {
        Snapshot::new(BufferKind::All, records)
    }

    fn ids(result: &QueryResult) -> Vec<&str> {
        result.records.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_recent_order_newest_first() {
        let snap = snapshot((0..10).map(|i| record(&i.to_string(), "a.com", 200, 100.0 + i as f64)).collect());
        let filters = QueryFilters {
            limit: Some(3),
            ..Default::default()
        };
        let result = query(&snap, &filters, QueryOrder::Recent, 1_000.0).unwrap();
        assert_eq!(ids(&result), vec!["9", "8", "7"]);
        assert_eq!(result.total_matched, 10);
        assert_eq!(result.total_buffered, 10);
        assert_eq!(result.limit, 3);
    }

    #[test]
    fn test_listing_sorts_by_reception_time() {
        let snap = snapshot(vec![
            record("late", "a.com", 200, 300.0),
            record("early", "a.com", 200, 100.0),
            record("middle", "a.com", 200, 200.0),
        ]);
        let filters = QueryFilters {
            limit: Some(2),
            ..Default::default()
        };
        let listing = query(&snap, &filters, QueryOrder::Listing, 1_000.0).unwrap();
        assert_eq!(ids(&listing), vec!["late", "middle"]);

        let recent = query(&snap, &filters, QueryOrder::Recent, 1_000.0).unwrap();
        assert_eq!(ids(&recent), vec!["middle", "early"]);
    }

    #[test]
    fn test_equal_reception_times_keep_buffer_order() {
        let snap = snapshot(vec![
            record("A", "a.com", 200, 5.0),
            record("B", "a.com", 200, 5.0),
            record("C", "a.com", 200, 5.0),
        ]);
        let filters = QueryFilters::default();
        let listing = query(&snap, &filters, QueryOrder::Listing, 10.0).unwrap();
        assert_eq!(ids(&listing), vec!["C", "B", "A"]);
        let recent = query(&snap, &filters, QueryOrder::Recent, 10.0).unwrap();
        assert_eq!(ids(&recent), vec!["C", "B", "A"]);

        let limited = QueryFilters {
            limit: Some(2),
            ..Default::default()
        };
        let listing = query(&snap, &limited, QueryOrder::Listing, 10.0).unwrap();
        assert_eq!(ids(&listing), vec!["C", "B"]);
    }

    #[test]
    fn test_total_matched_counts_beyond_limit() {
        let snap = snapshot((0..20).map(|i| record(&i.to_string(), "a.com", 404, 1.0)).collect());
        let filters = QueryFilters {
            limit: Some(5),
            ..Default::default()
        };
        let result = query(&snap, &filters, QueryOrder::Recent, 1_000.0).unwrap();
        assert_eq!(result.records.len(), 5);
        assert_eq!(result.total_matched, 20);
        assert_eq!(result.statistics.status_codes, vec![KeyCount { key: "404".to_string(), count: 20 }]);
    }

    #[test]
    fn test_statistics_over_matched_set() {
        let mut flagged = CanonicalRecord::minimal("f".to_string(), 5.0, String::new());
        flagged.host = "b.com".to_string();
        flagged.status_code = 200;
        flagged.threat_annotation = Some("High: eval".to_string());
        let snap = snapshot(vec![
            record("1", "a.com", 200, 1.0),
            record("2", "a.com", 404, 2.0),
            record("3", "c.com", 200, 3.0),
            Arc::new(flagged),
        ]);
        let result = query(&snap, &QueryFilters::default(), QueryOrder::Recent, 10.0).unwrap();
        let stats = &result.statistics;
        assert_eq!(stats.flagged_count, 1);
        assert_eq!(stats.top_hosts[0], KeyCount { key: "a.com".to_string(), count: 2 });
        assert_eq!(stats.top_hosts[1].key, "b.com");
        assert_eq!(stats.top_hosts[2].key, "c.com");
        assert_eq!(stats.content_types, vec![KeyCount { key: "text/html".to_string(), count: 3 }]);
        assert_eq!(stats.status_codes[0], KeyCount { key: "200".to_string(), count: 3 });
        assert_eq!(result.time_bounds.oldest, Some(1.0));
        assert_eq!(result.time_bounds.newest, Some(5.0));
        assert_eq!(
            result.time_bounds.newest_iso.as_deref(),
            Some("1970-01-01T00:00:05.000Z")
        );
    }

    #[test]
    fn test_empty_result() {
        let snap = snapshot(vec![record("1", "a.com", 200, 1.0)]);
        let filters = QueryFilters {
            host_pattern: Some("nomatch".to_string()),
            ..Default::default()
        };
        let result = query(&snap, &filters, QueryOrder::Listing, 10.0).unwrap();
        assert!(result.records.is_empty());
        assert_eq!(result.total_matched, 0);
        assert_eq!(result.time_bounds, TimeBounds::default());
    }

    #[test]
    fn test_invalid_filter_rejects_call() {
        let snap = snapshot(vec![record("1", "a.com", 200, 1.0)]);
        let filters = QueryFilters {
            status_min: Some(300),
            status_max: Some(200),
            ..Default::default()
        };
        let err = query(&snap, &filters, QueryOrder::Recent, 10.0).unwrap_err();
        assert!(matches!(err, Error::InvalidFilter { .. }));
    }

    #[test]
    fn test_warning_surfaces_in_result() {
        let snap = snapshot(vec![record("1", "a.com", 200, 1.0)]);
        let filters = QueryFilters {
            host_pattern: Some("*bad".to_string()),
            ..Default::default()
        };
        let result = query(&snap, &filters, QueryOrder::Recent, 10.0).unwrap();
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.total_matched, 1);
    }

    #[test]
    fn test_result_records_satisfy_filters() {
        let snap = snapshot(
            (0..30)
                .map(|i| {
                    let host = if i % 2 == 0 { "even.com" } else { "odd.com" };
                    record(&i.to_string(), host, 200 + (i % 5) as u16 * 100, i as f64)
                })
                .collect(),
        );
        let filters = QueryFilters {
            host_pattern: Some("even".to_string()),
            status_min: Some(300),
            status_max: Some(400),
            ..Default::default()
        };
        let result = query(&snap, &filters, QueryOrder::Recent, 100.0).unwrap();
        assert!(!result.records.is_empty());
        for r in &result.records {
            assert_eq!(r.host, "even.com");
            assert!((300..=400).contains(&r.status_code));
        }
    }
}
