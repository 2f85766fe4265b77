//! Traffic timeline aggregation

use crate::session::store::Snapshot;
use crate::session::types::CanonicalRecord;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_WINDOW_MINUTES: u64 = 60;
pub const MAX_WINDOW_MINUTES: u64 = 180;
pub const MAX_SAMPLES_PER_BUCKET: usize = 20;

/// Bucketing key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    #[default]
    Minute,
    Host,
    StatusCode,
    ContentType,
}

impl std::str::FromStr for GroupBy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minute" => Ok(Self::Minute),
            "host" => Ok(Self::Host),
            "status_code" | "status" => Ok(Self::StatusCode),
            "content_type" => Ok(Self::ContentType),
            other => Err(format!("Unknown grouping: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimelineRequest {
    #[serde(default)]
    pub group_by: GroupBy,
    pub window_minutes: Option<u64>,
    #[serde(default)]
    pub include_samples: bool,
    pub host_filter: Option<String>,
}

impl TimelineRequest {
    pub fn effective_window(&self) -> u64 {
        match self.window_minutes {
            Some(0) | None => DEFAULT_WINDOW_MINUTES,
            Some(minutes) => minutes.min(MAX_WINDOW_MINUTES),
        }
    }
}

/// Short description of one record inside a bucket
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineSample {
    pub id: String,
    pub time: String,
    pub url: String,
    pub host: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimelineBucket {
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samples: Option<Vec<TimelineSample>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timeline {
    pub buckets: BTreeMap<String, TimelineBucket>,
    pub entries: usize,
    pub total_sessions: usize,
    pub group_by: GroupBy,
    pub window_minutes: u64,
    pub host_filter: Option<String>,
}

/// Group the snapshot's records within the window into buckets.
pub fn aggregate(snapshot: &Snapshot, request: &TimelineRequest, now: f64) -> Timeline {
    let window_minutes = request.effective_window();
    let cutoff = now - (window_minutes * 60) as f64;
    let host_filter = request
        .host_filter
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_lowercase);

    let mut buckets: BTreeMap<String, TimelineBucket> = BTreeMap::new();
    let mut total_sessions = 0;

    for record in snapshot.iter() {
        if record.received_at < cutoff {
            continue;
        }
        if let Some(filter) = &host_filter {
            if !record.host.to_lowercase().contains(filter.as_str()) {
                continue;
            }
        }

        let bucket = buckets
            .entry(bucket_key(record, request.group_by))
            .or_insert_with(|| TimelineBucket {
                count: 0,
                samples: request.include_samples.then(Vec::new),
            });
        bucket.count += 1;
        total_sessions += 1;

        if let Some(samples) = bucket.samples.as_mut() {
            if samples.len() < MAX_SAMPLES_PER_BUCKET {
                samples.push(sample(record));
            }
        }
    }

    Timeline {
        entries: buckets.len(),
        total_sessions,
        buckets,
        group_by: request.group_by,
        window_minutes,
        host_filter,
    }
}

fn bucket_key(record: &CanonicalRecord, group_by: GroupBy) -> String {
    match group_by {
        GroupBy::Minute => local_time(record, "%Y-%m-%d %H:%M"),
        GroupBy::Host => or_unknown(record.host.clone()),
        GroupBy::StatusCode => record.status_code.to_string(),
        GroupBy::ContentType => or_unknown(record.base_content_type()),
    }
}

fn or_unknown(value: String) -> String {
    if value.is_empty() {
        "unknown".to_string()
    } else {
        value
    }
}

fn local_time(record: &CanonicalRecord, fmt: &str) -> String {
    record
        .received_at_utc()
        .with_timezone(&Local)
        .format(fmt)
        .to_string()
}

fn sample(record: &CanonicalRecord) -> TimelineSample {
    TimelineSample {
        id: record.id.clone(),
        time: local_time(record, "%H:%M:%S"),
        url: record.url.clone(),
        host: record.host.clone(),
        status: record.status_code.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::store::BufferKind;
    use std::sync::Arc;

    const NOW: f64 = 1_700_000_000.0;

    fn record(id: &str, host: &str, status: u16, age_secs: f64) -> Arc<CanonicalRecord> {
        let mut record = CanonicalRecord::minimal(id.to_string(), NOW - age_secs, String::new());
        record.host = host.to_string();
        record.status_code = status;
        record.content_type = "application/json; charset=utf-8".to_string();
        Arc::new(record)
    }

    fn snapshot(records: Vec<Arc<CanonicalRecord>>) -> Snapshot {
        Snapshot::new(BufferKind::All, records)
    }

    #[test]
    fn test_group_by_host_with_window() {
        let snap = snapshot(vec![
            record("1", "a.com", 200, 7_200.0),
            record("2", "a.com", 200, 30.0),
            record("3", "b.com", 404, 20.0),
            record("4", "", 500, 10.0),
        ]);
        let request = TimelineRequest {
            group_by: GroupBy::Host,
            ..Default::default()
        };
        let timeline = aggregate(&snap, &request, NOW);
        assert_eq!(timeline.window_minutes, 60);
        assert_eq!(timeline.total_sessions, 3);
        assert_eq!(timeline.entries, 3);
        assert_eq!(timeline.buckets["a.com"].count, 1);
        assert_eq!(timeline.buckets["unknown"].count, 1);
        assert!(timeline.buckets["b.com"].samples.is_none());
    }

    #[test]
    fn test_window_capped() {
        let request = TimelineRequest {
            window_minutes: Some(10_000),
            ..Default::default()
        };
        assert_eq!(request.effective_window(), 180);
        let snap = snapshot(vec![
            record("1", "a.com", 200, 179.0 * 60.0),
            record("2", "a.com", 200, 181.0 * 60.0),
        ]);
        assert_eq!(aggregate(&snap, &request, NOW).total_sessions, 1);
    }

    #[test]
    fn test_group_by_status_and_content_type() {
        let snap = snapshot(vec![
            record("1", "a.com", 200, 1.0),
            record("2", "a.com", 200, 2.0),
            record("3", "a.com", 302, 3.0),
        ]);
        let by_status = aggregate(
            &snap,
            &TimelineRequest {
                group_by: GroupBy::StatusCode,
                ..Default::default()
            },
            NOW,
        );
        let keys: Vec<&str> = by_status.buckets.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["200", "302"]);

        let by_type = aggregate(
            &snap,
            &TimelineRequest {
                group_by: GroupBy::ContentType,
                ..Default::default()
            },
            NOW,
        );
        assert_eq!(by_type.buckets["application/json"].count, 3);
    }

    #[test]
    fn test_minute_buckets_sorted() {
        let snap = snapshot(vec![
            record("1", "a.com", 200, 600.0),
            record("2", "a.com", 200, 300.0),
            record("3", "a.com", 200, 0.0),
        ]);
        let timeline = aggregate(&snap, &TimelineRequest::default(), NOW);
        assert_eq!(timeline.entries, 3);
        let keys: Vec<&String> = timeline.buckets.keys().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(keys[2].len(), "2023-11-14 22:13".len());
    }

    #[test]
    fn test_samples_capped_and_host_filter() {
        let mut records: Vec<_> = (0..30)
            .map(|i| record(&i.to_string(), "cdn.example.com", 200, 1.0))
            .collect();
        records.push(record("x", "other.org", 200, 1.0));
        let snap = snapshot(records);
        let request = TimelineRequest {
            group_by: GroupBy::Host,
            include_samples: true,
            host_filter: Some("EXAMPLE".to_string()),
            ..Default::default()
        };
        let timeline = aggregate(&snap, &request, NOW);
        assert_eq!(timeline.entries, 1);
        let bucket = &timeline.buckets["cdn.example.com"];
        assert_eq!(bucket.count, 30);
        let samples = bucket.samples.as_ref().unwrap();
        assert_eq!(samples.len(), MAX_SAMPLES_PER_BUCKET);
        assert_eq!(samples[0].id, "0");
        assert_eq!(samples[0].status, "200");
    }

    #[test]
    fn test_samples_omitted_in_json() {
        let snap = snapshot(vec![record("1", "a.com", 200, 1.0)]);
        let timeline = aggregate(&snap, &TimelineRequest::default(), NOW);
        let json = serde_json::to_value(&timeline).unwrap();
        let bucket = json["buckets"].as_object().unwrap().values().next().unwrap();
        assert!(bucket.get("samples").is_none());
        assert_eq!(json["group_by"], "minute");
    }

    #[test]
    fn test_group_by_from_str() {
        assert_eq!("minute".parse::<GroupBy>().unwrap(), GroupBy::Minute);
        assert_eq!(" Host ".parse::<GroupBy>().unwrap(), GroupBy::Host);
        assert_eq!("status".parse::<GroupBy>().unwrap(), GroupBy::StatusCode);
        assert_eq!("content_type".parse::<GroupBy>().unwrap(), GroupBy::ContentType);
        assert!("weekday".parse::<GroupBy>().is_err());
    }
}
