//! Filtering, search and aggregation over session snapshots

pub mod engine;
pub mod filter;
pub mod timeline;

pub use engine::{query, KeyCount, QueryOrder, QueryResult, QueryStatistics, TimeBounds};
pub use filter::{content_type_matches, FilterWarning, QueryFilters, MAX_LIMIT};
pub use timeline::{aggregate, GroupBy, Timeline, TimelineBucket, TimelineRequest, TimelineSample};
