//! Captured session records, normalization and bounded storage

pub mod buffer;
pub mod normalize;
pub mod store;
pub mod types;

pub use buffer::BoundedBuffer;
pub use normalize::{normalize, NormalizeOutcome, Normalized, FIELD_ALIASES};
pub use store::{BufferCounts, BufferKind, IngestReceipt, SessionStore, Snapshot};
pub use types::{base_mime, CanonicalRecord, HeaderMap, HeaderValue};
