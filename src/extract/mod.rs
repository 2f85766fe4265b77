//! Budgeted evidence extraction from large bodies

mod extractor;
mod patterns;

pub use extractor::{
    ContentExtractor, Extraction, ExtractionMetadata, ExtractionMethod, Snippet, DEFAULT_BUDGET,
};
pub use patterns::{compile_catalogue, PatternCategory, SecurityPattern};
