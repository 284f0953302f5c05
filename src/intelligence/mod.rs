//! Pipeline stages that interpret entities
//!
//! Provides:
//! - Config-bound metadata generation with per-field fallback
//! - Relationship discovery, confidence-filtered and capped
//! - Enrichment (searchable text, context summary, quality score)
//! - Document validation

pub mod enricher;
pub mod metadata;
pub mod relationships;
pub mod validator;

pub use enricher::{summarize_context, DataEnricher, EnrichedRepresentation, QualitySignals};
pub use metadata::{MetadataGenerator, MetadataOutcome};
pub use relationships::{
    collect_candidates, filter_suggestions, Candidate, DiscoveryOutcome, RelationshipDiscoverer,
};
pub use validator::{Validator, MAX_TEXT_CHARS, MIN_TEXT_CHARS};
