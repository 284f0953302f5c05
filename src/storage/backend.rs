//! Store traits for the pipeline's external collaborators
//!
//! The pipeline reads from three independent sources and writes to one:
//!
//! - [`StructuredStore`]: the CMS collection store (projects, characters, ...)
//! - [`KnowledgeStore`]: the semantic knowledge store, also the write target
//! - [`DynamicStore`]: per-project document databases with free-form collections
//!
//! # Design Principles
//!
//! 1. **Async Interface**: every call may cross the network.
//! 2. **Own deadlines**: implementations enforce their own timeouts; the
//!    pipeline only adds an optional whole-request deadline.
//! 3. **Thread-safe**: implementations are shared behind `Arc` across tasks.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{EnrichedDocument, Fields, SimilarNode};

/// CMS collection store
#[async_trait]
pub trait StructuredStore: Send + Sync {
    /// Documents of `collection` whose fields equal every entry of `filter`
    async fn find(&self, collection: &str, filter: &Fields, limit: usize) -> Result<Vec<Fields>>;

    /// A single document by id
    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Fields>>;
}

/// Semantic knowledge store
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Insert or replace a node keyed by `document.id`
    async fn add_node(&self, document: &EnrichedDocument) -> Result<()>;

    /// Nodes most similar to `query` within a project
    async fn search_similar(
        &self,
        query: &str,
        limit: usize,
        project_id: &str,
    ) -> Result<Vec<SimilarNode>>;

    async fn get_node(&self, id: &str) -> Result<Option<EnrichedDocument>>;

    /// Returns whether a node was removed
    async fn delete_node(&self, id: &str) -> Result<bool>;
}

/// Per-project dynamic document store
#[async_trait]
pub trait DynamicStore: Send + Sync {
    async fn list_collections(&self, project_id: &str) -> Result<Vec<String>>;

    async fn find(
        &self,
        project_id: &str,
        collection: &str,
        filter: &Fields,
        limit: usize,
    ) -> Result<Vec<Fields>>;

    async fn count_documents(&self, project_id: &str, collection: &str) -> Result<u64>;
}
