//! Store interfaces and in-process implementations

pub mod backend;
pub mod memory;

pub use backend::{DynamicStore, KnowledgeStore, StructuredStore};
pub use memory::{InMemoryDynamicStore, InMemoryKnowledgeStore, InMemoryStructuredStore};
