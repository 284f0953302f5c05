//! Brainprep - data preparation for the production knowledge store
//!
//! Every entity headed for the semantic knowledge store passes through one
//! pipeline: context gathering across independent stores, LLM-generated
//! metadata and relationships, enrichment, validation, and a single commit,
//! either inline or through the async job queue.

pub mod agent;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod hooks;
pub mod intelligence;
pub mod interceptor;
pub mod llm;
pub mod queue;
pub mod storage;
pub mod types;

pub use agent::{AgentDeps, DataPreparationAgent, Preparer};
pub use config::{ConfigRegistry, PipelineConfig};
pub use error::{ErrorKind, PrepError, Result};
pub use hooks::{HookAdapter, HookConfig};
pub use interceptor::{BrainInterceptor, StoreAck, StoreOptions};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
