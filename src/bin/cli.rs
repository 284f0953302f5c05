//! Brainprep CLI
//!
//! Runs the preparation pipeline over JSON files with in-memory stores.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use brainprep::cache::CacheManager;
use brainprep::config::{ConfigRegistry, PipelineConfig};
use brainprep::intelligence::Validator;
use brainprep::llm::{create_llm, LlmConfig};
use brainprep::storage::{InMemoryDynamicStore, InMemoryKnowledgeStore, InMemoryStructuredStore};
use brainprep::types::{EnrichedDocument, PrepareOptions, RawEntity};
use brainprep::{AgentDeps, DataPreparationAgent};

#[derive(Parser)]
#[command(name = "brainprep")]
#[command(about = "Prepare production entities for the knowledge store")]
#[command(version)]
struct Cli {
    /// LLM provider (openai, disabled)
    #[arg(long, env = "BRAINPREP_LLM", default_value = "disabled")]
    llm: String,

    /// API key for the LLM provider
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// OpenAI-compatible base URL
    #[arg(long, env = "OPENAI_BASE_URL")]
    base_url: Option<String>,

    /// Model name
    #[arg(long, env = "BRAINPREP_MODEL")]
    model: Option<String>,

    /// Extra entity configs (JSON array)
    #[arg(long, env = "BRAINPREP_CONFIGS")]
    configs: Option<String>,

    /// Emit logs as JSON
    #[arg(long, env = "BRAINPREP_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline over an entity file
    Prepare {
        /// Entity JSON file (object)
        file: String,
        /// Entity type
        #[arg(short = 't', long = "type")]
        entity_type: String,
        /// Project id
        #[arg(short, long, env = "BRAINPREP_PROJECT")]
        project: String,
        /// Seed data: {"collection": [records...]}
        #[arg(short, long)]
        seed: Option<String>,
        /// Write the document to the (in-memory) knowledge store
        #[arg(long)]
        commit: bool,
        /// Abort after this many milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,
    },
    /// Validate a prepared document file
    Validate {
        /// Document JSON file
        file: String,
    },
    /// Print the entity config registry
    Configs,
}

fn init_tracing(json: bool) {
    let registry = tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::from_default_env());
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .init();
    }
}

fn read_json(path: &str) -> anyhow::Result<serde_json::Value> {
    let path = PathBuf::from(shellexpand::tilde(path).to_string());
    let text = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn load_registry(configs: Option<&str>) -> anyhow::Result<ConfigRegistry> {
    let mut registry = ConfigRegistry::with_defaults();
    if let Some(path) = configs {
        let text = read_json(path)?.to_string();
        let count = registry.load_json(&text)?;
        tracing::info!(count, "Loaded entity configs");
    }
    Ok(registry)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let registry = Arc::new(load_registry(cli.configs.as_deref())?);

    match cli.command {
        Commands::Prepare {
            file,
            entity_type,
            project,
            seed,
            commit,
            deadline_ms,
        } => {
            let Some(raw) = RawEntity::from_value(&entity_type, read_json(&file)?) else {
                bail!("{} must contain a JSON object", file);
            };

            let structured = Arc::new(InMemoryStructuredStore::new());
            if let Some(seed) = seed {
                let serde_json::Value::Object(seed) = read_json(&seed)? else {
                    bail!("seed file must contain a JSON object of collections");
                };
                let loaded = structured.load(&seed);
                tracing::info!(loaded, "Seeded structured store");
            }
            let knowledge = Arc::new(InMemoryKnowledgeStore::new());

            let config = PipelineConfig::from_env()?;
            let llm = create_llm(&LlmConfig {
                provider: cli.llm,
                api_key: cli.api_key,
                base_url: cli.base_url,
                model: cli.model,
            })?;
            let deps = AgentDeps {
                llm,
                structured,
                knowledge: knowledge.clone(),
                dynamic: Arc::new(InMemoryDynamicStore::new()),
                cache: Arc::new(CacheManager::in_memory(config.cache.clone())),
                registry,
            };
            let agent = DataPreparationAgent::new(deps, config)?;

            let mut options = PrepareOptions::new(project, entity_type);
            if let Some(ms) = deadline_ms {
                options = options.with_deadline(std::time::Duration::from_millis(ms));
            }
            let document = agent.prepare(&raw, &options).await?;
            if commit {
                agent.commit(&document).await?;
                eprintln!("Committed {} ({} nodes)", document.id, knowledge.len());
            }
            println!("{}", serde_json::to_string_pretty(&document)?);
        }

        Commands::Validate { file } => {
            let document: EnrichedDocument = serde_json::from_value(read_json(&file)?)?;
            let result = Validator::new(registry).validate(&document);
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.valid {
                std::process::exit(1);
            }
        }

        Commands::Configs => {
            println!("{}", registry.to_json()?);
        }
    }

    Ok(())
}
