//! Performance benchmarks for the preparation pipeline

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::{json, Value};

use brainprep::cache::CacheManager;
use brainprep::config::{CacheTtlConfig, ConfigRegistry, PipelineConfig};
use brainprep::intelligence::{
    filter_suggestions, Candidate, DataEnricher, MetadataOutcome, Validator,
};
use brainprep::llm::DisabledLlm;
use brainprep::storage::{InMemoryDynamicStore, InMemoryKnowledgeStore, InMemoryStructuredStore};
use brainprep::types::*;
use brainprep::{AgentDeps, DataPreparationAgent};

fn entity(i: usize) -> RawEntity {
    RawEntity::from_value(
        "character",
        json!({
            "id": format!("char_{}", i),
            "name": format!("Character {}", i),
            "description": "A street rat from Agrabah who falls for the princess and finds a lamp",
            "personality": "clever, restless, kind",
        }),
    )
    .unwrap_or_else(|| panic!("entity {} is an object", i))
}

fn context(neighbours: usize) -> GatheredContext {
    let mut context = GatheredContext::empty(ProjectContext::unknown("proj_bench"));
    context.project.name = "Desert Tales".into();
    context.related_entities.insert(
        "characters".into(),
        (0..neighbours)
            .map(|i| RelatedEntity {
                id: format!("char_{}", i + 1000),
                name: format!("Neighbour {}", i),
                collection: "characters".into(),
                matched_on: "description".into(),
            })
            .collect(),
    );
    context
}

fn outcome() -> MetadataOutcome {
    let metadata: Fields = [
        ("summary", json!("A clever thief with a good heart")),
        ("keywords", json!(["agrabah", "lamp", "thief"])),
        ("archetype", json!("trickster")),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    MetadataOutcome {
        metadata,
        llm_fields: vec!["summary".into(), "keywords".into(), "archetype".into()],
        ..Default::default()
    }
}

fn bench_document_id(c: &mut Criterion) {
    c.bench_function("document_id", |b| {
        b.iter(|| document_id(black_box("character"), black_box("char_1"), black_box("proj_x")))
    });
}

fn bench_enrich(c: &mut Criterion) {
    let enricher = DataEnricher::new();
    let raw = entity(1);
    let outcome = outcome();

    let mut group = c.benchmark_group("enrich");
    for neighbours in [0, 10, 100] {
        let ctx = context(neighbours);
        group.bench_with_input(BenchmarkId::from_parameter(neighbours), &ctx, |b, ctx| {
            b.iter(|| enricher.enrich(black_box(&raw), ctx, &outcome))
        });
    }
    group.finish();
}

fn bench_validate(c: &mut Criterion) {
    let validator = Validator::new(Arc::new(ConfigRegistry::with_defaults()));
    let doc = EnrichedDocument {
        id: document_id("character", "char_1", "proj_x"),
        doc_type: "character".into(),
        project_id: "proj_x".into(),
        text: "Character: Aladdin. A street rat from Agrabah.".repeat(20),
        metadata: outcome().metadata,
        relationships: vec![],
    };

    c.bench_function("validate", |b| b.iter(|| validator.validate(black_box(&doc))));
}

fn bench_filter_suggestions(c: &mut Criterion) {
    let config = ConfigRegistry::with_defaults().resolve(EntityKind::Character);
    let candidates: Vec<Candidate> = (0..50)
        .map(|i| Candidate {
            id: format!("char_{}", i),
            name: format!("Character {}", i),
            entity_type: "character".into(),
        })
        .collect();

    let mut group = c.benchmark_group("filter_suggestions");
    for count in [10usize, 100, 1000] {
        let suggestions: Vec<RelationshipSuggestion> = (0..count)
            .map(|i| RelationshipSuggestion {
                relationship_type: if i % 2 == 0 { "knows" } else { "rivals" }.into(),
                target_id: format!("char_{}", i % 60),
                target_type: String::new(),
                confidence: (i % 100) as f32 / 100.0,
                reasoning: String::new(),
            })
            .collect();
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &suggestions, |b, s| {
            b.iter(|| filter_suggestions(s.clone(), &candidates, &config))
        });
    }
    group.finish();
}

fn bench_prepare(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let structured = InMemoryStructuredStore::new();
    for i in 0..100 {
        structured.insert(
            "characters",
            json!({"id": format!("char_{}", i + 1000), "project": "proj_x", "name": format!("Neighbour {}", i)})
                .as_object()
                .cloned()
                .unwrap_or_default(),
        );
    }

    let mut config = PipelineConfig::default();
    config.features.enable_caching = false;
    let deps = AgentDeps {
        llm: Arc::new(DisabledLlm),
        structured: Arc::new(structured),
        knowledge: Arc::new(InMemoryKnowledgeStore::new()),
        dynamic: Arc::new(InMemoryDynamicStore::new()),
        cache: Arc::new(CacheManager::in_memory(CacheTtlConfig::default())),
        registry: Arc::new(ConfigRegistry::with_defaults()),
    };
    let agent = DataPreparationAgent::new(deps, config).unwrap();
    let options = PrepareOptions::new("proj_x", "character");

    c.bench_function("prepare_fallback", |b| {
        b.iter(|| {
            rt.block_on(agent.prepare(black_box(&entity(1)), &options))
                .map(|doc| doc.metadata.get("qualityScore").cloned().unwrap_or(Value::Null))
        })
    });
}

criterion_group!(
    benches,
    bench_document_id,
    bench_enrich,
    bench_validate,
    bench_filter_suggestions,
    bench_prepare,
);
criterion_main!(benches);
