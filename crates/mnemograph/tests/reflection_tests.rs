//! Reflection synthesis scenarios

use async_trait::async_trait;
use std::sync::Arc;

use mnemograph::config::Config;
use mnemograph::engine::MemoryEngine;
use mnemograph::error::{MnemographError, Result};
use mnemograph::memory::reflection::{ReflectOptions, ReflectOutcome, ReflectionAdapter};
use mnemograph::memory::types::{EdgeType, Memory, MemoryDraft, MemoryType, Scope};
use mnemograph::storage::{Direction, InMemoryBackend, NeighborOptions};
use mnemograph::testing::StubEmbedder;

const TOPIC_QUERY: &str = "travel plans";

fn stub_for_topic() -> StubEmbedder {
    // The topic query and the three source memories share a direction so
    // recall returns them all
    StubEmbedder::new(3)
        .with_vector(TOPIC_QUERY, vec![1.0, 0.0, 0.0])
        .with_vector("booked flights to Paris", vec![1.0, 0.1, 0.0])
        .with_vector("hotel is near the Louvre", vec![1.0, 0.0, 0.1])
        .with_vector("museum tickets for Tuesday", vec![0.9, 0.1, 0.1])
}

async fn engine_with_adapter(adapter: Option<Arc<dyn ReflectionAdapter>>) -> MemoryEngine {
    let mut config = Config::default();
    config.reflection.use_adapter = adapter.is_some();
    MemoryEngine::assemble(
        config,
        Arc::new(InMemoryBackend::new()),
        Some(Arc::new(stub_for_topic())),
        adapter,
    )
    .await
    .unwrap()
}

async fn seed_sources(engine: &MemoryEngine) {
    let ctx = engine.context("a1");
    for (id, content) in [
        ("flights", "booked flights to Paris"),
        ("hotel", "hotel is near the Louvre"),
        ("tickets", "museum tickets for Tuesday"),
    ] {
        let stored = engine
            .remember(&ctx, MemoryDraft::new(content).id(id).confidence(0.8))
            .await
            .unwrap();
        engine.index_now(&ctx, &stored.id).await.unwrap();
    }
}

#[tokio::test]
async fn reflect_with_too_few_memories_fails() {
    let engine = engine_with_adapter(None).await;
    let ctx = engine.context("a1");

    let err = engine
        .reflect(
            &ctx,
            &ReflectOptions {
                topic: Some(TOPIC_QUERY.to_string()),
                min_memories: 3,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MnemographError::InsufficientMemories { found: 0, required: 3 }
    ));
}

#[tokio::test]
async fn reflect_stores_reflection_and_links_sources() {
    let engine = engine_with_adapter(None).await;
    seed_sources(&engine).await;
    let ctx = engine.context("a1");

    let outcome = engine
        .reflect(
            &ctx,
            &ReflectOptions {
                topic: Some(TOPIC_QUERY.to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let ReflectOutcome::Stored(reflection) = outcome else {
        panic!("expected a stored reflection");
    };

    assert_eq!(reflection.memory_type, MemoryType::Reflection);
    assert_eq!(reflection.scope, Scope::Private);
    assert!((reflection.importance - 0.8).abs() < 0.001);
    // Source confidences are all 0.8, so 0.8 + 0.1
    assert!((reflection.confidence - 0.9).abs() < 0.001);
    assert!(reflection.summary.starts_with("Reflection about travel plans"));
    let sources = reflection.metadata.get("source_memory_ids").unwrap();
    assert_eq!(sources.as_array().unwrap().len(), 3);

    // Restrict to supports edges: background indexing of the reflection
    // may add relates_to links of its own
    let neighbors = engine
        .neighbors(
            &ctx,
            &reflection.id,
            Direction::Outgoing,
            &NeighborOptions {
                edge_type: Some(EdgeType::Supports),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(neighbors.len(), 3);
    for n in &neighbors {
        assert_eq!(n.edge.edge_type, EdgeType::Supports);
        assert!((n.edge.weight - 0.7).abs() < 0.001);
    }
}

#[tokio::test]
async fn reflect_without_store_returns_text() {
    let engine = engine_with_adapter(None).await;
    seed_sources(&engine).await;
    let ctx = engine.context("a1");

    let outcome = engine
        .reflect(
            &ctx,
            &ReflectOptions {
                topic: Some(TOPIC_QUERY.to_string()),
                store: false,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let ReflectOutcome::Text(text) = outcome else {
        panic!("expected reflection text");
    };
    assert!(text.starts_with("Reflection about travel plans from 3 memories:"));
    assert_eq!(text.matches("\n- [fact] ").count(), 3);
}

struct CannedAdapter;

#[async_trait]
impl ReflectionAdapter for CannedAdapter {
    async fn reflect(&self, memories: &[Memory], topic: Option<&str>) -> Result<String> {
        Ok(format!(
            "Synthesis of {} about {}\nEverything points to a Paris trip.",
            memories.len(),
            topic.unwrap_or("nothing")
        ))
    }
}

#[tokio::test]
async fn reflect_uses_configured_adapter() {
    let engine = engine_with_adapter(Some(Arc::new(CannedAdapter))).await;
    seed_sources(&engine).await;
    let ctx = engine.context("a1");

    let outcome = engine
        .reflect(
            &ctx,
            &ReflectOptions {
                topic: Some(TOPIC_QUERY.to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let ReflectOutcome::Stored(reflection) = outcome else {
        panic!("expected a stored reflection");
    };
    // First line becomes the summary, the rest the content
    assert_eq!(reflection.summary, "Synthesis of 3 about travel plans");
    assert_eq!(reflection.content, "Everything points to a Paris trip.");
}
