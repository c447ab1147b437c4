//! Graph service scenarios through the engine facade

use std::sync::Arc;

use mnemograph::config::Config;
use mnemograph::engine::MemoryEngine;
use mnemograph::memory::graph::LinkOptions;
use mnemograph::memory::types::{EdgeType, MemoryDraft};
use mnemograph::storage::{Direction, ExpandOptions, InMemoryBackend, NeighborOptions, SqliteBackend};
use mnemograph::testing::StubEmbedder;

async fn engine_with(backend: Arc<dyn mnemograph::storage::Backend>) -> MemoryEngine {
    MemoryEngine::assemble(
        Config::default(),
        backend,
        Some(Arc::new(StubEmbedder::new(3))),
        None,
    )
    .await
    .unwrap()
}

async fn seed_chain(engine: &MemoryEngine) {
    let ctx = engine.context("a1");
    for id in ["A", "B", "C"] {
        engine
            .remember(
                &ctx,
                MemoryDraft::new(format!("memory {id}")).id(id).confidence(0.9),
            )
            .await
            .unwrap();
    }
    for (from, to) in [("A", "B"), ("B", "C")] {
        engine
            .link(
                &ctx,
                from,
                to,
                EdgeType::RelatesTo,
                LinkOptions {
                    weight: 0.8,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }
}

async fn check_expansion_depths(engine: MemoryEngine) {
    seed_chain(&engine).await;
    let ctx = engine.context("a1");

    let deep = engine
        .expand(
            &ctx,
            &["A".to_string()],
            &ExpandOptions {
                depth: 2,
                min_weight: 0.3,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let mut ids: Vec<&str> = deep.memories.iter().map(|m| m.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["A", "B", "C"]);
    let mut pairs: Vec<(&str, &str)> = deep
        .edges
        .iter()
        .map(|e| (e.from_id.as_str(), e.to_id.as_str()))
        .collect();
    pairs.sort();
    assert_eq!(pairs, vec![("A", "B"), ("B", "C")]);

    let shallow = engine
        .expand(
            &ctx,
            &["A".to_string()],
            &ExpandOptions {
                depth: 1,
                min_weight: 0.3,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let mut ids: Vec<&str> = shallow.memories.iter().map(|m| m.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["A", "B"]);
    assert_eq!(shallow.edges.len(), 1);
    assert_eq!(shallow.edges[0].from_id, "A");
    assert_eq!(shallow.edges[0].to_id, "B");
}

#[tokio::test]
async fn expansion_depths_in_memory() {
    check_expansion_depths(engine_with(Arc::new(InMemoryBackend::new())).await).await;
}

#[tokio::test]
async fn expansion_depths_sqlite() {
    let backend = SqliteBackend::open_in_memory().await.unwrap();
    check_expansion_depths(engine_with(Arc::new(backend)).await).await;
}

#[tokio::test]
async fn linking_twice_is_idempotent() {
    let engine = engine_with(Arc::new(InMemoryBackend::new())).await;
    let ctx = engine.context("a1");
    for id in ["M1", "M2"] {
        engine
            .remember(&ctx, MemoryDraft::new(format!("memory {id}")).id(id))
            .await
            .unwrap();
    }

    let opts = LinkOptions {
        weight: 0.8,
        ..Default::default()
    };
    let first = engine
        .link(&ctx, "M1", "M2", EdgeType::Supports, opts.clone())
        .await
        .unwrap();
    let second = engine
        .link(&ctx, "M1", "M2", EdgeType::Supports, opts)
        .await
        .unwrap();
    assert_eq!(first.id, second.id);

    let neighbors = engine
        .neighbors(&ctx, "M1", Direction::Outgoing, &NeighborOptions::default())
        .await
        .unwrap();
    assert_eq!(neighbors.len(), 1);
    assert_eq!(neighbors[0].memory.id, "M2");
    assert_eq!(neighbors[0].edge.edge_type, EdgeType::Supports);
}

#[tokio::test]
async fn neighbors_directions_and_filters() {
    let engine = engine_with(Arc::new(InMemoryBackend::new())).await;
    let ctx = engine.context("a1");
    for id in ["hub", "up", "down"] {
        engine
            .remember(&ctx, MemoryDraft::new(format!("memory {id}")).id(id))
            .await
            .unwrap();
    }
    engine
        .link(
            &ctx,
            "hub",
            "down",
            EdgeType::Causes,
            LinkOptions {
                weight: 0.9,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    engine
        .link(
            &ctx,
            "up",
            "hub",
            EdgeType::Follows,
            LinkOptions {
                weight: 0.2,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let outgoing = engine
        .neighbors(&ctx, "hub", Direction::Outgoing, &NeighborOptions::default())
        .await
        .unwrap();
    assert_eq!(outgoing.len(), 1);
    assert_eq!(outgoing[0].memory.id, "down");

    let incoming = engine
        .neighbors(&ctx, "hub", Direction::Incoming, &NeighborOptions::default())
        .await
        .unwrap();
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].memory.id, "up");

    let both = engine
        .neighbors(&ctx, "hub", Direction::Both, &NeighborOptions::default())
        .await
        .unwrap();
    assert_eq!(both.len(), 2);

    let heavy = engine
        .neighbors(
            &ctx,
            "hub",
            Direction::Both,
            &NeighborOptions {
                min_weight: 0.5,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(heavy.len(), 1);
    assert_eq!(heavy[0].memory.id, "down");

    let typed = engine
        .neighbors(
            &ctx,
            "hub",
            Direction::Both,
            &NeighborOptions {
                edge_type: Some(EdgeType::Follows),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(typed.len(), 1);
    assert_eq!(typed[0].memory.id, "up");
}

#[tokio::test]
async fn expansion_only_follows_outgoing_edges() {
    let engine = engine_with(Arc::new(InMemoryBackend::new())).await;
    let ctx = engine.context("a1");
    for id in ["start", "downstream", "upstream"] {
        engine
            .remember(&ctx, MemoryDraft::new(format!("memory {id}")).id(id).confidence(0.9))
            .await
            .unwrap();
    }
    engine
        .link(
            &ctx,
            "start",
            "downstream",
            EdgeType::RelatesTo,
            LinkOptions {
                weight: 0.9,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    engine
        .link(
            &ctx,
            "upstream",
            "start",
            EdgeType::RelatesTo,
            LinkOptions {
                weight: 0.9,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let result = engine
        .expand(&ctx, &["start".to_string()], &ExpandOptions::default())
        .await
        .unwrap();
    let mut ids: Vec<&str> = result.memories.iter().map(|m| m.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["downstream", "start"]);
}
