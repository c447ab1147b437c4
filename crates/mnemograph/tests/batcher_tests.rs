//! Batcher coalescing and timer semantics

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use mnemograph::config::BatcherConfig;
use mnemograph::embedding::EmbeddingBatcher;
use mnemograph::testing::StubEmbedder;

fn batcher_over(stub: StubEmbedder, batch_size: usize, timeout_ms: u64) -> EmbeddingBatcher {
    EmbeddingBatcher::new(
        Arc::new(stub),
        &BatcherConfig {
            batch_size,
            batch_timeout_ms: timeout_ms,
        },
        Duration::from_secs(5),
    )
}

/// Concurrent requests inside the batch window coalesce into a single
/// provider call, and every caller receives the vector for its own text
#[tokio::test]
async fn concurrent_requests_coalesce_into_one_call() {
    let mut stub = StubEmbedder::new(4);
    for i in 0..8 {
        stub = stub.with_vector(&format!("text-{i}"), vec![i as f32; 4]);
    }
    let calls = stub.batch_calls();
    let batcher = Arc::new(batcher_over(stub, 32, 40));

    let mut handles = Vec::new();
    for i in 0..8 {
        let batcher = batcher.clone();
        handles.push(tokio::spawn(async move {
            (i, batcher.request(&format!("text-{i}")).await.unwrap())
        }));
    }

    for handle in handles {
        let (i, vector) = handle.await.unwrap();
        assert_eq!(vector, vec![i as f32; 4], "caller {i} got someone else's vector");
    }
    assert_eq!(
        calls.load(Ordering::SeqCst),
        1,
        "eight requests within the window should make exactly one provider call"
    );
}

/// Reaching batch_size flushes immediately without waiting for the timer
#[tokio::test]
async fn size_trigger_beats_timer() {
    let stub = StubEmbedder::new(2);
    let calls = stub.batch_calls();
    // Timer effectively disabled: a whole minute
    let batcher = Arc::new(batcher_over(stub, 3, 60_000));

    let mut handles = Vec::new();
    for i in 0..3 {
        let batcher = batcher.clone();
        handles.push(tokio::spawn(async move {
            batcher.request(&format!("t{i}")).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// A timer armed for a batch that already flushed by size must not
/// disturb the next batch (stale nonce is discarded)
#[tokio::test]
async fn stale_timer_does_not_break_following_batches() {
    let stub = StubEmbedder::new(2);
    let calls = stub.batch_calls();
    let batcher = Arc::new(batcher_over(stub, 2, 30));

    // Fill the batch: flushes by size, leaving its timer to fire late
    let a = {
        let b = batcher.clone();
        tokio::spawn(async move { b.request("first").await })
    };
    let b_task = {
        let b = batcher.clone();
        tokio::spawn(async move { b.request("second").await })
    };
    a.await.unwrap().unwrap();
    b_task.await.unwrap().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Let the stale timer fire into an empty queue
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1, "stale timer must not flush");

    // A fresh request still gets its own flush via the new timer
    let vector = batcher.request("third").await.unwrap();
    assert_eq!(vector.len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// Requests arriving after a flush form the next batch
#[tokio::test]
async fn sequential_windows_make_separate_calls() {
    let stub = StubEmbedder::new(2);
    let calls = stub.batch_calls();
    let batcher = batcher_over(stub, 32, 10);

    batcher.request("one").await.unwrap();
    batcher.request("two").await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// Total failure semantics: no partial success within a batch
#[tokio::test]
async fn failed_batch_fails_every_waiter() {
    let stub = StubEmbedder::new(2).failing("embedding backend down");
    let batcher = Arc::new(batcher_over(stub, 2, 60_000));

    let a = {
        let b = batcher.clone();
        tokio::spawn(async move { b.request("x").await })
    };
    let b_task = {
        let b = batcher.clone();
        tokio::spawn(async move { b.request("y").await })
    };

    let err_a = a.await.unwrap().unwrap_err();
    let err_b = b_task.await.unwrap().unwrap_err();
    assert!(err_a.is_transient());
    assert!(err_b.is_transient());
}
