//! Integration tests against a live Redis broker.
//!
//! Run with: REDIS_URL=redis://localhost:6379/15 cargo test --test redis_integration -- --ignored

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::broadcast;

use trainforge::config::ChannelNames;
use trainforge::scheduler::{
    JobState, JobService, MessageBus, QueueConnector, RedisConnector, Saver, SimulatedTrainer,
    SubmitRequest, TaskQueue, WorkerPool, WorkerPoolConfig,
};
use trainforge::store::{ArtifactStore, CancelMarkers, JobStore};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379/15".to_string())
}

/// Channel names unique to one test run so parallel runs don't collide.
fn isolated_channels() -> ChannelNames {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    ChannelNames {
        dispatch: format!("training-queue-{}", suffix),
        init: format!("init-queue-{}", suffix),
        progress: format!("state-queue-{}", suffix),
        result: format!("results-queue-{}", suffix),
    }
}

#[tokio::test]
#[ignore] // Run with: cargo test --test redis_integration -- --ignored
async fn test_push_and_pop_round_trip() {
    let connector = RedisConnector::new(redis_url());
    let queue = connector.connect().await.expect("Failed to connect to Redis");
    let channel = isolated_channels().dispatch;

    queue.push(&channel, "first").await.expect("push");
    queue.push(&channel, "second").await.expect("push");
    assert_eq!(queue.len(&channel).await.expect("len"), 2);

    let popped = queue
        .blocking_pop(&[channel.clone()], Duration::from_secs(1))
        .await
        .expect("pop");
    assert_eq!(popped, Some((channel.clone(), "first".to_string())));

    let popped = queue
        .blocking_pop(&[channel.clone()], Duration::from_secs(1))
        .await
        .expect("pop");
    assert_eq!(popped, Some((channel.clone(), "second".to_string())));

    let empty = queue
        .blocking_pop(&[channel], Duration::from_secs(1))
        .await
        .expect("pop");
    assert!(empty.is_none());
}

#[tokio::test]
#[ignore] // Run with: cargo test --test redis_integration -- --ignored
async fn test_full_pipeline_over_redis() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let channels = isolated_channels();
    let connector = Arc::new(RedisConnector::new(redis_url()));
    let store = Arc::new(JobStore::new(dir.path()));

    let saver_bus = MessageBus::connect(connector.as_ref(), channels.clone())
        .await
        .expect("Failed to connect saver");
    let (stop_tx, stop_rx) = broadcast::channel(1);
    let saver = tokio::spawn(
        Saver::new(saver_bus, Arc::clone(&store), Duration::from_secs(1)).run(stop_rx),
    );

    let mut pool = WorkerPool::new(
        WorkerPoolConfig::new(1).with_channels(channels.clone()),
        connector.clone(),
        Arc::new(SimulatedTrainer::new(Duration::from_millis(10))),
        ArtifactStore::new(dir.path()),
        CancelMarkers::new(dir.path()),
    );
    pool.start().await.expect("Failed to start pool");

    let service = JobService::new(
        MessageBus::connect(connector.as_ref(), channels)
            .await
            .expect("Failed to connect service"),
        Arc::clone(&store),
        CancelMarkers::new(dir.path()),
    );

    let mut config = trainforge::scheduler::JobConfig::new();
    config.insert("epochs".to_string(), serde_json::json!(3));
    let job_id = service
        .submit(SubmitRequest::new("p1").with_config(config))
        .await
        .expect("submit");

    let mut state = JobState::Pending;
    for _ in 0..200 {
        if let Ok(view) = service.get("p1", &job_id).await {
            state = view.state;
            if state.is_terminal() {
                assert_eq!(view.progress, 100);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(state, JobState::Completed);

    pool.shutdown().await.expect("shutdown");
    let _ = stop_tx.send(());
    saver.await.expect("saver task");
}
