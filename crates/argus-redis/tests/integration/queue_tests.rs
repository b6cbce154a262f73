use std::time::Duration;

use argus_core::fanout::FanoutQueue;
use argus_core::models::{FanoutMessage, SearchQuery};
use argus_core::producer::FanoutProducer;
use argus_redis::RedisConfig;
use redis::AsyncCommands;
use redis::streams::{StreamReadOptions, StreamReadReply};

use crate::integration::common::{connect_with_retry, setup_redis, start_redis};

fn test_message(sources: &[&str]) -> FanoutMessage {
    FanoutMessage::new(
        sources.iter().map(|s| s.to_string()).collect(),
        SearchQuery::new(vec!["rust".to_string()]).with_location("Berlin"),
    )
}

#[tokio::test]
async fn ensure_group_is_idempotent() {
    let (backend, _container) = setup_redis().await;
    let queue = backend.fanout_queue();

    queue.ensure_group().await.unwrap();
    queue.ensure_group().await.unwrap();
}

#[tokio::test]
async fn enqueue_read_ack_roundtrip() {
    let (backend, _container) = setup_redis().await;
    let queue = backend.fanout_queue();
    queue.ensure_group().await.unwrap();

    let id = queue
        .enqueue(&test_message(&["remotive", "adzuna"]))
        .await
        .unwrap();

    let batch = queue
        .read_batch("worker-a", 10, Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, id);
    assert_eq!(batch[0].message.sources, vec!["remotive", "adzuna"]);
    assert_eq!(batch[0].message.query.keywords, vec!["rust"]);
    assert_eq!(batch[0].message.query.location.as_deref(), Some("Berlin"));

    queue.ack(&batch[0].id).await.unwrap();

    let empty = queue
        .read_batch("worker-a", 10, Duration::from_millis(100))
        .await
        .unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn delivery_preserves_enqueue_order() {
    let (backend, _container) = setup_redis().await;
    let queue = backend.fanout_queue();
    queue.ensure_group().await.unwrap();

    for page in 1..=3 {
        let query = SearchQuery::new(vec!["rust".to_string()]).with_page(page, 25);
        queue
            .enqueue(&FanoutMessage::new(vec!["remotive".to_string()], query))
            .await
            .unwrap();
    }

    let batch = queue
        .read_batch("worker-a", 10, Duration::from_millis(100))
        .await
        .unwrap();
    let pages: Vec<u32> = batch.iter().map(|entry| entry.message.query.page).collect();
    assert_eq!(pages, vec![1, 2, 3]);
}

#[tokio::test]
async fn messages_enqueued_before_group_creation_are_delivered() {
    let (backend, _container) = setup_redis().await;
    let queue = backend.fanout_queue();

    let id = queue.enqueue(&test_message(&["remotive"])).await.unwrap();
    queue.ensure_group().await.unwrap();

    let batch = queue
        .read_batch("worker-a", 10, Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, id);
}

#[tokio::test]
async fn each_entry_is_delivered_to_one_consumer() {
    let (backend, _container) = setup_redis().await;
    let queue = backend.fanout_queue();
    queue.ensure_group().await.unwrap();

    queue.enqueue(&test_message(&["remotive"])).await.unwrap();

    let first = queue
        .read_batch("worker-a", 10, Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(first.len(), 1);

    let second = queue
        .read_batch("worker-b", 10, Duration::from_millis(100))
        .await
        .unwrap();
    assert!(second.is_empty());
}

#[tokio::test]
async fn unacked_entries_are_claimed_from_dead_consumer() {
    let (backend, _container) = setup_redis().await;
    let queue = backend.fanout_queue();
    queue.ensure_group().await.unwrap();

    let id = queue.enqueue(&test_message(&["remotive"])).await.unwrap();

    // worker-a reads the entry and dies without acking.
    let orphaned = queue
        .read_batch("worker-a", 10, Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(orphaned.len(), 1);

    tokio::time::sleep(Duration::from_millis(300)).await;

    let claimed = queue
        .claim_stale("worker-b", Duration::from_millis(100), 10)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, id);
    assert_eq!(claimed[0].message, orphaned[0].message);

    queue.ack(&claimed[0].id).await.unwrap();
    let nothing_left = queue
        .claim_stale("worker-b", Duration::ZERO, 10)
        .await
        .unwrap();
    assert!(nothing_left.is_empty());
}

#[tokio::test]
async fn fresh_entries_are_not_claimable_before_min_idle() {
    let (backend, _container) = setup_redis().await;
    let queue = backend.fanout_queue();
    queue.ensure_group().await.unwrap();

    queue.enqueue(&test_message(&["remotive"])).await.unwrap();
    queue
        .read_batch("worker-a", 10, Duration::from_millis(100))
        .await
        .unwrap();

    let claimed = queue
        .claim_stale("worker-b", Duration::from_secs(60), 10)
        .await
        .unwrap();
    assert!(claimed.is_empty());
}

#[tokio::test]
async fn undecodable_entries_are_dropped_and_acked_on_read() {
    let (url, _container) = start_redis().await;
    let backend = connect_with_retry(&RedisConfig::new(url.clone())).await;
    let queue = backend.fanout_queue();
    queue.ensure_group().await.unwrap();

    // A garbage payload lands between two healthy entries.
    let first = queue.enqueue(&test_message(&["remotive"])).await.unwrap();
    let mut raw = redis::Client::open(url.as_str())
        .unwrap()
        .get_multiplexed_async_connection()
        .await
        .unwrap();
    let _: String = raw
        .xadd(queue.stream(), "*", &[("payload", "not json")])
        .await
        .unwrap();
    let second = queue.enqueue(&test_message(&["adzuna"])).await.unwrap();

    let batch = queue
        .read_batch("worker-a", 10, Duration::from_millis(100))
        .await
        .unwrap();
    let ids: Vec<&str> = batch.iter().map(|entry| entry.id.as_str()).collect();
    assert_eq!(ids, vec![first.as_str(), second.as_str()]);

    // The bad entry was acked at read time, so it is not claimable either.
    let claimed = queue
        .claim_stale("worker-b", Duration::ZERO, 10)
        .await
        .unwrap();
    let claimed_ids: Vec<&str> = claimed.iter().map(|entry| entry.id.as_str()).collect();
    assert_eq!(claimed_ids, vec![first.as_str(), second.as_str()]);
}

#[tokio::test]
async fn undecodable_entries_do_not_block_stale_claims() {
    let (url, _container) = start_redis().await;
    let config = RedisConfig::new(url.clone());
    let backend = connect_with_retry(&config).await;
    let queue = backend.fanout_queue();
    queue.ensure_group().await.unwrap();

    let mut raw = redis::Client::open(url.as_str())
        .unwrap()
        .get_multiplexed_async_connection()
        .await
        .unwrap();

    // A bad payload lands ahead of a healthy one; a consumer reads both
    // through the raw protocol and dies without acking.
    let _: String = raw
        .xadd(queue.stream(), "*", &[("payload", "{\"broken\"")])
        .await
        .unwrap();
    let healthy = queue.enqueue(&test_message(&["remotive"])).await.unwrap();
    let opts = StreamReadOptions::default().group(&config.consumer_group, "worker-a");
    let _: StreamReadReply = raw
        .xread_options(&[queue.stream()], &[">"], &opts)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    // The sweep claims past the bad entry instead of aborting on it.
    let claimed = queue
        .claim_stale("worker-b", Duration::from_millis(100), 10)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, healthy);

    // The bad entry was acked during the sweep; once the healthy one is
    // acked too, nothing is left pending.
    queue.ack(&claimed[0].id).await.unwrap();
    let nothing_left = queue
        .claim_stale("worker-b", Duration::ZERO, 10)
        .await
        .unwrap();
    assert!(nothing_left.is_empty());
}

#[tokio::test]
async fn submit_receipt_correlates_with_stream_entry() {
    let (backend, _container) = setup_redis().await;
    let queue = backend.fanout_queue();
    queue.ensure_group().await.unwrap();

    let producer = FanoutProducer::new(queue.clone());
    let receipt = producer
        .submit(test_message(&["remotive", "adzuna"]))
        .await
        .unwrap();

    let batch = queue
        .read_batch("worker-a", 10, Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, receipt.message_id);
    assert_eq!(batch[0].message.query.fingerprint(), receipt.fingerprint);
}
