//! Queue-primitive behavior against a real PostgreSQL + pgmq instance.
//! Skipped when `DATABASE_URL` is not set.

mod common;

use serde_json::json;

use koditon_core::messaging::{MessageQueue, DEFAULT_VT_SECS};

use common::{setup, unique_queue_name};

#[tokio::test]
async fn send_read_delete_round_trip() {
    let Some(ctx) = setup().await else { return };

    let msg_id = ctx
        .queue
        .send(&ctx.queue_name, &json!({"task_id": 1, "entity_id": "ad:1", "attempt": 0}))
        .await
        .unwrap();
    assert!(msg_id > 0);

    let message = ctx
        .queue
        .read(&ctx.queue_name, 30)
        .await
        .unwrap()
        .expect("message should be visible");
    assert_eq!(message.msg_id, msg_id);
    assert_eq!(message.read_count, 1);
    assert_eq!(message.payload["entity_id"], "ad:1");

    // Leased: hidden from a second reader until the lease lapses.
    assert!(ctx.queue.read(&ctx.queue_name, 30).await.unwrap().is_none());

    assert!(ctx.queue.delete(&ctx.queue_name, msg_id).await.unwrap());
    assert!(!ctx.queue.delete(&ctx.queue_name, msg_id).await.unwrap());

    ctx.drop_queue().await;
}

#[tokio::test]
async fn zero_visibility_timeout_is_coerced_to_default() {
    let Some(ctx) = setup().await else { return };

    ctx.queue.send(&ctx.queue_name, &json!({"n": 1})).await.unwrap();
    let message = ctx
        .queue
        .read(&ctx.queue_name, 0)
        .await
        .unwrap()
        .expect("message should be visible");

    // The lease runs for the 30 s default, not zero.
    let lease_secs = (message.vt - message.enqueued_at).num_seconds();
    assert!(lease_secs >= i64::from(DEFAULT_VT_SECS) - 2);
    assert!(ctx.queue.read(&ctx.queue_name, 0).await.unwrap().is_none());

    ctx.drop_queue().await;
}

#[tokio::test]
async fn negative_delay_is_deliverable_immediately() {
    let Some(ctx) = setup().await else { return };

    ctx.queue
        .send_with_delay(&ctx.queue_name, &json!({"n": 1}), -3600)
        .await
        .unwrap();
    assert!(ctx.queue.read(&ctx.queue_name, 30).await.unwrap().is_some());

    ctx.drop_queue().await;
}

#[tokio::test]
async fn batch_send_preserves_order() {
    let Some(ctx) = setup().await else { return };

    let payloads = vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})];
    let msg_ids = ctx
        .queue
        .send_batch(&ctx.queue_name, &payloads, 0)
        .await
        .unwrap();
    assert_eq!(msg_ids.len(), 3);
    assert!(msg_ids.windows(2).all(|w| w[0] < w[1]));

    let messages = ctx.queue.read_batch(&ctx.queue_name, 30, 10).await.unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].payload["n"], 1);
    assert_eq!(messages[2].payload["n"], 3);

    ctx.drop_queue().await;
}

#[tokio::test]
async fn archive_removes_from_circulation() {
    let Some(ctx) = setup().await else { return };

    let msg_id = ctx.queue.send(&ctx.queue_name, &json!({"n": 1})).await.unwrap();
    assert!(ctx.queue.archive(&ctx.queue_name, msg_id).await.unwrap());
    assert!(!ctx.queue.archive(&ctx.queue_name, msg_id).await.unwrap());
    assert!(ctx.queue.read(&ctx.queue_name, 30).await.unwrap().is_none());

    ctx.drop_queue().await;
}

#[tokio::test]
async fn set_visibility_timeout_releases_a_lease_early() {
    let Some(ctx) = setup().await else { return };

    let msg_id = ctx.queue.send(&ctx.queue_name, &json!({"n": 1})).await.unwrap();
    ctx.queue.read(&ctx.queue_name, 300).await.unwrap().unwrap();
    assert!(ctx.queue.read(&ctx.queue_name, 300).await.unwrap().is_none());

    // Release the lease by re-pointing vt to now.
    ctx.queue
        .set_visibility_timeout(&ctx.queue_name, msg_id, 0)
        .await
        .unwrap();
    let reclaimed = ctx.queue.read(&ctx.queue_name, 30).await.unwrap().unwrap();
    assert_eq!(reclaimed.msg_id, msg_id);
    assert_eq!(reclaimed.read_count, 2);

    let err = ctx
        .queue
        .set_visibility_timeout(&ctx.queue_name, 99_999_999, 0)
        .await
        .unwrap_err();
    assert!(err.is_message_not_found());

    ctx.drop_queue().await;
}

#[tokio::test]
async fn purge_and_metrics() {
    let Some(ctx) = setup().await else { return };

    for n in 0..5 {
        ctx.queue.send(&ctx.queue_name, &json!({"n": n})).await.unwrap();
    }

    let metrics = ctx.queue.metrics(&ctx.queue_name).await.unwrap();
    assert_eq!(metrics.queue_length, 5);
    assert_eq!(metrics.total_messages, 5);

    let purged = ctx.queue.purge_queue(&ctx.queue_name).await.unwrap();
    assert_eq!(purged, 5);
    let metrics = ctx.queue.metrics(&ctx.queue_name).await.unwrap();
    assert_eq!(metrics.queue_length, 0);

    ctx.drop_queue().await;
}

#[tokio::test]
async fn listed_queues_include_ours_until_dropped() {
    let Some(ctx) = setup().await else { return };

    let names: Vec<String> = ctx
        .queue
        .list_queues()
        .await
        .unwrap()
        .into_iter()
        .map(|meta| meta.queue_name)
        .collect();
    assert!(names.contains(&ctx.queue_name));

    ctx.queue.drop_queue(&ctx.queue_name).await.unwrap();
    let err = ctx.queue.drop_queue(&ctx.queue_name).await.unwrap_err();
    assert!(err.is_queue_not_found());
}

#[tokio::test]
async fn pop_reads_and_deletes_atomically() {
    let Some(ctx) = setup().await else { return };

    ctx.queue.send(&ctx.queue_name, &json!({"n": 1})).await.unwrap();
    assert!(ctx.queue.pop(&ctx.queue_name).await.unwrap().is_some());
    assert!(ctx.queue.pop(&ctx.queue_name).await.unwrap().is_none());

    let metrics = ctx.queue.metrics(&ctx.queue_name).await.unwrap();
    assert_eq!(metrics.queue_length, 0);

    ctx.drop_queue().await;
}

#[tokio::test]
async fn unique_queue_names_fit_the_grammar() {
    let name = unique_queue_name();
    assert!(koditon_core::messaging::validate_queue_name(&name).is_ok());
}
