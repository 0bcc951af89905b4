// ABOUTME: Routing tests: follow-ups stick to their worker, fresh questions are shared.
// ABOUTME: Also checks that several workers draining the common queue all make progress.

use promptq_agent::backends::mock::MockBackend;
use promptq_core::queue::{worker_queue, COMMON_QUEUE};
use promptq_core::retry::RetryPolicy;
use promptq_core::store::MemoryStore;
use promptq_core::{
    AffinityMarker, Dispatcher, Queue, QueueItem, ResponseEnvelope, SubmitOutcome, Worker,
    WorkerConfig, WorkerId,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

const ANSWERS: &str = "queue.answers.dispatch";

fn memory_queue() -> (Arc<MemoryStore>, Queue) {
    let store = Arc::new(MemoryStore::new());
    let queue = Queue::new(store.clone());
    (store, queue)
}

fn worker(id: &str, queue: &Queue) -> Worker {
    Worker::new(
        WorkerId::from_raw(id),
        queue.clone(),
        Arc::new(MockBackend::new()),
        WorkerConfig {
            poll_interval: Duration::from_millis(10),
            retry: RetryPolicy {
                request_timeout: Duration::from_secs(5),
                reauth_cooldown: Duration::ZERO,
            },
        },
    )
}

#[tokio::test]
async fn test_fresh_question_goes_to_common_queue() {
    let (store, queue) = memory_queue();
    let dispatcher = Dispatcher::new(queue.clone(), ANSWERS);

    let outcome = dispatcher.submit("  2+2?  ", None, None).await.unwrap();
    assert_eq!(
        outcome,
        SubmitOutcome::Enqueued {
            queue: COMMON_QUEUE.to_string()
        }
    );

    let item: QueueItem = queue.pop(COMMON_QUEUE).await.unwrap().unwrap();
    assert_eq!(item.question.prompt, "2+2?");
    assert!(item.question.conversation_id.is_none());
    assert!(item.question.parent_message_id.is_none());
    assert!(item.target_worker_id.is_none());
    assert_eq!(item.response_queue_name, ANSWERS);
    assert_eq!(store.len(COMMON_QUEUE), 0);
}

#[tokio::test]
async fn test_follow_up_goes_only_to_owner_queue() {
    let (store, queue) = memory_queue();
    let dispatcher = Dispatcher::new(queue.clone(), ANSWERS);
    let marker = AffinityMarker::new("c1", "m1", WorkerId::from_raw("W1"));

    let outcome = dispatcher
        .submit("and 2+3?", Some(&marker), Some(serde_json::json!({"k": 1})))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SubmitOutcome::Enqueued {
            queue: "queue.W1".to_string()
        }
    );
    assert_eq!(store.len(COMMON_QUEUE), 0);
    assert_eq!(store.len("queue.W1"), 1);

    let item: QueueItem = queue.pop("queue.W1").await.unwrap().unwrap();
    assert_eq!(item.question.conversation_id.as_deref(), Some("c1"));
    assert_eq!(item.question.parent_message_id.as_deref(), Some("m1"));
    assert_eq!(item.target_worker_id, Some(WorkerId::from_raw("W1")));
    assert_eq!(item.correlation_extra, Some(serde_json::json!({"k": 1})));
}

#[tokio::test]
async fn test_blank_prompt_is_dropped() {
    let (store, queue) = memory_queue();
    let dispatcher = Dispatcher::new(queue, ANSWERS);

    assert_eq!(
        dispatcher.submit(" \n\t ", None, None).await.unwrap(),
        SubmitOutcome::Dropped
    );
    assert_eq!(store.len(COMMON_QUEUE), 0);
}

#[tokio::test]
async fn test_submit_fails_when_store_is_down() {
    let (store, queue) = memory_queue();
    let dispatcher = Dispatcher::new(queue, ANSWERS);
    store.set_offline(true);

    assert!(dispatcher.submit("hello", None, None).await.is_err());
}

#[tokio::test]
async fn test_sticky_follow_up_is_never_taken_by_other_worker() {
    let (_store, queue) = memory_queue();
    let dispatcher = Dispatcher::new(queue.clone(), ANSWERS);
    let owner = worker("W1", &queue);
    let other = worker("W2", &queue);
    let marker = AffinityMarker::new("c1", "m1", owner.id().clone());

    dispatcher.submit("follow up", Some(&marker), None).await.unwrap();

    let report = other.run_cycle().await;
    assert!(!report.common && !report.own);
    assert!(queue.pop::<ResponseEnvelope>(ANSWERS).await.unwrap().is_none());

    let report = owner.run_cycle().await;
    assert!(report.own);
    let envelope: ResponseEnvelope = queue.pop(ANSWERS).await.unwrap().unwrap();
    assert_eq!(envelope.worker_id.as_str(), "W1");
    assert_eq!(envelope.answer.unwrap().conversation_id, "c1");
}

#[tokio::test]
async fn test_common_queue_is_shared_between_workers() {
    let (store, queue) = memory_queue();
    let dispatcher = Dispatcher::new(queue.clone(), ANSWERS);
    let workers = [worker("W1", &queue), worker("W2", &queue)];

    for i in 0..10 {
        dispatcher
            .submit(&format!("question {}", i), None, None)
            .await
            .unwrap();
    }

    while store.len(COMMON_QUEUE) > 0 {
        for w in &workers {
            w.run_cycle().await;
        }
    }

    let mut by_worker: HashMap<String, usize> = HashMap::new();
    let mut prompts = HashSet::new();
    while let Some(envelope) = queue.pop::<ResponseEnvelope>(ANSWERS).await.unwrap() {
        *by_worker.entry(envelope.worker_id.to_string()).or_default() += 1;
        assert!(prompts.insert(envelope.question.prompt));
    }

    assert_eq!(prompts.len(), 10);
    assert_eq!(by_worker.get("W1"), Some(&5));
    assert_eq!(by_worker.get("W2"), Some(&5));
}

#[tokio::test]
async fn test_own_queue_does_not_starve_common_queue() {
    let (store, queue) = memory_queue();
    let dispatcher = Dispatcher::new(queue.clone(), ANSWERS);
    let w = worker("W1", &queue);
    let marker = AffinityMarker::new("c1", "m1", w.id().clone());

    for _ in 0..3 {
        dispatcher.submit("sticky", Some(&marker), None).await.unwrap();
    }
    dispatcher.submit("fresh", None, None).await.unwrap();

    let report = w.run_cycle().await;
    assert!(report.common && report.own);
    assert_eq!(store.len(COMMON_QUEUE), 0);
    assert_eq!(store.len(&worker_queue(w.id())), 2);
}
