// ABOUTME: Tests for the worker loop and request handling against an in-memory store.
// ABOUTME: Covers exactly-one-response, the reauth retry bound, timeouts, and poll ordering.

use promptq_agent::backends::mock::MockBackend;
use promptq_agent::{BackendError, ErrorClass};
use promptq_core::queue::{worker_queue, COMMON_QUEUE};
use promptq_core::retry::RetryPolicy;
use promptq_core::store::{MemoryStore, QueueStore};
use promptq_core::worker::CycleReport;
use promptq_core::{
    Question, Queue, QueueItem, ResponseEnvelope, Worker, WorkerConfig, WorkerId,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const ANSWERS: &str = "queue.answers.test";

fn fast_config() -> WorkerConfig {
    WorkerConfig {
        poll_interval: Duration::from_millis(10),
        retry: RetryPolicy {
            request_timeout: Duration::from_secs(5),
            reauth_cooldown: Duration::ZERO,
        },
    }
}

fn setup(mock: MockBackend, config: WorkerConfig) -> (Arc<MemoryStore>, Queue, Worker) {
    let store = Arc::new(MemoryStore::new());
    let queue = Queue::new(store.clone());
    let worker = Worker::new(
        WorkerId::from_raw("W1"),
        queue.clone(),
        Arc::new(mock),
        config,
    );
    (store, queue, worker)
}

fn item(prompt: &str) -> QueueItem {
    QueueItem {
        question: Question::new(prompt),
        response_queue_name: ANSWERS.to_string(),
        correlation_extra: Some(serde_json::json!({"channel": "C1", "ts": "1.0"})),
        target_worker_id: None,
    }
}

async fn drain(queue: &Queue) -> Vec<ResponseEnvelope> {
    let mut out = Vec::new();
    while let Some(env) = queue.pop::<ResponseEnvelope>(ANSWERS).await.unwrap() {
        out.push(env);
    }
    out
}

#[tokio::test]
async fn test_success_pushes_exactly_one_envelope() {
    let mock = MockBackend::new().on_prompt("2+2").respond_reply("4", "c1", "m1");
    let (store, queue, worker) = setup(mock, fast_config());
    queue.push(COMMON_QUEUE, &item("2+2?")).await.unwrap();

    assert!(worker.poll_queue(COMMON_QUEUE).await.unwrap());

    let envelopes = drain(&queue).await;
    assert_eq!(envelopes.len(), 1);
    let env = &envelopes[0];
    assert!(env.success);
    assert!(env.error.is_none());
    assert_eq!(env.worker_id.as_str(), "W1");
    let answer = env.answer.as_ref().unwrap();
    assert_eq!(answer.response_text, "4");
    assert_eq!(answer.conversation_id, "c1");
    assert_eq!(answer.message_id, "m1");
    assert_eq!(env.question.prompt, "2+2?");
    assert_eq!(env.correlation_extra, item("2+2?").correlation_extra);
    assert_eq!(store.len(COMMON_QUEUE), 0);
}

#[tokio::test]
async fn test_question_context_is_passed_to_backend() {
    let mock = MockBackend::new().on_prompt("more").respond_text("sure");
    let (_store, queue, worker) = setup(mock.clone(), fast_config());
    let mut follow_up = item("more please");
    follow_up.question.conversation_id = Some("c1".to_string());
    follow_up.question.parent_message_id = Some("m1".to_string());
    queue.push(worker.own_queue(), &follow_up).await.unwrap();

    worker.run_cycle().await;

    let calls = mock.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].conversation_id.as_deref(), Some("c1"));
    assert_eq!(calls[0].parent_message_id.as_deref(), Some("m1"));
}

#[tokio::test]
async fn test_session_expired_twice_retries_once_then_fails() {
    let mock = MockBackend::new()
        .on_prompt("q").fail_with(BackendError::SessionExpired("HTTP 403".into()))
        .on_prompt("q").fail_with(BackendError::SessionExpired("HTTP 403".into()))
        .on_prompt("q").respond_text("never reached");
    let (_store, queue, worker) = setup(mock.clone(), fast_config());
    queue.push(COMMON_QUEUE, &item("q")).await.unwrap();

    worker.run_cycle().await;

    assert_eq!(mock.calls().len(), 2);
    assert_eq!(mock.refresh_count(), 1);
    assert_eq!(mock.pending_expectations(), 1);

    let envelopes = drain(&queue).await;
    assert_eq!(envelopes.len(), 1);
    assert!(!envelopes[0].success);
    assert!(envelopes[0].answer.is_none());
    let error = envelopes[0].error.as_ref().unwrap();
    assert_eq!(error.classification, ErrorClass::BackendOther);
    assert!(error.message.contains("reauthentication did not help"));
}

#[tokio::test]
async fn test_session_expired_then_success() {
    let mock = MockBackend::new()
        .on_prompt("q").fail_with(BackendError::SessionExpired("HTTP 403".into()))
        .on_prompt("q").respond_text("recovered");
    let (_store, queue, worker) = setup(mock.clone(), fast_config());
    queue.push(COMMON_QUEUE, &item("q")).await.unwrap();

    worker.run_cycle().await;

    assert_eq!(mock.refresh_count(), 1);
    let envelopes = drain(&queue).await;
    assert_eq!(envelopes.len(), 1);
    assert!(envelopes[0].success);
    assert_eq!(envelopes[0].answer.as_ref().unwrap().response_text, "recovered");
}

#[tokio::test]
async fn test_other_failure_is_not_retried() {
    let mock = MockBackend::new()
        .on_prompt("q").fail_with(BackendError::other("HTTP 500: overloaded"))
        .on_prompt("q").respond_text("never reached");
    let (_store, queue, worker) = setup(mock.clone(), fast_config());
    queue.push(COMMON_QUEUE, &item("q")).await.unwrap();

    worker.run_cycle().await;

    assert_eq!(mock.calls().len(), 1);
    assert_eq!(mock.refresh_count(), 0);
    let envelopes = drain(&queue).await;
    assert_eq!(envelopes.len(), 1);
    let error = envelopes[0].error.as_ref().unwrap();
    assert_eq!(error.classification, ErrorClass::BackendOther);
    assert_eq!(error.message, "HTTP 500: overloaded");
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_a_failure_without_retry() {
    let mock = MockBackend::new()
        .on_prompt("slow").after(Duration::from_secs(60)).respond_text("too late");
    let mut config = fast_config();
    config.retry.request_timeout = Duration::from_secs(1);
    let (_store, queue, worker) = setup(mock.clone(), config);
    queue.push(COMMON_QUEUE, &item("slow")).await.unwrap();

    worker.run_cycle().await;

    assert_eq!(mock.calls().len(), 1);
    assert_eq!(mock.refresh_count(), 0);
    let envelopes = drain(&queue).await;
    assert_eq!(envelopes.len(), 1);
    assert_eq!(
        envelopes[0].error.as_ref().unwrap().classification,
        ErrorClass::BackendTimeout
    );
}

#[tokio::test]
async fn test_empty_poll_is_idempotent() {
    let (store, queue, worker) = setup(MockBackend::new(), fast_config());

    for _ in 0..5 {
        assert!(!worker.poll_queue(COMMON_QUEUE).await.unwrap());
        assert_eq!(worker.run_cycle().await, CycleReport::default());
    }
    assert!(queue.pop::<ResponseEnvelope>(ANSWERS).await.unwrap().is_none());
    assert_eq!(store.len(COMMON_QUEUE), 0);
    assert_eq!(store.len(ANSWERS), 0);
}

#[tokio::test]
async fn test_cycle_drains_common_before_own() {
    let (_store, queue, worker) = setup(MockBackend::new(), fast_config());
    queue.push(worker.own_queue(), &item("own")).await.unwrap();
    queue.push(COMMON_QUEUE, &item("common")).await.unwrap();

    let report = worker.run_cycle().await;
    assert_eq!(report, CycleReport { common: true, own: true });

    let prompts: Vec<String> = drain(&queue)
        .await
        .into_iter()
        .map(|e| e.question.prompt)
        .collect();
    assert_eq!(prompts, vec!["common", "own"]);
}

#[tokio::test]
async fn test_one_item_per_queue_per_cycle() {
    let (store, queue, worker) = setup(MockBackend::new(), fast_config());
    for i in 0..3 {
        queue.push(COMMON_QUEUE, &item(&format!("q{}", i))).await.unwrap();
    }

    worker.run_cycle().await;
    assert_eq!(store.len(COMMON_QUEUE), 2);
    assert_eq!(store.len(ANSWERS), 1);
}

#[tokio::test]
async fn test_malformed_item_is_dropped_and_cycle_continues() {
    let (store, queue, worker) = setup(MockBackend::new(), fast_config());
    store
        .push(COMMON_QUEUE, "{\"question\": 42}".to_string())
        .await
        .unwrap();
    queue.push(worker.own_queue(), &item("fine")).await.unwrap();

    let report = worker.run_cycle().await;
    assert_eq!(report, CycleReport { common: false, own: true });
    assert_eq!(store.len(COMMON_QUEUE), 0);
    assert_eq!(drain(&queue).await.len(), 1);
}

#[tokio::test]
async fn test_store_outage_does_not_stop_the_cycle() {
    let (store, queue, worker) = setup(MockBackend::new(), fast_config());
    queue.push(COMMON_QUEUE, &item("later")).await.unwrap();

    store.set_offline(true);
    assert_eq!(worker.run_cycle().await, CycleReport::default());
    assert!(worker.poll_queue(COMMON_QUEUE).await.is_err());

    store.set_offline(false);
    assert!(worker.run_cycle().await.common);
}

#[tokio::test]
async fn test_own_queue_is_named_after_worker_id() {
    let (_store, _queue, worker) = setup(MockBackend::new(), fast_config());
    assert_eq!(worker.own_queue(), worker_queue(&WorkerId::from_raw("W1")));
    assert_eq!(worker.own_queue(), "queue.W1");
}

#[tokio::test]
async fn test_start_failure_is_reported() {
    let mock = MockBackend::new().failing_start(BackendError::SessionExpired("HTTP 401".into()));
    let (_store, _queue, worker) = setup(mock, fast_config());
    let err = worker.start().await.unwrap_err();
    assert!(err.to_string().contains("Failed to start mock backend session"));
}

#[tokio::test]
async fn test_run_handles_items_until_cancelled() {
    let (_store, queue, worker) = setup(MockBackend::new(), fast_config());
    let worker = Arc::new(worker);
    queue.push(COMMON_QUEUE, &item("a")).await.unwrap();
    queue.push(worker.own_queue(), &item("b")).await.unwrap();

    let shutdown = CancellationToken::new();
    let handle = {
        let worker = Arc::clone(&worker);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(shutdown).await })
    };

    let mut answered = Vec::new();
    for _ in 0..200 {
        answered.extend(drain(&queue).await);
        if answered.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    shutdown.cancel();
    handle.await.unwrap();

    assert_eq!(answered.len(), 2);
}
