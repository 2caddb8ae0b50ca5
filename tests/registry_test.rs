//! Integration tests for the multi-queue registry and its deferred event stream.
//!
//! Runs on the current-thread tokio runtime, the only flavor a registry
//! accepts: events are only delivered when a test yields, which makes the
//! deferral observable.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use taskq::config::{QueueConfig, QueueDefinitions, QueueOptions};
use taskq::engine::{Completion, DEFAULT_QUEUE, Registry};
use taskq::error::Error;
use taskq::event::{Event, EventKind};
use taskq::model::NewTask;
use tokio::sync::mpsc::UnboundedReceiver;

type Handles = Arc<Mutex<Vec<Completion>>>;

fn held(name: &str, handles: &Handles) -> NewTask {
    let handles = Arc::clone(handles);
    NewTask::new(move |done| handles.lock().unwrap().push(done)).name(name)
}

fn handle(handles: &Handles, idx: usize) -> Completion {
    handles.lock().unwrap()[idx].clone()
}

async fn next_event(rx: &mut UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
}

async fn collect(rx: &mut UnboundedReceiver<Event>, n: usize) -> Vec<Event> {
    let mut events = Vec::with_capacity(n);
    for _ in 0..n {
        events.push(next_event(rx).await);
    }
    events
}

fn summary(events: &[Event]) -> Vec<String> {
    events.iter().map(|e| e.kind.to_string()).collect()
}

// ---------------------------------------------------------------------------
// Queue lifecycle
// ---------------------------------------------------------------------------

#[test]
fn registry_needs_a_runtime() {
    assert!(matches!(Registry::new(), Err(Error::Runtime(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn multi_thread_runtime_is_rejected() {
    let err = Registry::new().unwrap_err();
    assert!(matches!(err, Error::Runtime(ref msg) if msg.contains("current-thread")));
    assert!(matches!(
        Registry::with_defaults(QueueConfig::with_concurrency(4)),
        Err(Error::Runtime(_))
    ));
}

#[tokio::test]
async fn default_queue_exists_from_the_start() {
    let registry = Registry::new().unwrap();
    assert_eq!(registry.queue_names(), [DEFAULT_QUEUE]);
    assert!(registry.push_default(NewTask::new(|_| {})).unwrap());
    assert_eq!(registry.stats(DEFAULT_QUEUE).unwrap().in_flight, 1);
}

#[tokio::test]
async fn create_is_idempotent() {
    let registry = Registry::new().unwrap();

    assert!(registry.create("ingest", QueueOptions::concurrency(5)));
    assert!(!registry.create("ingest", QueueOptions::concurrency(9)));
    assert!(!registry.create("ingest", QueueOptions::default()));

    assert_eq!(registry.queue_names(), [DEFAULT_QUEUE, "ingest"]);
    assert_eq!(registry.stats("ingest").unwrap().concurrency, 5);
}

#[tokio::test]
async fn registry_defaults_apply_to_new_queues() {
    let registry = Registry::with_defaults(QueueConfig::with_concurrency(3)).unwrap();
    registry.create("mail", QueueOptions::default());

    assert_eq!(registry.stats(DEFAULT_QUEUE).unwrap().concurrency, 3);
    assert_eq!(registry.stats("mail").unwrap().concurrency, 3);
}

#[tokio::test]
async fn create_all_builds_queues_from_definitions() {
    let defs = QueueDefinitions::from_toml_str(
        r#"
        [defaults]
        concurrency = 2

        [queues.ingest]
        concurrency = 4

        [queues.mail]
        "#,
    )
    .unwrap();

    let registry = Registry::new().unwrap();
    assert_eq!(registry.create_all(&defs), 2);
    assert_eq!(registry.create_all(&defs), 0);

    assert_eq!(registry.stats("ingest").unwrap().concurrency, 4);
    assert_eq!(registry.stats("mail").unwrap().concurrency, 2);
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn push_to_missing_queue_is_an_error() {
    let registry = Registry::new().unwrap();
    let err = registry.push("nope", NewTask::new(|_| {})).unwrap_err();
    assert!(matches!(err, Error::QueueNotFound(ref key) if key == "nope"));
    assert_eq!(registry.queue_names(), [DEFAULT_QUEUE]);
}

#[tokio::test]
async fn control_operations_on_missing_queue_are_noops() {
    let registry = Registry::new().unwrap();

    assert!(!registry.start("nope"));
    assert!(!registry.stop("nope"));
    assert!(!registry.empty("nope"));
    assert!(!registry.remove_task("nope", "task"));
    assert!(!registry.set_concurrency("nope", 4));
    assert!(registry.stats("nope").is_none());
}

#[tokio::test]
async fn control_operations_delegate_to_the_queue() {
    let registry = Registry::new().unwrap();

    assert!(registry.stop(DEFAULT_QUEUE));
    registry
        .push_default(NewTask::new(|_| {}).name("foo"))
        .unwrap();
    registry
        .push_default(NewTask::new(|_| {}).name("bar"))
        .unwrap();

    assert!(registry.remove_task(DEFAULT_QUEUE, "foo"));
    assert!(!registry.remove_task(DEFAULT_QUEUE, "foo"));
    assert_eq!(registry.stats(DEFAULT_QUEUE).unwrap().pending, 1);

    assert!(registry.empty(DEFAULT_QUEUE));
    assert_eq!(registry.stats(DEFAULT_QUEUE).unwrap().pending, 0);

    assert!(registry.set_concurrency(DEFAULT_QUEUE, 4));
    assert!(registry.start(DEFAULT_QUEUE));
    assert!(!registry.start(DEFAULT_QUEUE));

    let stats = registry.stats(DEFAULT_QUEUE).unwrap();
    assert_eq!(stats.concurrency, 4);
    assert!(!stats.paused);
}

#[tokio::test]
async fn duplicate_is_reported_as_event_not_error() {
    let registry = Registry::new().unwrap();
    let mut rx = registry.subscribe();

    registry.stop(DEFAULT_QUEUE);
    let first = NewTask::new(|_| {}).name("sync").unique(true);
    let second = NewTask::new(|_| {}).name("sync");
    assert!(registry.push_default(first).unwrap());
    assert!(!registry.push_default(second).unwrap());

    let events = collect(&mut rx, 2).await;
    assert_eq!(summary(&events), ["stop __main__", "duplicate __main__/sync"]);
    assert_eq!(registry.stats(DEFAULT_QUEUE).unwrap().pending, 1);
}

// ---------------------------------------------------------------------------
// Event delivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn events_are_delivered_after_the_call_returns() {
    let registry = Registry::new().unwrap();
    let seen: Arc<Mutex<Vec<String>>> = Arc::default();
    let sink = Arc::clone(&seen);
    registry.on(move |event| sink.lock().unwrap().push(event.kind.to_string()));

    registry
        .push_default(NewTask::new(|_| {}).name("later"))
        .unwrap();
    assert!(seen.lock().unwrap().is_empty());

    // A subscriber attached after the push still receives its events.
    let mut rx = registry.subscribe();
    let event = next_event(&mut rx).await;
    assert_eq!(event.kind.to_string(), "run __main__/later");
    assert_eq!(*seen.lock().unwrap(), ["run __main__/later"]);
}

#[tokio::test]
async fn panicking_listener_does_not_stop_delivery() {
    let registry = Registry::new().unwrap();
    registry.on(|_| panic!("listener failure"));
    let count = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&count);
    registry.on(move |_| *sink.lock().unwrap() += 1);
    let mut rx = registry.subscribe();

    registry.stop(DEFAULT_QUEUE);
    registry.start(DEFAULT_QUEUE);

    let events = collect(&mut rx, 2).await;
    assert_eq!(summary(&events), ["stop __main__", "start __main__"]);

    tokio::task::yield_now().await;
    assert_eq!(*count.lock().unwrap(), 2);
}

#[tokio::test]
async fn events_from_all_queues_share_one_ordered_stream() {
    let registry = Registry::new().unwrap();
    registry.create("a", QueueOptions::default());
    registry.create("b", QueueOptions::default());
    let mut rx = registry.subscribe();

    registry.push("a", NewTask::new(|_| {}).name("1")).unwrap();
    registry.push("b", NewTask::new(|_| {}).name("2")).unwrap();
    registry.push("a", NewTask::new(|_| {}).name("3")).unwrap();

    let events = collect(&mut rx, 3).await;
    assert_eq!(summary(&events), ["run a/1", "run b/2", "queue a/3"]);
    for pair in events.windows(2) {
        assert!(pair[1].seq > pair[0].seq);
    }
}

// ---------------------------------------------------------------------------
// End to end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ingest_scenario() {
    let registry = Registry::new().unwrap();
    registry.create("ingest", QueueOptions::concurrency(2));
    let mut rx = registry.subscribe();
    let handles: Handles = Arc::default();

    for name in ["a", "b", "c"] {
        assert!(registry.push("ingest", held(name, &handles)).unwrap());
    }
    let events = collect(&mut rx, 3).await;
    assert_eq!(
        summary(&events),
        ["run ingest/a", "run ingest/b", "queue ingest/c"]
    );
    assert_eq!(registry.stats("ingest").unwrap().pending, 1);

    handle(&handles, 0).done().unwrap();
    let events = collect(&mut rx, 2).await;
    assert_eq!(summary(&events), ["done ingest/a", "run ingest/c"]);

    handle(&handles, 1).done().unwrap();
    handle(&handles, 2).done().unwrap();
    let events = collect(&mut rx, 4).await;
    assert_eq!(
        summary(&events),
        ["done ingest/b", "empty ingest", "done ingest/c", "empty ingest"]
    );
    assert_eq!(registry.stats("ingest").unwrap().in_flight, 0);
}

#[tokio::test]
async fn async_tasks_run_in_fifo_order() {
    let registry = Registry::new().unwrap();
    registry.create("jobs", QueueOptions::default());
    let mut rx = registry.subscribe();

    for name in ["t1", "t2", "t3"] {
        let task = NewTask::from_future(async move {
            tokio::task::yield_now().await;
            vec![serde_json::json!(name)]
        })
        .name(name);
        registry.push("jobs", task).unwrap();
    }

    let events = collect(&mut rx, 9).await;
    let runs: Vec<_> = events
        .iter()
        .filter(|e| e.kind.name() == "run")
        .filter_map(|e| e.kind.task())
        .collect();
    assert_eq!(runs, ["t1", "t2", "t3"]);

    let done_args: Vec<_> = events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::Done { args, .. } => Some(args[0].clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        done_args,
        [
            serde_json::json!("t1"),
            serde_json::json!("t2"),
            serde_json::json!("t3")
        ]
    );
    assert_eq!(events.last().unwrap().kind.to_string(), "empty jobs");
}
