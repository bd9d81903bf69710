//! End-to-end engine tests against the in-memory history store
//!
//! Run with: cargo test -p orchestra-durable --test orchestration_test

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use uuid::Uuid;

use orchestra_durable::prelude::*;
use orchestra_durable::InstanceInfo;

// ============================================
// Harness
// ============================================

/// What a scripted activity does on a given attempt
#[derive(Clone)]
enum Reply {
    Ok(Value),
    Transient,
    Permanent,
    After(Duration, Box<Reply>),
    /// Block until the instance is cancelled
    Hang,
}

/// Activities whose behaviour per attempt is scripted by the test
#[derive(Clone, Default)]
struct Script {
    replies: Arc<Mutex<HashMap<String, Vec<Reply>>>>,
    calls: Arc<Mutex<HashMap<String, u32>>>,
}

impl Script {
    /// Reply for attempt `n` is `replies[n-1]`; the last entry repeats
    fn set(&self, activity: &str, replies: Vec<Reply>) -> &Self {
        self.replies.lock().insert(activity.to_string(), replies);
        self
    }

    fn calls(&self, activity: &str) -> u32 {
        self.calls.lock().get(activity).copied().unwrap_or(0)
    }

    fn registry(&self, activities: &[&str]) -> ActivityRegistry {
        let mut registry = ActivityRegistry::new();
        for name in activities {
            let script = self.clone();
            let owned = name.to_string();
            registry
                .register_fn(name, move |ctx, input| {
                    let script = script.clone();
                    let name = owned.clone();
                    async move {
                        *script.calls.lock().entry(name.clone()).or_default() += 1;
                        let reply = {
                            let replies = script.replies.lock();
                            match replies.get(&name) {
                                Some(list) if !list.is_empty() => {
                                    let index = (ctx.attempt as usize - 1).min(list.len() - 1);
                                    list[index].clone()
                                }
                                _ => Reply::Ok(json!({"activity": name, "input": input})),
                            }
                        };
                        play(reply, &ctx).await
                    }
                })
                .unwrap();
        }
        registry
    }
}

fn play(reply: Reply, ctx: &ActivityContext) -> futures::future::BoxFuture<'_, Result<Value, ActivityError>> {
    Box::pin(async move {
        match reply {
            Reply::Ok(value) => Ok(value),
            Reply::Transient => Err(ActivityError::transient("downstream busy")),
            Reply::Permanent => Err(ActivityError::permanent("request rejected")),
            Reply::After(delay, then) => {
                tokio::time::sleep(delay).await;
                play(*then, ctx).await
            }
            Reply::Hang => {
                ctx.cancelled().await;
                Err(ActivityError::permanent("cancelled"))
            }
        }
    })
}

const ORDER_ACTIVITIES: &[&str] = &[
    "check_inventory",
    "process_payment",
    "update_inventory",
    "send_confirmation_email",
    "generate_shipping_label",
];

/// The order-processing shape: validate → pay → update → notify ×2
fn order_definition(inventory_retry: RetryPolicy) -> WorkflowDefinition {
    WorkflowDefinition::builder("process_order")
        .require_fields(["orderId", "items"])
        .step(
            ActivityStep::new("check_inventory", "check_inventory")
                .with_input(|ctx| Ok(json!({"items": ctx.input()["items"]})))
                .with_retry(inventory_retry),
        )
        .step(
            ActivityStep::new("process_payment", "process_payment")
                .with_input(|ctx| Ok(json!({"orderId": ctx.input()["orderId"]}))),
        )
        .step(
            ActivityStep::new("update_inventory", "update_inventory")
                .with_input(|ctx| {
                    Ok(json!({
                        "items": ctx.input()["items"],
                        "inventory": ctx.require_output("check_inventory")?,
                    }))
                })
                .with_retry(RetryPolicy::fixed(Duration::from_millis(10), 3)),
        )
        .parallel([
            ActivityStep::new("send_confirmation_email", "send_confirmation_email").with_input(
                |ctx| {
                    Ok(json!({
                        "orderId": ctx.input()["orderId"],
                        "payment": ctx.require_output("process_payment")?,
                    }))
                },
            ),
            ActivityStep::new("generate_shipping_label", "generate_shipping_label")
                .with_input(|ctx| Ok(json!({"orderId": ctx.input()["orderId"]}))),
        ])
        .result(|ctx| {
            Ok(json!({
                "orderId": ctx.input()["orderId"],
                "payment": ctx.require_output("process_payment")?,
                "notifications": [
                    ctx.require_output("send_confirmation_email")?,
                    ctx.require_output("generate_shipping_label")?,
                ],
            }))
        })
        .build()
        .expect("order definition should build")
}

fn default_inventory_retry() -> RetryPolicy {
    RetryPolicy::exponential(3, Duration::from_millis(1000), 2.0)
}

fn order_input() -> Value {
    json!({"orderId": "O1", "items": [{"qty": 2}]})
}

fn engine_with(
    store: Arc<InMemoryHistoryStore>,
    definition: WorkflowDefinition,
    registry: ActivityRegistry,
) -> WorkflowEngine {
    let mut definitions = DefinitionRegistry::new();
    definitions.register(definition).unwrap();

    let config = ExecutorConfig {
        append_backoff: Duration::from_millis(5),
        run_retry_backoff: Duration::from_millis(20),
        max_run_retry_backoff: Duration::from_millis(100),
        ..ExecutorConfig::default()
    };
    WorkflowEngine::with_config(store, definitions, Arc::new(registry), config)
}

fn order_engine(script: &Script) -> (WorkflowEngine, Arc<InMemoryHistoryStore>) {
    let store = Arc::new(InMemoryHistoryStore::new());
    let engine = engine_with(
        store.clone(),
        order_definition(default_inventory_retry()),
        script.registry(ORDER_ACTIVITIES),
    );
    (engine, store)
}

/// Every `ActivityScheduled` as (step, attempt)
fn scheduled(records: &[HistoryRecord]) -> Vec<(String, u32)> {
    records
        .iter()
        .filter_map(|r| match &r.event {
            HistoryEvent::ActivityScheduled {
                step_id, attempt, ..
            } => Some((step_id.clone(), *attempt)),
            _ => None,
        })
        .collect()
}

/// Panics if any prefix of history has two unmatched schedules for one step
fn assert_one_in_flight_per_step(records: &[HistoryRecord]) {
    let mut open: HashMap<String, u32> = HashMap::new();
    for record in records {
        match &record.event {
            HistoryEvent::ActivityScheduled {
                step_id, attempt, ..
            } => {
                if let Some(previous) = open.insert(step_id.clone(), *attempt) {
                    panic!("step {step_id} scheduled attempt {attempt} while {previous} was open");
                }
            }
            HistoryEvent::ActivityCompleted { step_id, .. }
            | HistoryEvent::ActivityFailed { step_id, .. } => {
                assert!(open.remove(step_id).is_some(), "step {step_id} closed without schedule");
            }
            _ => {}
        }
    }
}

async fn wait_for(
    engine: &WorkflowEngine,
    id: Uuid,
    predicate: impl Fn(&InstanceStatus) -> bool,
) -> InstanceStatus {
    for _ in 0..1000 {
        let status = engine.status(id).await.unwrap();
        if predicate(&status) {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("instance {id} never reached the expected state");
}

// ============================================
// Scenarios
// ============================================

#[test_log::test(tokio::test)]
async fn test_order_completes_with_both_notifications() {
    let script = Script::default();
    script
        .set("process_payment", vec![Reply::Ok(json!({"paymentId": "P-1"}))])
        .set("send_confirmation_email", vec![Reply::Ok(json!({"emailId": "E-1"}))])
        .set("generate_shipping_label", vec![Reply::Ok(json!({"labelId": "L-1"}))]);
    let (engine, _store) = order_engine(&script);

    let id = engine.create_instance("process_order", order_input()).await.unwrap();
    let status = engine.run_instance(id).await.unwrap();
    assert_eq!(status, WorkflowStatus::Completed);

    let projected = engine.status(id).await.unwrap();
    assert_eq!(projected.status, WorkflowStatus::Completed);
    assert!(projected.error.is_none());

    let output = projected.output.unwrap();
    assert_eq!(output["orderId"], "O1");
    assert_eq!(
        output["notifications"],
        json!([{"emailId": "E-1"}, {"labelId": "L-1"}])
    );

    let history = engine.history(id).await.unwrap();
    assert_one_in_flight_per_step(&history);
    assert!(matches!(history[0].event, HistoryEvent::WorkflowStarted { .. }));
    assert!(matches!(
        history.last().map(|r| &r.event),
        Some(HistoryEvent::WorkflowCompleted { .. })
    ));
    assert_eq!(scheduled(&history).len(), 5);
    for activity in ORDER_ACTIVITIES {
        assert_eq!(script.calls(activity), 1, "{activity} should run once");
    }
}

#[test_log::test(tokio::test)]
async fn test_permanent_payment_failure_stops_workflow() {
    let script = Script::default();
    script.set("process_payment", vec![Reply::Permanent]);
    let (engine, _store) = order_engine(&script);

    let id = engine.create_instance("process_order", order_input()).await.unwrap();
    assert_eq!(engine.run_instance(id).await.unwrap(), WorkflowStatus::Failed);

    let status = engine.status(id).await.unwrap();
    let error = status.error.unwrap();
    assert_eq!(error.kind, WorkflowErrorKind::ActivityFailed);
    assert_eq!(error.step_id.as_deref(), Some("process_payment"));
    assert!(status.output.is_none());

    let history = engine.history(id).await.unwrap();
    let steps: Vec<String> = scheduled(&history).into_iter().map(|(step, _)| step).collect();
    assert_eq!(steps, vec!["check_inventory", "process_payment"]);
    assert_eq!(script.calls("update_inventory"), 0);
    assert_eq!(script.calls("send_confirmation_email"), 0);
}

#[test_log::test(tokio::test)]
async fn test_transient_inventory_failures_back_off_then_succeed() {
    let script = Script::default();
    script.set(
        "check_inventory",
        vec![Reply::Transient, Reply::Transient, Reply::Ok(json!({"available": true}))],
    );
    let (engine, _store) = order_engine(&script);

    let id = engine.create_instance("process_order", order_input()).await.unwrap();
    assert_eq!(engine.run_instance(id).await.unwrap(), WorkflowStatus::Completed);

    let history = engine.history(id).await.unwrap();
    let inventory: Vec<&HistoryRecord> = history
        .iter()
        .filter(|r| r.event.step_id() == Some("check_inventory"))
        .collect();

    let kinds: Vec<&str> = inventory.iter().map(|r| r.event.type_name()).collect();
    assert_eq!(
        kinds,
        vec![
            "activity_scheduled",
            "activity_failed",
            "activity_scheduled",
            "activity_failed",
            "activity_scheduled",
            "activity_completed",
        ]
    );

    // Attempt 2 is scheduled at least firstInterval after attempt 1 failed,
    // attempt 3 at least firstInterval * coefficient after attempt 2 failed
    let gap_1 = inventory[2].recorded_at - inventory[1].recorded_at;
    let gap_2 = inventory[4].recorded_at - inventory[3].recorded_at;
    assert!(gap_1 >= chrono::Duration::milliseconds(1000), "gap was {gap_1}");
    assert!(gap_2 >= chrono::Duration::milliseconds(2000), "gap was {gap_2}");

    assert_eq!(
        scheduled(&history)
            .into_iter()
            .filter(|(step, _)| step == "check_inventory")
            .map(|(_, attempt)| attempt)
            .collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_retry_bound_caps_attempts() {
    let script = Script::default();
    script.set("check_inventory", vec![Reply::Transient]);
    let store = Arc::new(InMemoryHistoryStore::new());
    let engine = engine_with(
        store,
        order_definition(RetryPolicy::exponential(3, Duration::from_millis(10), 2.0)),
        script.registry(ORDER_ACTIVITIES),
    );

    let id = engine.create_instance("process_order", order_input()).await.unwrap();
    assert_eq!(engine.run_instance(id).await.unwrap(), WorkflowStatus::Failed);

    let history = engine.history(id).await.unwrap();
    assert_eq!(
        scheduled(&history),
        vec![
            ("check_inventory".to_string(), 1),
            ("check_inventory".to_string(), 2),
            ("check_inventory".to_string(), 3),
        ]
    );
    assert_one_in_flight_per_step(&history);

    let error = engine.status(id).await.unwrap().error.unwrap();
    assert_eq!(error.kind, WorkflowErrorKind::RetryExhausted);
    assert_eq!(error.step_id.as_deref(), Some("check_inventory"));
    assert_eq!(script.calls("check_inventory"), 3);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_attempt_timeout_is_retried_as_transient() {
    let script = Script::default();
    script.set(
        "slow",
        vec![
            Reply::After(Duration::from_secs(60), Box::new(Reply::Ok(json!("late")))),
            Reply::Ok(json!("fast")),
        ],
    );
    let definition = WorkflowDefinition::builder("timeouts")
        .step(
            ActivityStep::new("slow", "slow")
                .with_timeout(Duration::from_millis(100))
                .with_retry(RetryPolicy::fixed(Duration::from_millis(10), 2)),
        )
        .build()
        .unwrap();
    let engine = engine_with(
        Arc::new(InMemoryHistoryStore::new()),
        definition,
        script.registry(&["slow"]),
    );

    let id = engine.create_instance("timeouts", json!({})).await.unwrap();
    assert_eq!(engine.run_instance(id).await.unwrap(), WorkflowStatus::Completed);

    let history = engine.history(id).await.unwrap();
    let failure = history.iter().find_map(|r| match &r.event {
        HistoryEvent::ActivityFailed {
            error_kind, message, ..
        } => Some((*error_kind, message.clone())),
        _ => None,
    });
    let (kind, message) = failure.expect("first attempt should have failed");
    assert_eq!(kind, ActivityErrorKind::Transient);
    assert!(message.contains("timed out"));
    assert_eq!(
        engine.status(id).await.unwrap().output,
        Some(json!({"slow": "fast"}))
    );
}

// ============================================
// Parallel join
// ============================================

fn join_definition() -> WorkflowDefinition {
    WorkflowDefinition::builder("fan_out")
        .parallel([ActivityStep::new("a", "a"), ActivityStep::new("b", "b")])
        .build()
        .unwrap()
}

async fn run_join(a: Reply, b: Reply) -> (InstanceStatus, Vec<HistoryRecord>) {
    let script = Script::default();
    script.set("a", vec![a]).set("b", vec![b]);
    let engine = engine_with(
        Arc::new(InMemoryHistoryStore::new()),
        join_definition(),
        script.registry(&["a", "b"]),
    );

    let id = engine.create_instance("fan_out", json!({})).await.unwrap();
    engine.run_instance(id).await.unwrap();
    (
        engine.status(id).await.unwrap(),
        engine.history(id).await.unwrap(),
    )
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_join_reports_a_when_a_fails_first() {
    let (status, history) = run_join(
        Reply::Permanent,
        Reply::After(Duration::from_millis(50), Box::new(Reply::Ok(json!("b")))),
    )
    .await;

    assert_eq!(status.status, WorkflowStatus::Failed);
    let error = status.error.unwrap();
    assert_eq!(error.kind, WorkflowErrorKind::JoinPartialFailure);
    assert_eq!(error.step_id.as_deref(), Some("a"));
    assert_eq!(error.root_cause().kind, WorkflowErrorKind::ActivityFailed);

    // b was left to finish and recorded before the terminal event
    let b_completed = history.iter().position(|r| {
        matches!(&r.event, HistoryEvent::ActivityCompleted { step_id, .. } if step_id == "b")
    });
    let failed = history
        .iter()
        .position(|r| matches!(r.event, HistoryEvent::WorkflowFailed { .. }));
    assert!(b_completed.unwrap() < failed.unwrap());
    assert_one_in_flight_per_step(&history);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_every_member_scheduled_when_first_fails_immediately() {
    let (status, history) = run_join(Reply::Permanent, Reply::Ok(json!("b"))).await;

    assert_eq!(status.error.unwrap().step_id.as_deref(), Some("a"));
    let mut attempts = scheduled(&history);
    attempts.sort();
    assert_eq!(attempts, vec![("a".to_string(), 1), ("b".to_string(), 1)]);
    assert!(history.iter().any(|r| {
        matches!(&r.event, HistoryEvent::ActivityCompleted { step_id, .. } if step_id == "b")
    }));
    assert_one_in_flight_per_step(&history);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_join_reports_a_when_a_fails_last() {
    let (status, _history) = run_join(
        Reply::After(Duration::from_millis(50), Box::new(Reply::Permanent)),
        Reply::Ok(json!("b")),
    )
    .await;

    let error = status.error.unwrap();
    assert_eq!(error.kind, WorkflowErrorKind::JoinPartialFailure);
    assert_eq!(error.step_id.as_deref(), Some("a"));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_join_prefers_earlier_branch_when_both_fail() {
    let (status, _history) = run_join(
        Reply::After(Duration::from_millis(50), Box::new(Reply::Permanent)),
        Reply::Permanent,
    )
    .await;

    assert_eq!(status.error.unwrap().step_id.as_deref(), Some("a"));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_join_results_in_specification_order() {
    let (status, _history) = run_join(
        Reply::After(Duration::from_millis(50), Box::new(Reply::Ok(json!("a")))),
        Reply::Ok(json!("b")),
    )
    .await;

    assert_eq!(status.status, WorkflowStatus::Completed);
    assert_eq!(status.output, Some(json!({"a": "a", "b": "b"})));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_stragglers_start_no_new_attempts() {
    let script = Script::default();
    script
        .set("a", vec![Reply::Permanent])
        .set(
            "b",
            vec![Reply::After(Duration::from_millis(50), Box::new(Reply::Transient))],
        );
    let definition = WorkflowDefinition::builder("fan_out")
        .parallel([
            ActivityStep::new("a", "a"),
            ActivityStep::new("b", "b").with_retry(RetryPolicy::fixed(Duration::from_millis(10), 5)),
        ])
        .build()
        .unwrap();
    let engine = engine_with(
        Arc::new(InMemoryHistoryStore::new()),
        definition,
        script.registry(&["a", "b"]),
    );

    let id = engine.create_instance("fan_out", json!({})).await.unwrap();
    assert_eq!(engine.run_instance(id).await.unwrap(), WorkflowStatus::Failed);

    let history = engine.history(id).await.unwrap();
    let b_attempts: Vec<u32> = scheduled(&history)
        .into_iter()
        .filter(|(step, _)| step == "b")
        .map(|(_, attempt)| attempt)
        .collect();
    assert_eq!(b_attempts, vec![1]);
    assert_eq!(script.calls("b"), 1);
}

// ============================================
// Durability and replay
// ============================================

#[test_log::test(tokio::test)]
async fn test_restart_replays_without_reinvoking_completed_steps() {
    let store = Arc::new(InMemoryHistoryStore::new());
    let script = Script::default();

    // First process: storage goes away while payment is running
    let crashing = {
        let mut registry = script.registry(&[
            "check_inventory",
            "update_inventory",
            "send_confirmation_email",
            "generate_shipping_label",
        ]);
        let outage = store.clone();
        let payments = Arc::new(AtomicU32::new(0));
        let counter = payments.clone();
        registry
            .register_fn("process_payment", move |_ctx, _input| {
                let outage = outage.clone();
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    outage.set_unavailable(true);
                    Ok(json!({"paymentId": "P-1"}))
                }
            })
            .unwrap();
        (engine_with(store.clone(), order_definition(default_inventory_retry()), registry), payments)
    };
    let (first, first_payments) = crashing;

    let id = first.create_instance("process_order", order_input()).await.unwrap();
    let result = first.run_instance(id).await;
    assert!(matches!(
        result,
        Err(EngineError::Store(StoreError::Unavailable(_)))
    ));
    assert_eq!(first_payments.load(Ordering::SeqCst), 1);

    // Second process: storage is back, a fresh engine resumes
    store.set_unavailable(false);
    let second = engine_with(
        store.clone(),
        order_definition(default_inventory_retry()),
        script.registry(ORDER_ACTIVITIES),
    );

    let resumed = second.resume_unfinished().await.unwrap();
    assert_eq!(resumed, vec![id]);
    let status = wait_for(&second, id, |s| s.status.is_terminal()).await;
    assert_eq!(status.status, WorkflowStatus::Completed);

    // Inventory ran once overall; payment's open attempt 1 ran again
    assert_eq!(script.calls("check_inventory"), 1);
    assert_eq!(script.calls("process_payment"), 1);

    let history = second.history(id).await.unwrap();
    assert_one_in_flight_per_step(&history);
    let payment_attempts: Vec<u32> = scheduled(&history)
        .into_iter()
        .filter(|(step, _)| step == "process_payment")
        .map(|(_, attempt)| attempt)
        .collect();
    assert_eq!(payment_attempts, vec![1]);
}

#[test_log::test(tokio::test)]
async fn test_replay_from_any_prefix_reaches_same_decisions() {
    let script = Script::default();
    script.set("check_inventory", vec![Reply::Ok(json!({"available": true}))]);
    let (engine, _store) = order_engine(&script);

    let id = engine.create_instance("process_order", order_input()).await.unwrap();
    engine.run_instance(id).await.unwrap();
    let full = engine.history(id).await.unwrap();
    let info = engine.store().get_instance(id).await.unwrap();

    let mut expected = scheduled(&full);
    expected.sort();
    let expected_result = engine.status(id).await.unwrap().output;

    for cut in 0..full.len() {
        let (replayed, store) = order_engine(&script);
        seed(&store, &info, &full[..cut]).await;

        assert_eq!(
            replayed.run_instance(id).await.unwrap(),
            WorkflowStatus::Completed,
            "prefix of {cut} events"
        );

        let history = replayed.history(id).await.unwrap();
        let mut decisions = scheduled(&history);
        decisions.sort();
        assert_eq!(decisions, expected, "prefix of {cut} events");
        assert_eq!(
            replayed.status(id).await.unwrap().output,
            expected_result,
            "prefix of {cut} events"
        );
        assert_one_in_flight_per_step(&history);
    }
}

async fn seed(store: &InMemoryHistoryStore, info: &InstanceInfo, records: &[HistoryRecord]) {
    store
        .create_instance(info.id, &info.definition, info.input.clone())
        .await
        .unwrap();
    for record in records {
        store
            .append(info.id, record.sequence, record.event.clone())
            .await
            .unwrap();
    }
}

#[test_log::test(tokio::test)]
async fn test_changed_step_input_is_non_deterministic() {
    let store = Arc::new(InMemoryHistoryStore::new());
    let id = Uuid::now_v7();
    store.create_instance(id, "mapped", json!({})).await.unwrap();
    for (sequence, event) in [
        HistoryEvent::WorkflowStarted { input: json!({}) },
        HistoryEvent::ActivityScheduled {
            step_id: "a".to_string(),
            name: "a".to_string(),
            input: json!({"n": 1}),
            attempt: 1,
        },
    ]
    .into_iter()
    .enumerate()
    {
        store.append(id, sequence as i64, event).await.unwrap();
    }

    let definition = WorkflowDefinition::builder("mapped")
        .step(ActivityStep::new("a", "a").with_input(|_| Ok(json!({"n": 2}))))
        .build()
        .unwrap();
    let script = Script::default();
    let engine = engine_with(store, definition, script.registry(&["a"]));

    let result = engine.run_instance(id).await;
    assert!(matches!(result, Err(EngineError::NonDeterminism(_))));
    assert_eq!(script.calls("a"), 0);
}

#[test_log::test(tokio::test)]
async fn test_terminal_instance_is_not_rerun() {
    let script = Script::default();
    let (engine, _store) = order_engine(&script);

    let id = engine.create_instance("process_order", order_input()).await.unwrap();
    engine.run_instance(id).await.unwrap();
    let events = engine.history(id).await.unwrap().len();

    assert_eq!(engine.run_instance(id).await.unwrap(), WorkflowStatus::Completed);
    assert_eq!(engine.history(id).await.unwrap().len(), events);
    assert_eq!(script.calls("check_inventory"), 1);
}

// ============================================
// Status, cancellation, validation
// ============================================

#[test_log::test(tokio::test)]
async fn test_status_never_moves_backwards() {
    let script = Script::default();
    for activity in ORDER_ACTIVITIES {
        script.set(
            activity,
            vec![Reply::After(Duration::from_millis(5), Box::new(Reply::Ok(json!({}))))],
        );
    }
    let (engine, _store) = order_engine(&script);

    let id = engine.start("process_order", order_input()).await.unwrap();

    let mut last_rank = 0;
    let mut seen_terminal = false;
    for _ in 0..1000 {
        let status = engine.status(id).await.unwrap();
        assert!(status.status.rank() >= last_rank, "status went back to {}", status.status);
        assert!(status.last_updated_at >= status.created_at);
        last_rank = status.status.rank();
        if status.status.is_terminal() {
            seen_terminal = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(seen_terminal);
}

#[test_log::test(tokio::test)]
async fn test_cancel_running_instance() {
    let script = Script::default();
    script.set("process_payment", vec![Reply::Hang]);
    let (engine, _store) = order_engine(&script);

    let id = engine.start("process_order", order_input()).await.unwrap();
    wait_for(&engine, id, |_| script.calls("process_payment") == 1).await;

    engine.cancel(id, "customer changed their mind").await.unwrap();

    let status = engine.status(id).await.unwrap();
    assert_eq!(status.status, WorkflowStatus::Failed);
    let error = status.error.unwrap();
    assert_eq!(error.kind, WorkflowErrorKind::Cancelled);
    assert_eq!(error.message, "customer changed their mind");

    for _ in 0..100 {
        if !engine.is_running(id) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!engine.is_running(id));

    let history = engine.history(id).await.unwrap();
    assert!(matches!(
        history.last().map(|r| &r.event),
        Some(HistoryEvent::WorkflowFailed { .. })
    ));
    assert_eq!(script.calls("update_inventory"), 0);

    assert!(matches!(
        engine.cancel(id, "again").await,
        Err(EngineError::Halted(_))
    ));
}

#[test_log::test(tokio::test)]
async fn test_cancel_pending_instance() {
    let script = Script::default();
    let (engine, _store) = order_engine(&script);

    let id = engine.create_instance("process_order", order_input()).await.unwrap();
    engine.cancel(id, "never mind").await.unwrap();

    assert_eq!(engine.run_instance(id).await.unwrap(), WorkflowStatus::Failed);
    assert_eq!(script.calls("check_inventory"), 0);
}

#[test_log::test(tokio::test)]
async fn test_shutdown_leaves_instance_resumable() {
    let store = Arc::new(InMemoryHistoryStore::new());
    let hanging = Script::default();
    hanging.set("check_inventory", vec![Reply::Hang]);
    let first = engine_with(
        store.clone(),
        order_definition(default_inventory_retry()),
        hanging.registry(ORDER_ACTIVITIES),
    );

    let id = first.start("process_order", order_input()).await.unwrap();
    wait_for(&first, id, |_| hanging.calls("check_inventory") == 1).await;

    first.shutdown(Duration::from_secs(1)).await;
    assert_eq!(first.active_count(), 0);
    assert_eq!(first.status(id).await.unwrap().status, WorkflowStatus::Running);

    // The activity gave up on cancellation; nothing about that was recorded
    let history = first.history(id).await.unwrap();
    assert!(matches!(
        history.last().map(|r| &r.event),
        Some(HistoryEvent::ActivityScheduled { step_id, .. }) if step_id == "check_inventory"
    ));

    let healthy = Script::default();
    let second = engine_with(
        store,
        order_definition(default_inventory_retry()),
        healthy.registry(ORDER_ACTIVITIES),
    );
    assert_eq!(second.run_instance(id).await.unwrap(), WorkflowStatus::Completed);
    assert_eq!(healthy.calls("check_inventory"), 1);
}

#[test_log::test(tokio::test)]
async fn test_shutdown_during_parallel_group_records_nothing() {
    let script = Script::default();
    script
        .set("a", vec![Reply::Hang])
        .set("b", vec![Reply::Hang]);
    let engine = engine_with(
        Arc::new(InMemoryHistoryStore::new()),
        join_definition(),
        script.registry(&["a", "b"]),
    );

    let id = engine.start("fan_out", json!({})).await.unwrap();
    wait_for(&engine, id, |_| script.calls("a") == 1 && script.calls("b") == 1).await;
    engine.shutdown(Duration::from_secs(1)).await;

    let history = engine.history(id).await.unwrap();
    let mut attempts = scheduled(&history);
    attempts.sort();
    assert_eq!(attempts, vec![("a".to_string(), 1), ("b".to_string(), 1)]);
    assert_eq!(engine.status(id).await.unwrap().status, WorkflowStatus::Running);
    assert!(!history.iter().any(|r| matches!(
        r.event,
        HistoryEvent::ActivityFailed { .. } | HistoryEvent::WorkflowFailed { .. }
    )));
}

#[test_log::test(tokio::test)]
async fn test_background_run_retries_after_store_outage() {
    let script = Script::default();
    let (engine, store) = order_engine(&script);

    let id = engine.create_instance("process_order", order_input()).await.unwrap();
    store.set_unavailable(true);
    let handle = engine.spawn(id);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!handle.is_finished());
    assert_eq!(script.calls("check_inventory"), 0);

    store.set_unavailable(false);
    let status = wait_for(&engine, id, |s| s.status.is_terminal()).await;
    assert_eq!(status.status, WorkflowStatus::Completed);
    handle.await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_shutdown_stops_outage_retries() {
    let script = Script::default();
    let (engine, store) = order_engine(&script);

    let id = engine.create_instance("process_order", order_input()).await.unwrap();
    store.set_unavailable(true);
    let handle = engine.spawn(id);

    tokio::time::sleep(Duration::from_millis(30)).await;
    engine.shutdown(Duration::from_millis(100)).await;
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(script.calls("check_inventory"), 0);
}

#[test_log::test(tokio::test)]
async fn test_missing_fields_rejected_before_instance_exists() {
    let script = Script::default();
    let (engine, store) = order_engine(&script);

    let result = engine
        .create_instance("process_order", json!({"orderId": "O1"}))
        .await;

    match result {
        Err(EngineError::Validation(error)) => {
            assert_eq!(error.missing_fields, vec!["items".to_string()]);
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert_eq!(store.instance_count(), 0);
}

#[test_log::test(tokio::test)]
async fn test_unknown_definition_and_instance() {
    let script = Script::default();
    let (engine, _store) = order_engine(&script);

    assert!(matches!(
        engine.create_instance("ship_order", json!({})).await,
        Err(EngineError::Registry(RegistryError::UnknownDefinition(_)))
    ));

    let missing = Uuid::now_v7();
    assert!(matches!(
        engine.status(missing).await,
        Err(EngineError::NotFound(id)) if id == missing
    ));
    assert!(matches!(
        engine.run_instance(missing).await,
        Err(EngineError::NotFound(_))
    ));
}
