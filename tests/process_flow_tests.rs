use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Barrier;

use processflow::{
    condition_from_fn, condition_variable_equals, handler_from_fn, listener_from_fn,
    DelegateExecution, EngineError, EngineEvent, EngineEventKind, ListenerEvent, MemoryHistory,
    MemoryStore, ProcessBuilder, ProcessEngine, TaskHandler,
};

fn engine_with_history() -> anyhow::Result<(ProcessEngine, Arc<MemoryHistory>)> {
    let history = Arc::new(MemoryHistory::new());
    let engine = ProcessEngine::builder().with_history(history.clone()).build()?;
    Ok((engine, history))
}

async fn execution_at(engine: &ProcessEngine, process_instance: &str, activity: &str) -> anyhow::Result<String> {
    engine
        .executions(process_instance)
        .await?
        .into_iter()
        .find(|execution| execution.current_element.as_deref() == Some(activity))
        .map(|execution| execution.id)
        .ok_or_else(|| anyhow::anyhow!("no execution at `{activity}`"))
}

fn recording_handler(log: Arc<Mutex<Vec<String>>>, name: &'static str) -> Arc<dyn TaskHandler> {
    handler_from_fn(move |execution: &mut DelegateExecution<'_>| {
        log.lock().push(name.to_string());
        execution.set_variable(name, true)?;
        Ok(())
    })
}

#[tokio::test]
async fn sequence_runs_to_completion_in_one_command() -> anyhow::Result<()> {
    let (engine, history) = engine_with_history()?;
    let log = Arc::new(Mutex::new(Vec::new()));
    engine.register_handler("charge", recording_handler(log.clone(), "charged"));
    engine.deploy(
        ProcessBuilder::new("order")
            .start_event("start")
            .service_task("charge", "charge")
            .end_event("end")
            .flow("start", "charge")
            .flow("charge", "end")
            .build()?,
    );

    let pid = engine.start_process_instance("order", json!({ "amount": 10 })).await?;

    assert!(engine.is_ended(&pid).await?);
    assert_eq!(*log.lock(), vec!["charged".to_string()]);
    assert_eq!(
        history.completed_activity_ids(&pid),
        vec!["start".to_string(), "charge".to_string(), "end".to_string()]
    );
    let record = history.process(&pid).expect("process record");
    assert!(record.ended_at.is_some());
    Ok(())
}

#[tokio::test]
async fn unknown_process_is_rejected() -> anyhow::Result<()> {
    let engine = ProcessEngine::builder().build()?;
    let result = engine.start_process_instance("missing", Value::Null).await;
    assert!(matches!(result, Err(EngineError::UnknownProcess(key)) if key == "missing"));
    Ok(())
}

#[tokio::test]
async fn parallel_fork_creates_every_branch_before_continuing() -> anyhow::Result<()> {
    let (engine, _) = engine_with_history()?;
    let events = Arc::new(Mutex::new(Vec::<EngineEvent>::new()));
    let recorded = events.clone();
    engine.add_event_listener(Arc::new(move |event: &EngineEvent| -> anyhow::Result<()> {
        recorded.lock().push(event.clone());
        Ok(())
    }));
    engine.register_handler("noop", handler_from_fn(|_| Ok(())));
    engine.deploy(
        ProcessBuilder::new("fork")
            .start_event("start")
            .parallel_gateway("fork")
            .service_task("a", "noop")
            .service_task("b", "noop")
            .parallel_gateway("join")
            .end_event("end")
            .flow("start", "fork")
            .flow_with_id("to_a", "fork", "a")
            .flow_with_id("to_b", "fork", "b")
            .flow("a", "join")
            .flow("b", "join")
            .flow("join", "end")
            .build()?,
    );

    let pid = engine.start_process_instance("fork", Value::Null).await?;
    assert!(engine.is_ended(&pid).await?);

    let events = events.lock().clone();
    let position = |kind: EngineEventKind, element: &str| {
        events
            .iter()
            .position(|event| event.kind == kind && event.element_id.as_deref() == Some(element))
    };
    let taken_a = position(EngineEventKind::SequenceFlowTaken, "to_a").expect("to_a taken");
    let taken_b = position(EngineEventKind::SequenceFlowTaken, "to_b").expect("to_b taken");
    let started_a = position(EngineEventKind::ActivityStarted, "a").expect("a started");
    let started_b = position(EngineEventKind::ActivityStarted, "b").expect("b started");
    assert!(taken_a.max(taken_b) < started_a.min(started_b));
    assert_eq!(
        events
            .iter()
            .filter(|event| event.kind == EngineEventKind::ProcessCompleted)
            .count(),
        1
    );
    Ok(())
}

#[tokio::test]
async fn parallel_join_waits_for_every_branch() -> anyhow::Result<()> {
    let (engine, _) = engine_with_history()?;
    engine.deploy(
        ProcessBuilder::new("review")
            .start_event("start")
            .parallel_gateway("fork")
            .user_task("legal")
            .user_task("finance")
            .parallel_gateway("join")
            .end_event("end")
            .flow("start", "fork")
            .flow("fork", "legal")
            .flow("fork", "finance")
            .flow("legal", "join")
            .flow("finance", "join")
            .flow("join", "end")
            .build()?,
    );

    let pid = engine.start_process_instance("review", Value::Null).await?;
    assert_eq!(
        engine.active_activity_ids(&pid).await?,
        vec!["finance".to_string(), "legal".to_string()]
    );

    let legal = execution_at(&engine, &pid, "legal").await?;
    engine.trigger(&legal, json!({ "legal_ok": true })).await?;
    assert_eq!(engine.active_activity_ids(&pid).await?, vec!["finance".to_string()]);
    assert!(!engine.is_ended(&pid).await?);

    let waiting = execution_at(&engine, &pid, "join").await?;
    let result = engine.trigger(&waiting, Value::Null).await;
    assert!(matches!(result, Err(EngineError::NotTriggerable { activity }) if activity == "join"));

    let finance = execution_at(&engine, &pid, "finance").await?;
    engine.trigger(&finance, Value::Null).await?;
    assert!(engine.is_ended(&pid).await?);
    Ok(())
}

#[tokio::test]
async fn exclusive_gateway_falls_back_to_default_flow() -> anyhow::Result<()> {
    let (engine, history) = engine_with_history()?;
    engine.deploy(
        ProcessBuilder::new("route")
            .start_event("start")
            .exclusive_gateway("amount")
            .task("manual_review")
            .task("auto_approve")
            .end_event("end")
            .flow("start", "amount")
            .conditional_flow(
                "amount",
                "manual_review",
                condition_from_fn(|vars| vars.get_i64("amount").unwrap_or(0) > 100),
            )
            .default_flow("amount", "auto_approve")
            .flow("manual_review", "end")
            .flow("auto_approve", "end")
            .build()?,
    );

    let small = engine.start_process_instance("route", json!({ "amount": 5 })).await?;
    let started = history.started_activity_ids(&small);
    assert!(started.contains(&"auto_approve".to_string()));
    assert!(!started.contains(&"manual_review".to_string()));

    let large = engine.start_process_instance("route", json!({ "amount": 500 })).await?;
    let started = history.started_activity_ids(&large);
    assert!(started.contains(&"manual_review".to_string()));
    assert!(!started.contains(&"auto_approve".to_string()));
    Ok(())
}

#[tokio::test]
async fn missing_outgoing_flow_fails_the_whole_command() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let engine = ProcessEngine::builder().with_store(store.clone()).build()?;
    engine.deploy(
        ProcessBuilder::new("stuck")
            .start_event("start")
            .exclusive_gateway("gw")
            .end_event("end")
            .flow("start", "gw")
            .conditional_flow("gw", "end", condition_variable_equals("go", true))
            .build()?,
    );

    let result = engine.start_process_instance("stuck", json!({ "go": false })).await;
    assert!(matches!(result, Err(EngineError::NoOutgoingFlow { activity }) if activity == "gw"));
    assert_eq!(store.execution_count(), 0);
    Ok(())
}

#[tokio::test]
async fn execution_listeners_see_start_end_and_take() -> anyhow::Result<()> {
    let (engine, _) = engine_with_history()?;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let node_log = seen.clone();
    let flow_log = seen.clone();
    let process_log = seen.clone();
    engine.deploy(
        ProcessBuilder::new("listened")
            .start_event("start")
            .task("work")
            .end_event("end")
            .flow("start", "work")
            .flow_with_id("done", "work", "end")
            .listener(
                "work",
                ListenerEvent::Start,
                listener_from_fn(move |_, event| {
                    node_log.lock().push(format!("work:{event:?}"));
                    Ok(())
                }),
            )
            .flow_listener(
                "done",
                listener_from_fn(move |_, event| {
                    flow_log.lock().push(format!("done:{event:?}"));
                    Ok(())
                }),
            )
            .process_listener(
                ListenerEvent::End,
                listener_from_fn(move |_, event| {
                    process_log.lock().push(format!("process:{event:?}"));
                    Ok(())
                }),
            )
            .build()?,
    );

    engine.start_process_instance("listened", Value::Null).await?;
    assert_eq!(
        *seen.lock(),
        vec![
            "work:Start".to_string(),
            "done:Take".to_string(),
            "process:End".to_string()
        ]
    );
    Ok(())
}

#[tokio::test]
async fn failing_event_listener_does_not_abort_the_command() -> anyhow::Result<()> {
    let (engine, _) = engine_with_history()?;
    let completed = Arc::new(Mutex::new(0usize));
    let counter = completed.clone();
    engine.add_event_listener(Arc::new(|_: &EngineEvent| -> anyhow::Result<()> {
        anyhow::bail!("listener broke")
    }));
    engine.add_event_listener(Arc::new(|event: &EngineEvent| -> anyhow::Result<()> {
        if event.kind == EngineEventKind::ActivityStarted {
            panic!("listener panicked");
        }
        Ok(())
    }));
    engine.add_event_listener(Arc::new(move |event: &EngineEvent| -> anyhow::Result<()> {
        if event.kind == EngineEventKind::ProcessCompleted {
            *counter.lock() += 1;
        }
        Ok(())
    }));
    engine.deploy(
        ProcessBuilder::new("noisy")
            .start_event("start")
            .task("work")
            .end_event("end")
            .flow("start", "work")
            .flow("work", "end")
            .build()?,
    );

    let pid = engine.start_process_instance("noisy", Value::Null).await?;
    assert!(engine.is_ended(&pid).await?);
    assert_eq!(*completed.lock(), 1);
    Ok(())
}

#[tokio::test]
async fn handler_failure_rolls_back_the_command() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let engine = ProcessEngine::builder().with_store(store.clone()).build()?;
    engine.register_handler(
        "explode",
        handler_from_fn(|_| Err(EngineError::programmatic("handler exploded"))),
    );
    engine.deploy(
        ProcessBuilder::new("fragile")
            .start_event("start")
            .user_task("approve")
            .service_task("explode", "explode")
            .end_event("end")
            .flow("start", "approve")
            .flow("approve", "explode")
            .flow("explode", "end")
            .build()?,
    );

    let pid = engine.start_process_instance("fragile", Value::Null).await?;
    let approve = execution_at(&engine, &pid, "approve").await?;
    let before = engine.execution(&approve).await?.expect("waiting execution");

    let result = engine.trigger(&approve, json!({ "approved": true })).await;
    assert!(matches!(result, Err(EngineError::Programmatic(_))));

    let after = engine.execution(&approve).await?.expect("still waiting");
    assert_eq!(after, before);
    assert_eq!(engine.variable(&pid, "approved").await?, None);
    Ok(())
}

#[tokio::test]
async fn concurrent_arrivals_at_a_join_conflict() -> anyhow::Result<()> {
    let (engine, _) = engine_with_history()?;
    let barrier: Arc<Mutex<Option<Arc<Barrier>>>> = Arc::new(Mutex::new(Some(Arc::new(Barrier::new(2)))));

    struct Rendezvous(Arc<Mutex<Option<Arc<Barrier>>>>);

    #[async_trait::async_trait]
    impl TaskHandler for Rendezvous {
        async fn execute(&self, _execution: &mut DelegateExecution<'_>) -> processflow::Result<()> {
            let barrier = self.0.lock().clone();
            if let Some(barrier) = barrier {
                barrier.wait().await;
            }
            Ok(())
        }
    }

    engine.register_handler("rendezvous", Arc::new(Rendezvous(barrier.clone())));
    engine.deploy(
        ProcessBuilder::new("race")
            .start_event("start")
            .parallel_gateway("fork")
            .user_task("left")
            .user_task("right")
            .service_task("left_sync", "rendezvous")
            .service_task("right_sync", "rendezvous")
            .parallel_gateway("join")
            .end_event("end")
            .flow("start", "fork")
            .flow("fork", "left")
            .flow("fork", "right")
            .flow("left", "left_sync")
            .flow("right", "right_sync")
            .flow("left_sync", "join")
            .flow("right_sync", "join")
            .flow("join", "end")
            .build()?,
    );

    let pid = engine.start_process_instance("race", Value::Null).await?;
    let left = execution_at(&engine, &pid, "left").await?;
    let right = execution_at(&engine, &pid, "right").await?;

    let (left_result, right_result) =
        tokio::join!(engine.trigger(&left, Value::Null), engine.trigger(&right, Value::Null));
    let retry = match (&left_result, &right_result) {
        (Ok(()), Err(EngineError::OptimisticLock { .. })) => right.clone(),
        (Err(EngineError::OptimisticLock { .. }), Ok(())) => left.clone(),
        other => anyhow::bail!("expected exactly one conflict, got {other:?}"),
    };
    assert!(!engine.is_ended(&pid).await?);

    barrier.lock().take();
    engine.trigger(&retry, Value::Null).await?;
    assert!(engine.is_ended(&pid).await?);
    Ok(())
}

#[tokio::test]
async fn variables_resolve_through_the_scope_chain() -> anyhow::Result<()> {
    let (engine, _) = engine_with_history()?;
    engine.deploy(
        ProcessBuilder::new("vars")
            .start_event("start")
            .user_task("wait")
            .end_event("end")
            .flow("start", "wait")
            .flow("wait", "end")
            .build()?,
    );

    let pid = engine.start_process_instance("vars", json!({ "customer": "acme" })).await?;
    let wait = execution_at(&engine, &pid, "wait").await?;

    assert_eq!(engine.variable(&wait, "customer").await?, Some(json!("acme")));
    engine.set_variables_local(&wait, json!({ "note": "local" })).await?;
    engine.set_variables(&wait, json!({ "customer": "globex" })).await?;

    assert_eq!(engine.variable(&wait, "note").await?, Some(json!("local")));
    assert_eq!(engine.variable(&pid, "note").await?, None);
    assert_eq!(engine.variable(&pid, "customer").await?, Some(json!("globex")));

    assert!(engine.remove_variable(&wait, "note").await?);
    assert!(!engine.remove_variable(&wait, "note").await?);
    assert!(matches!(
        engine.set_variables(&wait, json!([1, 2])).await,
        Err(EngineError::Programmatic(_))
    ));
    Ok(())
}

#[tokio::test]
async fn join_ends_when_sibling_branch_bypasses_it() -> anyhow::Result<()> {
    let (engine, _) = engine_with_history()?;
    engine.deploy(
        ProcessBuilder::new("bypass")
            .start_event("start")
            .parallel_gateway("fork")
            .parallel_gateway("join")
            .exclusive_gateway("route")
            .end_event("skipped")
            .end_event("joined")
            .flow("start", "fork")
            .flow("fork", "join")
            .flow("fork", "route")
            .conditional_flow("route", "join", condition_from_fn(|_| false))
            .default_flow("route", "skipped")
            .flow("join", "joined")
            .build()?,
    );

    let pid = engine.start_process_instance("bypass", Value::Null).await?;

    assert!(engine.is_ended(&pid).await?);
    Ok(())
}

#[tokio::test]
async fn scope_waits_for_branches_still_moving() -> anyhow::Result<()> {
    let (engine, history) = engine_with_history()?;
    let log = Arc::new(Mutex::new(Vec::new()));
    engine.register_handler("work", recording_handler(log.clone(), "worked"));
    engine.deploy(
        ProcessBuilder::new("uneven")
            .start_event("start")
            .parallel_gateway("fork")
            .end_event("short_end")
            .service_task("work", "work")
            .task("after_work")
            .end_event("long_end")
            .flow("start", "fork")
            .flow("fork", "short_end")
            .flow("fork", "work")
            .flow("work", "after_work")
            .flow("after_work", "long_end")
            .build()?,
    );

    let pid = engine.start_process_instance("uneven", Value::Null).await?;

    assert!(engine.is_ended(&pid).await?);
    assert_eq!(*log.lock(), vec!["worked".to_string()]);
    let started = history.started_activity_ids(&pid);
    assert!(started.contains(&"after_work".to_string()));
    assert!(started.contains(&"long_end".to_string()));
    Ok(())
}
