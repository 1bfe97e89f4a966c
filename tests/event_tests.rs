use std::sync::Arc;

use serde_json::{json, Value};

use processflow::{
    condition_variable_equals, handler_from_fn, EngineError, MemoryHistory, ProcessBuilder,
    ProcessEngine, SubscriptionKind, VariableChangeFilter,
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

fn delete_reason_of(history: &MemoryHistory, process_instance: &str, activity: &str) -> Option<String> {
    history
        .activities_of(process_instance)
        .into_iter()
        .find(|record| record.activity_id == activity)
        .and_then(|record| record.delete_reason)
}

#[tokio::test]
async fn error_boundary_catches_business_fault() -> anyhow::Result<()> {
    let (engine, history) = engine_with_history()?;
    engine.register_handler(
        "charge",
        handler_from_fn(|_| Err(EngineError::business_fault("CARD_DECLINED"))),
    );
    engine.deploy(
        ProcessBuilder::new("payment")
            .start_event("start")
            .service_task("charge", "charge")
            .end_event("paid")
            .error_boundary("declined", "charge", Some("CARD_DECLINED"))
            .task("notify_customer")
            .end_event("not_paid")
            .flow("start", "charge")
            .flow("charge", "paid")
            .flow("declined", "notify_customer")
            .flow("notify_customer", "not_paid")
            .build()?,
    );

    let pid = engine.start_process_instance("payment", Value::Null).await?;

    assert!(engine.is_ended(&pid).await?);
    let completed = history.completed_activity_ids(&pid);
    assert!(completed.contains(&"notify_customer".to_string()));
    assert!(!completed.contains(&"paid".to_string()));
    assert!(delete_reason_of(&history, &pid, "charge").is_some());
    Ok(())
}

#[tokio::test]
async fn unhandled_business_fault_fails_the_command() -> anyhow::Result<()> {
    let engine = ProcessEngine::builder().build()?;
    engine.register_handler(
        "charge",
        handler_from_fn(|_| Err(EngineError::business_fault("CARD_DECLINED"))),
    );
    engine.deploy(
        ProcessBuilder::new("payment")
            .start_event("start")
            .service_task("charge", "charge")
            .error_boundary("timeout", "charge", Some("TIMEOUT"))
            .end_event("end")
            .end_event("timeout_end")
            .flow("start", "charge")
            .flow("charge", "end")
            .flow("timeout", "timeout_end")
            .build()?,
    );

    let result = engine.start_process_instance("payment", Value::Null).await;
    assert!(matches!(
        result,
        Err(EngineError::UnhandledBusinessFault { code }) if code == "CARD_DECLINED"
    ));
    Ok(())
}

#[tokio::test]
async fn error_end_event_in_sub_process_reaches_boundary_of_the_sub_process() -> anyhow::Result<()> {
    let (engine, history) = engine_with_history()?;
    engine.deploy(
        ProcessBuilder::new("shipping")
            .start_event("start")
            .sub_process("pack", |b| {
                b.start_event("pack_start")
                    .task("pick_items")
                    .error_end_event("out_of_stock", "OUT_OF_STOCK")
                    .flow("pack_start", "pick_items")
                    .flow("pick_items", "out_of_stock");
            })
            .error_boundary("stock_problem", "pack", None)
            .user_task("reorder")
            .end_event("shipped")
            .end_event("reordered")
            .flow("start", "pack")
            .flow("pack", "shipped")
            .flow("stock_problem", "reorder")
            .flow("reorder", "reordered")
            .build()?,
    );

    let pid = engine.start_process_instance("shipping", Value::Null).await?;

    assert_eq!(engine.active_activity_ids(&pid).await?, vec!["reorder".to_string()]);
    assert!(history
        .completed_activity_ids(&pid)
        .contains(&"pick_items".to_string()));
    let executions = engine.executions(&pid).await?;
    assert!(executions
        .iter()
        .all(|execution| execution.current_element.as_deref() != Some("pack")));
    Ok(())
}

#[tokio::test]
async fn error_event_sub_process_handles_fault_at_process_level() -> anyhow::Result<()> {
    let (engine, history) = engine_with_history()?;
    engine.register_handler(
        "reserve",
        handler_from_fn(|_| Err(EngineError::business_fault("NO_ROOM"))),
    );
    engine.deploy(
        ProcessBuilder::new("booking")
            .start_event("start")
            .service_task("reserve", "reserve")
            .end_event("end")
            .flow("start", "reserve")
            .flow("reserve", "end")
            .event_sub_process("on_error", |b| {
                b.error_start_event("error_start", Some("NO_ROOM"))
                    .task("apologize")
                    .end_event("error_end")
                    .flow("error_start", "apologize")
                    .flow("apologize", "error_end");
            })
            .build()?,
    );

    let pid = engine.start_process_instance("booking", Value::Null).await?;

    assert!(engine.is_ended(&pid).await?);
    let completed = history.completed_activity_ids(&pid);
    assert!(completed.contains(&"apologize".to_string()));
    assert!(!completed.contains(&"end".to_string()));
    Ok(())
}

#[tokio::test]
async fn interrupting_message_boundary_cancels_the_task() -> anyhow::Result<()> {
    let (engine, history) = engine_with_history()?;
    engine.deploy(
        ProcessBuilder::new("approval")
            .start_event("start")
            .user_task("review")
            .end_event("approved")
            .message_boundary("withdrawn", "review", "withdraw", true)
            .end_event("cancelled")
            .flow("start", "review")
            .flow("review", "approved")
            .flow("withdrawn", "cancelled")
            .build()?,
    );

    let pid = engine.start_process_instance("approval", Value::Null).await?;
    let subscriptions = engine.subscriptions(&pid).await?;
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0].kind, SubscriptionKind::Message);

    engine
        .message_event_received("withdraw", &pid, json!({ "reason": "duplicate" }))
        .await?;

    assert!(engine.is_ended(&pid).await?);
    assert!(engine.subscriptions(&pid).await?.is_empty());
    assert!(history
        .completed_activity_ids(&pid)
        .contains(&"cancelled".to_string()));
    assert!(delete_reason_of(&history, &pid, "review").is_some());
    Ok(())
}

#[tokio::test]
async fn unknown_message_is_rejected() -> anyhow::Result<()> {
    let (engine, _) = engine_with_history()?;
    engine.deploy(
        ProcessBuilder::new("waiting")
            .start_event("start")
            .message_catch("payment_received", "paid")
            .end_event("end")
            .flow("start", "payment_received")
            .flow("payment_received", "end")
            .build()?,
    );

    let pid = engine.start_process_instance("waiting", Value::Null).await?;
    let result = engine.message_event_received("refunded", &pid, Value::Null).await;
    assert!(matches!(result, Err(EngineError::Programmatic(_))));
    assert!(!engine.is_ended(&pid).await?);

    let waiting = execution_at(&engine, &pid, "payment_received").await?;
    engine
        .message_event_received("paid", &waiting, json!({ "amount": 42 }))
        .await?;
    assert!(engine.is_ended(&pid).await?);
    Ok(())
}

#[tokio::test]
async fn non_interrupting_signal_boundary_fires_repeatedly() -> anyhow::Result<()> {
    let (engine, history) = engine_with_history()?;
    engine.deploy(
        ProcessBuilder::new("ticket")
            .start_event("start")
            .user_task("work_ticket")
            .end_event("done")
            .signal_boundary("reminder", "work_ticket", "remind", false)
            .task("send_reminder")
            .end_event("reminded")
            .flow("start", "work_ticket")
            .flow("work_ticket", "done")
            .flow("reminder", "send_reminder")
            .flow("send_reminder", "reminded")
            .build()?,
    );

    let pid = engine.start_process_instance("ticket", Value::Null).await?;
    assert_eq!(engine.signal_event_received("remind", Value::Null).await?, 1);
    assert_eq!(engine.signal_event_received("remind", Value::Null).await?, 1);
    assert_eq!(engine.active_activity_ids(&pid).await?, vec!["work_ticket".to_string()]);
    let reminders = history
        .completed_activity_ids(&pid)
        .into_iter()
        .filter(|activity| activity == "send_reminder")
        .count();
    assert_eq!(reminders, 2);

    let task = execution_at(&engine, &pid, "work_ticket").await?;
    engine.trigger(&task, Value::Null).await?;
    assert!(engine.is_ended(&pid).await?);
    assert_eq!(engine.signal_event_received("remind", Value::Null).await?, 0);
    Ok(())
}

#[tokio::test]
async fn signal_throw_reaches_other_process_instances() -> anyhow::Result<()> {
    let (engine, _) = engine_with_history()?;
    engine.deploy(
        ProcessBuilder::new("listener")
            .start_event("start")
            .signal_catch("wait_for_go", "go")
            .end_event("end")
            .flow("start", "wait_for_go")
            .flow("wait_for_go", "end")
            .build()?,
    );
    engine.deploy(
        ProcessBuilder::new("broadcaster")
            .start_event("start")
            .signal_throw("send_go", "go")
            .end_event("end")
            .flow("start", "send_go")
            .flow("send_go", "end")
            .build()?,
    );

    let first = engine.start_process_instance("listener", Value::Null).await?;
    let second = engine.start_process_instance("listener", Value::Null).await?;
    assert!(!engine.is_ended(&first).await?);

    let broadcaster = engine.start_process_instance("broadcaster", Value::Null).await?;
    assert!(engine.is_ended(&broadcaster).await?);
    assert!(engine.is_ended(&first).await?);
    assert!(engine.is_ended(&second).await?);
    Ok(())
}

#[tokio::test]
async fn non_interrupting_signal_event_sub_process_runs_beside_main_flow() -> anyhow::Result<()> {
    let (engine, history) = engine_with_history()?;
    engine.deploy(
        ProcessBuilder::new("claim")
            .start_event("start")
            .user_task("assess")
            .end_event("end")
            .flow("start", "assess")
            .flow("assess", "end")
            .event_sub_process("audit", |b| {
                b.signal_start_event("audit_start", "audit", false)
                    .task("record_audit")
                    .end_event("audit_end")
                    .flow("audit_start", "record_audit")
                    .flow("record_audit", "audit_end");
            })
            .build()?,
    );

    let pid = engine.start_process_instance("claim", Value::Null).await?;
    assert_eq!(engine.signal_event_received("audit", Value::Null).await?, 1);

    assert_eq!(engine.active_activity_ids(&pid).await?, vec!["assess".to_string()]);
    assert!(history
        .completed_activity_ids(&pid)
        .contains(&"record_audit".to_string()));

    let assess = execution_at(&engine, &pid, "assess").await?;
    engine.trigger(&assess, Value::Null).await?;
    assert!(engine.is_ended(&pid).await?);
    Ok(())
}

#[tokio::test]
async fn interrupting_message_event_sub_process_cancels_main_flow() -> anyhow::Result<()> {
    let (engine, history) = engine_with_history()?;
    engine.deploy(
        ProcessBuilder::new("order")
            .start_event("start")
            .user_task("fulfil")
            .end_event("end")
            .flow("start", "fulfil")
            .flow("fulfil", "end")
            .event_sub_process("cancellation", |b| {
                b.message_start_event("cancel_start", "cancel", true)
                    .task("refund")
                    .end_event("cancel_end")
                    .flow("cancel_start", "refund")
                    .flow("refund", "cancel_end");
            })
            .build()?,
    );

    let pid = engine.start_process_instance("order", Value::Null).await?;
    engine.message_event_received("cancel", &pid, Value::Null).await?;

    assert!(engine.is_ended(&pid).await?);
    assert!(history.completed_activity_ids(&pid).contains(&"refund".to_string()));
    assert!(delete_reason_of(&history, &pid, "fulfil").is_some());
    Ok(())
}

#[tokio::test]
async fn conditional_boundary_fires_when_variables_change() -> anyhow::Result<()> {
    let (engine, _) = engine_with_history()?;
    engine.deploy(
        ProcessBuilder::new("sla")
            .start_event("start")
            .user_task("handle")
            .end_event("end")
            .conditional_boundary("overdue", "handle", condition_variable_equals("overdue", true), true)
            .user_task("escalate")
            .end_event("escalated")
            .flow("start", "handle")
            .flow("handle", "end")
            .flow("overdue", "escalate")
            .flow("escalate", "escalated")
            .build()?,
    );

    let pid = engine.start_process_instance("sla", Value::Null).await?;
    engine.set_variables(&pid, json!({ "overdue": false })).await?;
    assert_eq!(engine.active_activity_ids(&pid).await?, vec!["handle".to_string()]);

    engine.set_variables(&pid, json!({ "overdue": true })).await?;
    assert_eq!(engine.active_activity_ids(&pid).await?, vec!["escalate".to_string()]);
    Ok(())
}

#[tokio::test]
async fn conditional_catch_waits_until_condition_holds() -> anyhow::Result<()> {
    let (engine, _) = engine_with_history()?;
    engine.deploy(
        ProcessBuilder::new("gate")
            .start_event("start")
            .conditional_catch("until_ready", condition_variable_equals("ready", true))
            .end_event("end")
            .flow("start", "until_ready")
            .flow("until_ready", "end")
            .build()?,
    );

    let pid = engine.start_process_instance("gate", Value::Null).await?;
    assert_eq!(engine.active_activity_ids(&pid).await?, vec!["until_ready".to_string()]);
    engine.set_variables(&pid, json!({ "ready": true })).await?;
    assert!(engine.is_ended(&pid).await?);

    let already = engine.start_process_instance("gate", json!({ "ready": true })).await?;
    assert!(engine.is_ended(&already).await?);
    Ok(())
}

#[tokio::test]
async fn variable_listener_catch_reacts_to_matching_change() -> anyhow::Result<()> {
    let (engine, _) = engine_with_history()?;
    engine.deploy(
        ProcessBuilder::new("watch")
            .start_event("start")
            .variable_listener_catch("status_changed", "status", VariableChangeFilter::Update)
            .end_event("end")
            .flow("start", "status_changed")
            .flow("status_changed", "end")
            .build()?,
    );

    let pid = engine
        .start_process_instance("watch", json!({ "status": "new" }))
        .await?;
    engine.set_variables(&pid, json!({ "unrelated": 1 })).await?;
    assert!(!engine.is_ended(&pid).await?);

    engine.set_variables(&pid, json!({ "status": "done" })).await?;
    assert!(engine.is_ended(&pid).await?);
    Ok(())
}

#[tokio::test]
async fn terminate_end_event_ends_every_branch() -> anyhow::Result<()> {
    let (engine, history) = engine_with_history()?;
    engine.deploy(
        ProcessBuilder::new("race")
            .start_event("start")
            .parallel_gateway("fork")
            .user_task("slow")
            .task("fast")
            .end_event("slow_end")
            .terminate_end_event("stop")
            .flow("start", "fork")
            .flow("fork", "slow")
            .flow("fork", "fast")
            .flow("slow", "slow_end")
            .flow("fast", "stop")
            .build()?,
    );

    let pid = engine.start_process_instance("race", Value::Null).await?;

    assert!(engine.is_ended(&pid).await?);
    assert!(engine.executions(&pid).await?.is_empty());
    assert!(delete_reason_of(&history, &pid, "slow").is_some());
    assert!(history.process(&pid).and_then(|record| record.ended_at).is_some());
    Ok(())
}

#[tokio::test]
async fn trigger_payload_releases_conditional_catch_on_sibling_branch() -> anyhow::Result<()> {
    let (engine, _) = engine_with_history()?;
    engine.deploy(
        ProcessBuilder::new("approval")
            .start_event("start")
            .parallel_gateway("fork")
            .user_task("approve")
            .conditional_catch("until_approved", condition_variable_equals("ready", true))
            .end_event("approved")
            .end_event("released")
            .flow("start", "fork")
            .flow("fork", "approve")
            .flow("fork", "until_approved")
            .flow("approve", "approved")
            .flow("until_approved", "released")
            .build()?,
    );

    let pid = engine.start_process_instance("approval", Value::Null).await?;
    assert_eq!(
        engine.active_activity_ids(&pid).await?,
        vec!["approve".to_string(), "until_approved".to_string()]
    );

    let approve = execution_at(&engine, &pid, "approve").await?;
    engine.trigger(&approve, json!({ "ready": true })).await?;

    assert!(engine.is_ended(&pid).await?);
    Ok(())
}

#[tokio::test]
async fn message_payload_releases_conditional_catch_on_sibling_branch() -> anyhow::Result<()> {
    let (engine, _) = engine_with_history()?;
    engine.deploy(
        ProcessBuilder::new("delivery")
            .start_event("start")
            .parallel_gateway("fork")
            .message_catch("parcel", "parcel_arrived")
            .conditional_catch("until_signed", condition_variable_equals("signed", true))
            .end_event("received")
            .end_event("signed")
            .flow("start", "fork")
            .flow("fork", "parcel")
            .flow("fork", "until_signed")
            .flow("parcel", "received")
            .flow("until_signed", "signed")
            .build()?,
    );

    let pid = engine.start_process_instance("delivery", Value::Null).await?;
    let parcel = execution_at(&engine, &pid, "parcel").await?;
    engine
        .message_event_received("parcel_arrived", &parcel, json!({ "signed": true }))
        .await?;

    assert!(engine.is_ended(&pid).await?);
    Ok(())
}
