use tracing::{debug, trace};

use crate::error::{EngineError, Result};
use crate::jobs::JobService;
use crate::state::SubscriptionKind;

use super::context::CommandContext;
use super::types::Operation;
use super::{
    conditional, continue_process, destroy_scope, end_execution, multi_instance, take_outgoing,
    trigger, variable_listener,
};

/// 清空议程：逐个弹出操作执行，直到没有后续操作
///
/// 每轮清空后，为有新变量变化且存在变量监听订阅的流程实例追加评估操作。
pub(crate) async fn run_agenda(ctx: &mut CommandContext) -> Result<()> {
    loop {
        while let Some(operation) = ctx.agenda.next() {
            ctx.operations_run += 1;
            let limit = ctx.services.config.max_operations_per_command;
            if ctx.operations_run > limit {
                return Err(EngineError::OperationLimitExceeded(limit));
            }
            if !ctx.uow.contains(operation.execution()) {
                debug!(
                    operation = operation.name(),
                    execution = %operation.execution(),
                    "skipping operation for removed execution"
                );
                continue;
            }
            if hits_breakpoint(ctx, &operation)? {
                continue;
            }
            trace!(operation = operation.name(), execution = %operation.execution(), "executing operation");
            execute_operation(ctx, operation).await?;
        }

        for process_instance in ctx.variable_session.take_dirty() {
            let listening = ctx
                .uow
                .subscriptions_of_instance(&process_instance)
                .iter()
                .any(|subscription| subscription.kind == SubscriptionKind::VariableListener);
            if listening {
                ctx.agenda
                    .plan_evaluate_variable_listener_events(&process_instance);
            }
        }
        if ctx.agenda.is_empty() {
            return Ok(());
        }
    }
}

fn hits_breakpoint(ctx: &mut CommandContext, operation: &Operation) -> Result<bool> {
    let Operation::Continue {
        execution,
        force_synchronous: false,
        ..
    } = operation
    else {
        return Ok(false);
    };
    let Some(debugger) = ctx.services.debugger.clone() else {
        return Ok(false);
    };
    let at_node = {
        let current = ctx.execution(execution)?;
        let definition = ctx.definition(&current.process_definition_key)?;
        current
            .current_element()
            .map(|element| definition.node(element).is_some())
            .unwrap_or(false)
    };
    if !at_node || !debugger.is_breakpoint(ctx.execution(execution)?) {
        return Ok(false);
    }
    let job = JobService::create_breakpoint_job(ctx, execution)?;
    debug!(execution = %execution, job = %job, "breakpoint hit");
    Ok(true)
}

pub(crate) async fn execute_operation(ctx: &mut CommandContext, operation: Operation) -> Result<()> {
    match operation {
        Operation::Continue {
            execution,
            force_synchronous,
            in_compensation,
        } => continue_process::execute(ctx, &execution, force_synchronous, in_compensation).await,
        Operation::ContinueMultiInstance {
            execution,
            root,
            loop_counter,
        } => multi_instance::continue_instance(ctx, &execution, &root, loop_counter),
        Operation::TakeOutgoing {
            execution,
            evaluate_conditions,
        } => take_outgoing::execute(ctx, &execution, evaluate_conditions),
        Operation::EndExecution { execution } => end_execution::execute(ctx, &execution),
        Operation::DestroyScope { execution } => destroy_scope::execute(ctx, &execution),
        Operation::Trigger {
            execution,
            signal,
            payload,
        } => trigger::execute(ctx, &execution, signal.as_deref(), &payload).await,
        Operation::EvaluateConditionalEvents { process_instance } => {
            conditional::execute(ctx, &process_instance)
        }
        Operation::EvaluateVariableListenerEvents { process_instance } => {
            variable_listener::execute(ctx, &process_instance)
        }
        Operation::MonitorMultiInstance { root, from_job } => {
            multi_instance::monitor(ctx, &root, from_job)
        }
    }
}
