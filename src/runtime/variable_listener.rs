use std::collections::BTreeSet;

use tracing::debug;

use crate::error::Result;
use crate::state::{EventSubscription, SubscriptionKind, VariableChangeFilter};

use super::context::CommandContext;
use super::scopes;

/// 用事务内累积的变量变化匹配变量监听订阅
///
/// 变化须发生在订阅执行自身或其祖先上，变量名相同且变化类型通过过滤。
/// 被匹配的变化只消费一次，未匹配的留待后续评估。
pub(crate) fn execute(ctx: &mut CommandContext, process_instance_id: &str) -> Result<()> {
    let pending = ctx.variable_session.pending_for(process_instance_id);
    if pending.is_empty() {
        return Ok(());
    }
    let subscriptions: Vec<EventSubscription> = ctx
        .unit_of_work()
        .subscriptions_of_instance(process_instance_id)
        .into_iter()
        .filter(|subscription| subscription.kind == SubscriptionKind::VariableListener)
        .collect();

    let mut consumed = BTreeSet::new();
    let mut fired = Vec::new();
    for subscription in subscriptions {
        let Some(variable) = subscription.event_name.as_deref() else {
            continue;
        };
        let filter = VariableChangeFilter::parse(subscription.configuration.as_deref());
        let mut visible = ctx.unit_of_work().tree().ancestors(&subscription.execution_id);
        visible.push(subscription.execution_id.clone());

        let matched: Vec<u64> = pending
            .iter()
            .filter(|change| change.variable == variable)
            .filter(|change| filter.matches(change.change_type))
            .filter(|change| visible.contains(&change.execution_id))
            .map(|change| change.id)
            .collect();
        if matched.is_empty() {
            continue;
        }
        consumed.extend(matched);
        fired.push(subscription);
    }
    ctx.variable_session.consume(process_instance_id, &consumed);

    for subscription in &fired {
        debug!(
            execution = %subscription.execution_id,
            activity = %subscription.activity_id,
            variable = ?subscription.event_name,
            "variable listener event fired"
        );
        scopes::fire_subscription(ctx, subscription, &serde_json::Value::Null)?;
    }
    Ok(())
}
