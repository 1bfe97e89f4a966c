/// 引擎内置的变量名和删除原因

/// 多实例变量
pub mod multi_instance {
    pub const NUMBER_OF_INSTANCES: &str = "nrOfInstances";
    pub const NUMBER_OF_COMPLETED_INSTANCES: &str = "nrOfCompletedInstances";
    pub const NUMBER_OF_ACTIVE_INSTANCES: &str = "nrOfActiveInstances";
    pub const LOOP_COUNTER: &str = "loopCounter";
}

/// 为 true 时启用顺序流上的跳过表达式
pub const SKIP_EXPRESSION_ENABLED: &str = "_processflow_skip_expression_enabled";

/// 删除原因
pub mod delete_reason {
    pub const PROCESS_COMPLETED: &str = "process-completed";
    pub const TERMINATED: &str = "terminate-end-event";
    pub const BOUNDARY_EVENT_INTERRUPTING: &str = "boundary-event-interrupting";
    pub const EVENT_SUB_PROCESS_INTERRUPTING: &str = "event-sub-process-interrupting";
    pub const ERROR_CAUGHT: &str = "error-caught";
    pub const SCOPE_DESTROYED: &str = "scope-destroyed";
    pub const MULTI_INSTANCE_COMPLETED: &str = "multi-instance-completed";
    pub const ADHOC_CANCELLED: &str = "adhoc-sub-process-cancelled";
    pub const COMPENSATION_DONE: &str = "compensation-done";
}
