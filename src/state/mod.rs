// 执行树与事务状态

mod execution;
mod scope;
mod session;
mod store;
mod subscription;
mod tree;
mod unit_of_work;

pub use execution::{Execution, ExecutionId};
pub(crate) use execution::{new_id, next_sequence};
pub(crate) use scope::defining_execution;
pub use scope::VariableView;
pub use session::{
    VariableChange, VariableChangeFilter, VariableChangeType, VariableListenerSession,
};
#[cfg(feature = "memory-store")]
pub use store::MemoryStore;
pub use store::{ChangeSet, EntityStore};
pub use subscription::{EventSubscription, SubscriptionId, SubscriptionKind};
pub use tree::ExecutionTree;
pub use unit_of_work::UnitOfWork;
