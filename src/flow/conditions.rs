use serde_json::Value;
use std::sync::Arc;

use crate::state::VariableView;

/// 条件类型：基于执行可见变量求值
pub type Condition = Arc<dyn Fn(&VariableView) -> bool + Send + Sync>;

/// 从函数创建条件
pub fn condition_from_fn<F>(func: F) -> Condition
where
    F: Fn(&VariableView) -> bool + Send + Sync + 'static,
{
    Arc::new(func)
}

/// 总是为真的条件
pub fn condition_always() -> Condition {
    Arc::new(|_| true)
}

/// 变量等于指定值的条件
pub fn condition_variable_equals<K, V>(name: K, expected: V) -> Condition
where
    K: Into<String>,
    V: Into<Value>,
{
    let name = name.into();
    let expected = expected.into();
    Arc::new(move |vars| vars.get(&name) == Some(&expected))
}

/// 变量不等于指定值的条件（变量不存在时为真）
pub fn condition_variable_not_equals<K, V>(name: K, value: V) -> Condition
where
    K: Into<String>,
    V: Into<Value>,
{
    let name = name.into();
    let value = value.into();
    Arc::new(move |vars| vars.get(&name) != Some(&value))
}

/// 变量存在的条件
pub fn condition_variable_exists<K>(name: K) -> Condition
where
    K: Into<String>,
{
    let name = name.into();
    Arc::new(move |vars| vars.get(&name).map(|v| !v.is_null()).unwrap_or(false))
}

/// 变量不存在的条件
pub fn condition_variable_absent<K>(name: K) -> Condition
where
    K: Into<String>,
{
    let name = name.into();
    Arc::new(move |vars| vars.get(&name).map(Value::is_null).unwrap_or(true))
}
