// 引擎配置模块

mod engine;
mod env;

pub use engine::EngineConfig;
pub use env::EnvConfig;
