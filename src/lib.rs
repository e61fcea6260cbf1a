//! Cellpilot - 笔记本智能体
//!
//! 模块划分：
//! - **agent**: 轮次入口（Generate / Edit / FollowUp / Chat）与 LLM 后端选择
//! - **actions**: 动作注册表与内置动作（generate、fixError、editCode、chat）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **context**: 块历史 -> 有界消息列表
//! - **core**: 错误、轮次状态、会话监管
//! - **document**: 内容块、文档存储与执行接口
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **stream**: 容错增量 JSON 解码与批次摄取
//! - **turn**: 动作选择、块同步与生成主循环

pub mod actions;
pub mod agent;
pub mod config;
pub mod context;
pub mod core;
pub mod document;
pub mod llm;
pub mod stream;
pub mod turn;

pub use agent::{create_llm_from_config, Agent, TurnMode};
pub use core::{AgentError, TurnOutcome};
