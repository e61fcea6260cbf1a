//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient：
//! complete（一次性返回结构化决策）、complete_stream（返回增量文本流）。
//! 强制调用工具时，两者返回的都是工具参数的 JSON 文本，由核心自行解码。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::Serialize;
use thiserror::Error;

use crate::context::Message;

/// 传输层错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("stream interrupted: {0}")]
    Stream(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// 模型可调用的工具（函数）声明
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// 一次模型调用的全部参数；messages 不含 system，由 system_prompt 单独给出
#[derive(Clone, Debug, PartialEq)]
pub struct LlmRequest {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub forced_tool: Option<String>,
    pub temperature: f32,
    pub max_output_tokens: Option<u32>,
}

impl LlmRequest {
    pub fn new(system_prompt: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages,
            tools: Vec::new(),
            forced_tool: None,
            temperature: 0.5,
            max_output_tokens: None,
        }
    }

    /// 注册工具并强制模型调用它
    pub fn with_forced_tool(mut self, tool: ToolSpec) -> Self {
        self.forced_tool = Some(tool.name.clone());
        self.tools.push(tool);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = Some(max);
        self
    }
}

/// 增量文本流（每项为新到达的一段文本）
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成：有强制工具时返回工具参数 JSON，否则返回文本
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError>;

    /// 流式完成，返回增量文本流
    async fn complete_stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
