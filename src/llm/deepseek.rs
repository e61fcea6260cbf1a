//! DeepSeek API 客户端（OpenAI 兼容格式）
//!
//! - Base URL: https://api.deepseek.com
//! - 选择器与生成动作都强制工具调用；deepseek-reasoner 不支持 tool_choice，
//!   请求 reasoner 时回退到 deepseek-chat

use crate::llm::OpenAiClient;

/// DeepSeek API 常量
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";

/// 把不支持强制工具调用的模型换成 deepseek-chat
pub fn tool_capable_model(requested: &str) -> &str {
    if requested.contains("reasoner") {
        tracing::warn!(requested, fallback = DEEPSEEK_CHAT, "model cannot force tool calls");
        DEEPSEEK_CHAT
    } else {
        requested
    }
}

/// 创建 DeepSeek 客户端
///
/// - 优先使用环境变量 `DEEPSEEK_API_KEY`
/// - 模型可通过 `model` 参数或 `DEEPSEEK_MODEL` 环境变量指定，经 [`tool_capable_model`] 过滤
pub fn create_deepseek_client(model: Option<&str>) -> OpenAiClient {
    let api_key = std::env::var("DEEPSEEK_API_KEY")
        .ok()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .unwrap_or_else(|| "sk-placeholder".to_string());

    let model = model
        .map(String::from)
        .or_else(|| std::env::var("DEEPSEEK_MODEL").ok())
        .unwrap_or_else(|| DEEPSEEK_CHAT.to_string());

    let model = tool_capable_model(&model);
    OpenAiClient::new(Some(DEEPSEEK_BASE_URL), model, Some(api_key.as_str()))
}
