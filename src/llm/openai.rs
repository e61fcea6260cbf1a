//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url），
//! DeepSeek、OpenAI 与自建代理都走这一实现。
//! 请求与响应都以 JSON 直接构造/读取，强制工具调用时只取工具参数文本。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::Client;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};

use crate::llm::{LlmClient, LlmError, LlmRequest, TextStream};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    /// 从响应（或最后一个流分片）的 usage 字段累加
    fn add_from(&self, usage: &Value) {
        let prompt = usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0);
        let completion = usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0);
        self.add(prompt, completion);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 Client 与 model 名
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            usage: TokenUsage::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// 构造 chat.completions 请求体
    fn request_body(&self, request: &LlmRequest, stream: bool) -> Value {
        let mut messages = vec![json!({"role": "system", "content": request.system_prompt})];
        messages.extend(
            request
                .messages
                .iter()
                .map(|m| json!({"role": m.role, "content": m.content})),
        );

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
            "stream": stream,
        });
        if let Some(max) = request.max_output_tokens {
            body["max_tokens"] = json!(max);
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect(),
            );
        }
        if let Some(name) = &request.forced_tool {
            body["tool_choice"] = json!({"type": "function", "function": {"name": name}});
        }
        if stream {
            body["stream_options"] = json!({"include_usage": true});
        }
        body
    }
}

/// 从完整响应中取工具参数（强制工具时）或文本
fn response_text(response: &Value, forced_tool: bool) -> Result<String, LlmError> {
    let message = response
        .pointer("/choices/0/message")
        .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))?;
    if forced_tool {
        if let Some(args) = message
            .pointer("/tool_calls/0/function/arguments")
            .and_then(Value::as_str)
        {
            return Ok(args.to_string());
        }
    }
    Ok(message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string())
}

/// 从流分片中取增量文本：工具参数增量优先，其次 content 增量
fn chunk_delta(chunk: &Value) -> String {
    let Some(delta) = chunk.pointer("/choices/0/delta") else {
        return String::new();
    };
    if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
        return calls
            .iter()
            .filter_map(|c| c.pointer("/function/arguments").and_then(Value::as_str))
            .collect();
    }
    delta
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError> {
        let body = self.request_body(request, false);
        let response: Value = self
            .client
            .chat()
            .create_byot(body)
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        if let Some(usage) = response.get("usage") {
            self.usage.add_from(usage);
        }
        response_text(&response, request.forced_tool.is_some())
    }

    async fn complete_stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError> {
        let body = self.request_body(request, true);
        let stream = self
            .client
            .chat()
            .create_stream_byot::<Value, Value>(body)
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let usage = self.usage.clone();
        let deltas = stream
            .map(move |chunk| match chunk {
                Ok(chunk) => {
                    if let Some(u) = chunk.get("usage").filter(|u| !u.is_null()) {
                        usage.add_from(u);
                    }
                    Ok(chunk_delta(&chunk))
                }
                Err(e) => Err(LlmError::Stream(e.to_string())),
            })
            .filter(|item| futures_util::future::ready(!matches!(item, Ok(s) if s.is_empty())));
        Ok(Box::pin(deltas))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Message;
    use crate::llm::ToolSpec;

    #[test]
    fn test_request_body_forces_tool() {
        let client = OpenAiClient::new(None, "gpt-4o-mini", Some("sk-test"));
        let req = LlmRequest::new("sys", vec![Message::user("hi")])
            .with_forced_tool(ToolSpec::new("NextAction", "pick", json!({"type": "object"})))
            .with_temperature(0.0)
            .with_max_output_tokens(64);
        let body = client.request_body(&req, false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["tool_choice"]["function"]["name"], "NextAction");
        assert_eq!(body["max_tokens"], 64);
        assert!(body.get("stream_options").is_none());
    }

    #[test]
    fn test_response_text_prefers_tool_arguments() {
        let resp = json!({"choices": [{"message": {"content": null, "tool_calls": [
            {"function": {"name": "NextAction", "arguments": "{\"action\":{\"type\":\"stop\"}}"}}
        ]}}]});
        assert_eq!(response_text(&resp, true).unwrap(), r#"{"action":{"type":"stop"}}"#);
        assert!(response_text(&json!({}), true).is_err());
    }

    #[test]
    fn test_chunk_delta() {
        let call = json!({"index": 0, "function": {"arguments": "{\"ce"}});
        let tool = json!({"choices": [{"delta": {"tool_calls": [call]}}]});
        assert_eq!(chunk_delta(&tool), "{\"ce");
        let text = json!({"choices": [{"delta": {"content": "hel"}}]});
        assert_eq!(chunk_delta(&text), "hel");
        assert_eq!(chunk_delta(&json!({"choices": []})), "");
    }
}
