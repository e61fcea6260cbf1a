//! 动作选择器
//!
//! 先做确定性屏蔽（首轮不可 stop；上一条本轮消息没有执行错误时不可 fixError），
//! 再以温度 0 强制调用 NextAction 工具，schema 中只列出未屏蔽的动作。
//! 模型回复缺失、无法解析或选了被屏蔽的动作时，静默回退为 generate 并标记违约。

use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::actions::prompts;
use crate::context::{build_messages, marks_error};
use crate::core::{ActionKind, ActionState, AgentError};
use crate::llm::{LlmClient, LlmRequest, ToolSpec};
use crate::stream::parse_partial;

pub const DECISION_TOOL: &str = "NextAction";

const AUTO_EXECUTE_NOTE: &str = "Generated code cells are executed automatically; \
their outputs will appear in the conversation.";
const MANUAL_EXECUTE_NOTE: &str = "Generated code cells are not executed automatically; \
stop after generating code so the user can run it.";

/// 选择结果
#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    pub action: ActionKind,
    /// 模型附带的其他字段，仅用于日志
    pub info: Map<String, Value>,
    pub contract_violation: bool,
}

/// 当前状态下允许的动作
pub fn mask_actions(state: &ActionState) -> Vec<ActionKind> {
    ActionKind::ALL
        .into_iter()
        .filter(|a| match a {
            ActionKind::Stop => !state.is_first_turn,
            ActionKind::FixError => state.last_message().is_some_and(marks_error),
            ActionKind::Generate => true,
        })
        .collect()
}

fn action_description(action: ActionKind) -> &'static str {
    match action {
        ActionKind::Generate => "Generate new cells that make progress on the request",
        ActionKind::FixError => "Generate cells that fix the error in the last executed cell",
        ActionKind::Stop => "Stop: the request is satisfied or user input is needed",
    }
}

/// NextAction 工具：action 为若干 `{type: const}` 变体之一
pub fn decision_tool(allowed: &[ActionKind]) -> ToolSpec {
    let variants: Vec<Value> = allowed
        .iter()
        .map(|a| {
            json!({
                "type": "object",
                "description": action_description(*a),
                "properties": {"type": {"type": "string", "const": a.as_str()}},
                "required": ["type"],
            })
        })
        .collect();
    ToolSpec::new(
        DECISION_TOOL,
        "Choose the next action to take",
        json!({
            "type": "object",
            "properties": {"action": {"oneOf": variants}},
            "required": ["action"],
        }),
    )
}

/// 从各种可能的回复形状中找出动作名与附带字段
fn locate_action(value: &Value) -> (Option<String>, Map<String, Value>) {
    let mut info = Map::new();
    let name = match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => {
            for (k, v) in map {
                if k != "action" && k != "type" {
                    info.insert(k.clone(), v.clone());
                }
            }
            match map.get("action") {
                Some(Value::Object(inner)) => {
                    for (k, v) in inner {
                        if k != "type" {
                            info.insert(k.clone(), v.clone());
                        }
                    }
                    inner.get("type").and_then(Value::as_str).map(String::from)
                }
                Some(Value::String(s)) => Some(s.clone()),
                _ => map.get("type").and_then(Value::as_str).map(String::from),
            }
        }
        _ => None,
    };
    (name, info)
}

/// 解析模型回复；不合约定时回退为 generate
pub fn parse_decision(raw: &str, allowed: &[ActionKind]) -> Selection {
    let value = serde_json::from_str::<Value>(raw)
        .or_else(|_| parse_partial(raw))
        .unwrap_or_else(|_| Value::String(raw.trim().trim_matches('"').to_string()));
    let (name, info) = locate_action(&value);

    match name.as_deref().and_then(ActionKind::parse) {
        Some(action) if allowed.contains(&action) => Selection {
            action,
            info,
            contract_violation: false,
        },
        _ => {
            tracing::warn!(
                raw = %raw,
                ?allowed,
                "selector reply violates contract, falling back to generate"
            );
            Selection {
                action: ActionKind::Generate,
                info,
                contract_violation: true,
            }
        }
    }
}

/// 动作选择器
pub struct ActionSelector {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
    char_budget: usize,
    max_output_tokens: u32,
}

impl ActionSelector {
    pub fn new(llm: Arc<dyn LlmClient>, auto_execute: bool) -> Self {
        let note = if auto_execute {
            AUTO_EXECUTE_NOTE
        } else {
            MANUAL_EXECUTE_NOTE
        };
        Self {
            llm,
            system_prompt: format!("{}\n\n{}", prompts::load_prompt(prompts::SELECTOR), note),
            char_budget: 5_000,
            max_output_tokens: 64,
        }
    }

    pub fn with_char_budget(mut self, budget: usize) -> Self {
        self.char_budget = budget;
        self
    }

    pub fn with_max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = max;
        self
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// 底层客户端的累计 token 统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 选择下一个动作；只有传输失败会返回错误
    pub async fn select(&self, state: &ActionState) -> Result<Selection, AgentError> {
        let allowed = mask_actions(state);
        tracing::debug!(?allowed, first_turn = state.is_first_turn, "action mask");

        let messages = build_messages(&self.system_prompt, state, self.char_budget);
        let request = LlmRequest::new(self.system_prompt.clone(), messages)
            .with_forced_tool(decision_tool(&allowed))
            .with_temperature(0.0)
            .with_max_output_tokens(self.max_output_tokens);

        let raw = self.llm.complete(&request).await?;
        let selection = parse_decision(&raw, &allowed);
        if !selection.info.is_empty() {
            let info = Value::Object(selection.info.clone());
            tracing::debug!(%info, "selector extra fields");
        }
        Ok(selection)
    }
}
