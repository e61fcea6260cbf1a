//! editCode：把目标块整体改写为模型给出的新内容
//!
//! 上下文为目标块之前的历史，
//! 加上一条携带 userRequest / currentCellSource / currentNamespace 的用户消息。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::actions::prompts;
use crate::actions::shared::{source_tool, stream_batches, GenerationSettings};
use crate::actions::{Action, ActionContext};
use crate::context::{limit_messages, Message};
use crate::core::AgentError;
use crate::document::BlockKind;
use crate::llm::{LlmClient, LlmRequest};
use crate::stream::{BatchStream, Payload};

pub const EDIT_ACTION: &str = "editCode";

pub struct EditAction {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
    settings: GenerationSettings,
}

impl EditAction {
    pub fn new(llm: Arc<dyn LlmClient>, settings: GenerationSettings) -> Self {
        Self {
            llm,
            system_prompt: prompts::load_prompt(prompts::EDIT),
            settings,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

/// 编辑请求消息体
pub fn edit_request_message(user_request: &str, current_source: &str, namespace: &str) -> Message {
    let body = json!({
        "userRequest": user_request,
        "currentCellSource": current_source,
        "currentNamespace": namespace,
    });
    Message::user(body.to_string())
}

#[async_trait]
impl Action for EditAction {
    fn name(&self) -> &str {
        EDIT_ACTION
    }

    fn description(&self) -> &str {
        "Rewrite the target block according to the user's instruction"
    }

    async fn run(&self, ctx: &ActionContext<'_>) -> Result<BatchStream, AgentError> {
        let target = ctx
            .target
            .ok_or_else(|| AgentError::MissingTarget(EDIT_ACTION.to_string()))?;
        let state = ctx.state;

        let request_msg =
            edit_request_message(&state.user_request, &target.source, &state.namespace_snapshot);
        let messages = limit_messages(
            &state.prior_messages,
            &self.system_prompt,
            &request_msg,
            &[],
            self.settings.char_budget,
        );
        let request = LlmRequest::new(self.system_prompt.clone(), messages)
            .with_forced_tool(source_tool(EDIT_ACTION, self.description()))
            .with_temperature(self.settings.temperature);

        let kind = match target.kind {
            BlockKind::Narrative => BlockKind::Narrative,
            BlockKind::Code => self.block_kind(),
        };
        stream_batches(&self.llm, &request, &ctx.cancel, Payload::field("source", kind)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_request_message_fields() {
        let msg = edit_request_message("rename x", "x = 1", "x: int");
        let body: serde_json::Value = serde_json::from_str(&msg.content).unwrap();
        assert_eq!(body["userRequest"], "rename x");
        assert_eq!(body["currentCellSource"], "x = 1");
        assert_eq!(body["currentNamespace"], "x: int");
    }
}
