//! chat：不调用工具，把模型的文本回答写成一个叙述块

use std::sync::Arc;

use async_trait::async_trait;

use crate::actions::prompts;
use crate::actions::shared::{stream_batches, GenerationSettings};
use crate::actions::{Action, ActionContext};
use crate::context::build_messages;
use crate::core::AgentError;
use crate::document::BlockKind;
use crate::llm::{LlmClient, LlmRequest};
use crate::stream::{BatchStream, Payload};

pub const CHAT_ACTION: &str = "chat";

pub struct ChatAction {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
    settings: GenerationSettings,
}

impl ChatAction {
    pub fn new(llm: Arc<dyn LlmClient>, settings: GenerationSettings) -> Self {
        Self {
            llm,
            system_prompt: prompts::load_prompt(prompts::CHAT),
            settings,
        }
    }
}

#[async_trait]
impl Action for ChatAction {
    fn name(&self) -> &str {
        CHAT_ACTION
    }

    fn description(&self) -> &str {
        "Answer the user's question in prose"
    }

    fn block_kind(&self) -> BlockKind {
        BlockKind::Narrative
    }

    async fn run(&self, ctx: &ActionContext<'_>) -> Result<BatchStream, AgentError> {
        let messages = build_messages(&self.system_prompt, ctx.state, self.settings.char_budget);
        let request = LlmRequest::new(self.system_prompt.clone(), messages)
            .with_temperature(self.settings.temperature);
        let payload = Payload::Text { kind: self.block_kind() };
        stream_batches(&self.llm, &request, &ctx.cancel, payload).await
    }
}
