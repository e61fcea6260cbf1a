//! fixError：在上下文末尾追加修复指令后生成新的块

use std::sync::Arc;

use async_trait::async_trait;

use crate::actions::prompts::{self, with_namespace};
use crate::actions::shared::{cells_tool, stream_batches, GenerationSettings};
use crate::actions::{Action, ActionContext};
use crate::context::{build_messages, Message};
use crate::core::{ActionKind, AgentError};
use crate::llm::{LlmClient, LlmRequest};
use crate::stream::{BatchStream, Payload};

pub const FIX_INSTRUCTION: &str = "Fix the error encountered above";

pub struct FixErrorAction {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
    settings: GenerationSettings,
}

impl FixErrorAction {
    pub fn new(llm: Arc<dyn LlmClient>, settings: GenerationSettings) -> Self {
        Self {
            llm,
            system_prompt: prompts::load_prompt(prompts::GENERATE),
            settings,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

#[async_trait]
impl Action for FixErrorAction {
    fn name(&self) -> &str {
        ActionKind::FixError.as_str()
    }

    fn description(&self) -> &str {
        "Append blocks that fix the error raised by the last executed block"
    }

    async fn run(&self, ctx: &ActionContext<'_>) -> Result<BatchStream, AgentError> {
        let mut state = ctx.state.clone();
        state.messages_since_request.push(Message::user(FIX_INSTRUCTION));

        let system = with_namespace(&self.system_prompt, &state.namespace_snapshot);
        let messages = build_messages(&system, &state, self.settings.char_budget);
        let request = LlmRequest::new(system, messages)
            .with_forced_tool(cells_tool(super::code::GENERATE_TOOL, self.description()))
            .with_temperature(self.settings.temperature);
        stream_batches(&self.llm, &request, &ctx.cancel, Payload::cells(self.block_kind())).await
    }
}
