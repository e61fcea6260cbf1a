//! generate：按对话上下文生成新的块

use std::sync::Arc;

use async_trait::async_trait;

use crate::actions::prompts::{self, with_namespace};
use crate::actions::shared::{cells_tool, stream_batches, GenerationSettings};
use crate::actions::{Action, ActionContext};
use crate::context::build_messages;
use crate::core::{ActionKind, AgentError};
use crate::llm::{LlmClient, LlmRequest};
use crate::stream::{BatchStream, Payload};

pub const GENERATE_TOOL: &str = "GenerateCells";

pub struct CodeAction {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
    settings: GenerationSettings,
}

impl CodeAction {
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
impl Action for CodeAction {
    fn name(&self) -> &str {
        ActionKind::Generate.as_str()
    }

    fn description(&self) -> &str {
        "Append new code or markdown blocks that make progress on the request"
    }

    async fn run(&self, ctx: &ActionContext<'_>) -> Result<BatchStream, AgentError> {
        let system = with_namespace(&self.system_prompt, &ctx.state.namespace_snapshot);
        let messages = build_messages(&system, ctx.state, self.settings.char_budget);
        let request = LlmRequest::new(system, messages)
            .with_forced_tool(cells_tool(GENERATE_TOOL, self.description()))
            .with_temperature(self.settings.temperature);
        stream_batches(&self.llm, &request, &ctx.cancel, Payload::cells(self.block_kind())).await
    }
}
