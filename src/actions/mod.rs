//! 动作：generate / fixError / editCode / chat
//!
//! 每个动作驱动一次流式模型调用，并把响应转换为 GeneratedBatch 流。

pub mod chat;
pub mod code;
pub mod edit;
pub mod fix_error;
pub mod prompts;
pub mod registry;
pub mod shared;

pub use chat::{ChatAction, CHAT_ACTION};
pub use code::{CodeAction, GENERATE_TOOL};
pub use edit::{edit_request_message, EditAction, EDIT_ACTION};
pub use fix_error::{FixErrorAction, FIX_INSTRUCTION};
pub use registry::{Action, ActionContext, ActionRegistry};
pub use shared::{cells_tool, source_tool, stream_batches, GenerationSettings};

use std::sync::Arc;

use crate::llm::LlmClient;

/// 注册全部内置动作；编辑类动作使用 edit_temperature
pub fn default_registry(
    llm: Arc<dyn LlmClient>,
    generation: GenerationSettings,
    edit_temperature: f32,
) -> ActionRegistry {
    let edit = GenerationSettings {
        temperature: edit_temperature,
        ..generation
    };
    let mut registry = ActionRegistry::new();
    registry.register(CodeAction::new(llm.clone(), generation));
    registry.register(FixErrorAction::new(llm.clone(), generation));
    registry.register(EditAction::new(llm.clone(), edit));
    registry.register(ChatAction::new(llm, generation));
    registry
}
