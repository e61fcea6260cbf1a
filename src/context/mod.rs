//! 上下文构建：块历史 -> 有界消息列表
//!
//! - **message**: 消息与角色
//! - **outputs**: 执行输出摘要（截断、traceback 清洗）
//! - **history**: 块 -> 消息（回声抑制、过期错误过滤）
//! - **budget**: 字符预算裁剪

pub mod budget;
pub mod history;
pub mod message;
pub mod outputs;

pub use budget::{limit_messages, serialized_size};
pub use history::{blocks_to_messages, marks_error, HistoryWindow};
pub use message::{Message, Role};

use crate::core::ActionState;

/// 为一次模型调用组装消息：历史 + 用户请求 + 本轮已生成内容，受 max_chars 约束
pub fn build_messages(system_prompt: &str, state: &ActionState, max_chars: usize) -> Vec<Message> {
    limit_messages(
        &state.prior_messages,
        system_prompt,
        &Message::user(state.user_request.clone()),
        &state.messages_since_request,
        max_chars,
    )
}
