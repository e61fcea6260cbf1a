//! 轮次级错误
//!
//! 只有结构性失败（传输、流解析、未知动作、配置）会冒泡到循环控制器并结束本轮；
//! 模型违约在选择器内就地恢复，执行错误写在块输出里，用户取消是正常终态。

use thiserror::Error;
use uuid::Uuid;

use crate::llm::LlmError;

#[derive(Error, Debug)]
pub enum AgentError {
    /// 模型调用或流传输失败
    #[error("Transport error: {0}")]
    Transport(#[from] LlmError),

    /// 连续多个流快照无法解码
    #[error("Stream parse error: {0}")]
    StreamParse(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Block not found: {0}")]
    BlockNotFound(Uuid),

    /// 编辑类动作缺少目标块
    #[error("Action {0} requires a target block")]
    MissingTarget(String),
}

impl AgentError {
    /// 供事件/日志使用的错误类别
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Transport(_) => "transport",
            AgentError::StreamParse(_) => "parse",
            AgentError::UnknownAction(_) => "unknown_action",
            AgentError::BlockNotFound(_) => "block_not_found",
            AgentError::MissingTarget(_) => "missing_target",
        }
    }
}
