//! 轮次过程事件：供前端展示动作选择、块写入与执行进度

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::core::TurnOutcome;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// 迭代计数更新
    StepUpdate { iteration: usize, max_iterations: usize },
    /// 选择器给出的动作；contract_violation 表示模型回复不合约定、已回退为 generate
    ActionSelected {
        action: String,
        contract_violation: bool,
    },
    BlockInserted { id: Uuid, index: usize },
    BlockUpdated { id: Uuid, index: usize },
    /// 自动执行完成
    BlockExecuted { id: Uuid },
    /// Token 使用统计（本轮增量 + 累计）
    TokenUsage {
        prompt_tokens: u64,
        completion_tokens: u64,
        total_tokens: u64,
        cumulative_total: u64,
    },
    Finished { outcome: TurnOutcome, iterations: usize },
    Error { kind: String, text: String },
}

pub type EventSender = UnboundedSender<TurnEvent>;

pub(crate) fn send_event(tx: &Option<EventSender>, ev: TurnEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}
