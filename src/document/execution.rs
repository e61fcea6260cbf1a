//! 代码执行协作方
//!
//! 只消费 execute(block_id) -> 完成信号；执行失败写入块自身的输出，不向核心抛错。

use async_trait::async_trait;

use crate::document::BlockId;

#[async_trait]
pub trait BlockExecutor: Send + Sync {
    /// 执行指定块并等待完成
    async fn execute(&self, id: BlockId);
}

/// 不连接内核时使用：什么也不执行
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExecutor;

#[async_trait]
impl BlockExecutor for NoopExecutor {
    async fn execute(&self, id: BlockId) {
        tracing::debug!(block = %id, "no kernel attached, skipping execution");
    }
}
