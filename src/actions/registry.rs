//! 动作注册表
//!
//! 所有动作实现 Action trait（name / description / run），由 ActionRegistry 按名注册与查找；
//! run 返回 GeneratedBatch 流，交给同步器写入文档。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::{ActionState, AgentError};
use crate::document::{Block, BlockKind};
use crate::stream::BatchStream;

/// 动作执行时可见的上下文
pub struct ActionContext<'a> {
    pub state: &'a ActionState,
    /// 编辑类动作的目标块
    pub target: Option<&'a Block>,
    pub cancel: CancellationToken,
}

impl<'a> ActionContext<'a> {
    pub fn new(state: &'a ActionState, cancel: CancellationToken) -> Self {
        Self {
            state,
            target: None,
            cancel,
        }
    }

    pub fn with_target(mut self, target: &'a Block) -> Self {
        self.target = Some(target);
        self
    }
}

/// 动作 trait：名称（写入生成块的 action 字段）、描述、异步执行
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 生成项未声明类型时使用的块类型
    fn block_kind(&self) -> BlockKind {
        BlockKind::Code
    }

    async fn run(&self, ctx: &ActionContext<'_>) -> Result<BatchStream, AgentError>;
}

/// 动作注册表：按名称存储 Arc<dyn Action>
#[derive(Default, Clone)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: impl Action + 'static) {
        let name = action.name().to_string();
        self.actions.insert(name, Arc::new(action));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    /// 已注册的动作名（排序后）
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn run(
        &self,
        name: &str,
        ctx: &ActionContext<'_>,
    ) -> Result<BatchStream, AgentError> {
        let action = self
            .actions
            .get(name)
            .ok_or_else(|| AgentError::UnknownAction(name.to_string()))?;
        tracing::debug!(action = %name, "running action");
        action.run(ctx).await
    }
}
