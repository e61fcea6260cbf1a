//! 会话监管：轮次级取消
//!
//! 每轮开始时换一个新的 CancellationToken（已取消的 token 无法复位）；
//! 用户点击「停止生成」时取消当前轮次，已写入的块不回滚。

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// 会话级生命周期管理：持有当前轮次的取消令牌
#[derive(Debug, Clone, Default)]
pub struct SessionSupervisor {
    current: Arc<RwLock<CancellationToken>>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始新轮次：替换为新的令牌并返回
    pub async fn begin_turn(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.current.write().await = token.clone();
        token
    }

    /// 当前轮次的令牌
    pub async fn cancel_token(&self) -> CancellationToken {
        self.current.read().await.clone()
    }

    /// 取消当前轮次（用户中止）
    pub async fn cancel(&self) {
        self.current.read().await.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_turn_gets_fresh_token() {
        let sup = SessionSupervisor::new();
        let first = sup.begin_turn().await;
        sup.cancel().await;
        assert!(first.is_cancelled());

        let second = sup.begin_turn().await;
        assert!(!second.is_cancelled());
        assert!(!sup.cancel_token().await.is_cancelled());
    }
}
