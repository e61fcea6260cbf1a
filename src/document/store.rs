//! 文档存储协作方
//!
//! 同步器只通过 snapshot / insert_block_at / set_block_source 三个原语访问文档；
//! 用户作为独立参与者可以同时编辑（无锁协调，后写者胜）。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::document::{Block, BlockId, BlockOutput};

/// 文档存储 trait：只读快照 + 两个变更原语
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// 当前全部块的只读快照（按文档顺序）
    async fn snapshot(&self) -> Vec<Block>;

    /// 在 index 处插入块（index 超出长度时追加到末尾），返回块 id
    async fn insert_block_at(&self, index: usize, block: Block) -> BlockId;

    /// 覆盖块源码；块不存在时返回 false
    async fn set_block_source(&self, id: BlockId, source: &str) -> bool;

    async fn len(&self) -> usize {
        self.snapshot().await.len()
    }

    async fn block_at(&self, index: usize) -> Option<Block> {
        self.snapshot().await.into_iter().nth(index)
    }

    async fn find(&self, id: BlockId) -> Option<(usize, Block)> {
        self.snapshot()
            .await
            .into_iter()
            .enumerate()
            .find(|(_, b)| b.id == id)
    }
}

/// 内存文档：可在多个任务间共享（Clone 共享同一份数据）
#[derive(Clone, Default)]
pub struct InMemoryDocument {
    blocks: Arc<RwLock<Vec<Block>>>,
    /// 通过变更原语产生的写入次数（插入 + 覆盖）
    mutations: Arc<AtomicU64>,
}

impl InMemoryDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_blocks(blocks: Vec<Block>) -> Self {
        Self {
            blocks: Arc::new(RwLock::new(blocks)),
            mutations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 用户侧追加块（不计入同步器写入次数）
    pub async fn push(&self, block: Block) -> BlockId {
        let id = block.id;
        self.blocks.write().await.push(block);
        id
    }

    /// 执行协作方写回输出
    pub async fn set_outputs(
        &self,
        id: BlockId,
        outputs: Vec<BlockOutput>,
        execution_count: Option<u32>,
    ) -> bool {
        let mut blocks = self.blocks.write().await;
        match blocks.iter_mut().find(|b| b.id == id) {
            Some(b) => {
                b.outputs = outputs;
                b.execution_count = execution_count;
                true
            }
            None => false,
        }
    }

    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocument {
    async fn snapshot(&self) -> Vec<Block> {
        self.blocks.read().await.clone()
    }

    async fn insert_block_at(&self, index: usize, block: Block) -> BlockId {
        let id = block.id;
        let mut blocks = self.blocks.write().await;
        let index = index.min(blocks.len());
        blocks.insert(index, block);
        self.mutations.fetch_add(1, Ordering::SeqCst);
        id
    }

    async fn set_block_source(&self, id: BlockId, source: &str) -> bool {
        let mut blocks = self.blocks.write().await;
        match blocks.iter_mut().find(|b| b.id == id) {
            Some(b) => {
                b.source = source.to_string();
                self.mutations.fetch_add(1, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    async fn len(&self) -> usize {
        self.blocks.read().await.len()
    }

    async fn block_at(&self, index: usize) -> Option<Block> {
        self.blocks.read().await.get(index).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_clamps_to_end() {
        let doc = InMemoryDocument::new();
        doc.push(Block::code("a")).await;
        let id = doc.insert_block_at(99, Block::code("b")).await;
        let snap = doc.snapshot().await;
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[1].id, id);
        assert_eq!(doc.mutation_count(), 1);
    }

    #[tokio::test]
    async fn test_set_source_and_find() {
        let doc = InMemoryDocument::new();
        let id = doc.push(Block::code("a")).await;
        assert!(doc.set_block_source(id, "b").await);
        let (idx, block) = doc.find(id).await.unwrap();
        assert_eq!(idx, 0);
        assert_eq!(block.source, "b");
        assert!(!doc.set_block_source(uuid::Uuid::new_v4(), "x").await);
    }
}
