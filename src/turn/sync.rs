//! 块同步器：把逐步到达的 GeneratedBatch 映射到文档中的块
//!
//! 第 offset 项对应位置 p = base + offset，base 为动作开始时的生成游标。
//! p 处没有块，或块属于其他分组时插入新块；否则仅在内容不同时覆盖（重复同步不产生写入）。
//! 某项之后已出现新项即视为定稿：游标越过它，开启自动执行时在后台执行。
//! 后台执行串成一条链，保证按顺序逐个运行，并在每个批次结束时汇合。

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::{ActionState, AgentError};
use crate::document::{Block, BlockExecutor, BlockId, DocumentStore};
use crate::stream::{BatchStream, GeneratedItem};
use crate::turn::events::{send_event, EventSender, TurnEvent};

/// 一次同步的统计
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// 最后一个批次的项数
    pub generated: usize,
    pub inserted: usize,
    pub updated: usize,
    pub executed: usize,
    pub cancelled: bool,
}

/// 单项写入的结果
enum Applied {
    Inserted(BlockId),
    Updated(BlockId),
    Unchanged(BlockId),
}

impl Applied {
    fn id(&self) -> BlockId {
        match self {
            Applied::Inserted(id) | Applied::Updated(id) | Applied::Unchanged(id) => *id,
        }
    }
}

pub struct CellSynchronizer {
    store: Arc<dyn DocumentStore>,
    executor: Option<Arc<dyn BlockExecutor>>,
    auto_execute: bool,
    events: Option<EventSender>,
}

impl CellSynchronizer {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        executor: Option<Arc<dyn BlockExecutor>>,
        auto_execute: bool,
    ) -> Self {
        Self {
            store,
            executor,
            auto_execute,
            events: None,
        }
    }

    pub fn with_events(mut self, tx: EventSender) -> Self {
        self.events = Some(tx);
        self
    }

    fn auto_executor(&self) -> Option<Arc<dyn BlockExecutor>> {
        if self.auto_execute {
            self.executor.clone()
        } else {
            None
        }
    }

    async fn apply_item(
        &self,
        state: &ActionState,
        action: &str,
        p: usize,
        item: &GeneratedItem,
    ) -> Applied {
        match self.store.block_at(p).await {
            Some(existing) if existing.group == Some(state.group_id) => {
                if existing.source == item.source {
                    return Applied::Unchanged(existing.id);
                }
                self.store.set_block_source(existing.id, &item.source).await;
                send_event(&self.events, TurnEvent::BlockUpdated { id: existing.id, index: p });
                Applied::Updated(existing.id)
            }
            _ => {
                let block =
                    Block::generated(item.kind, item.source.clone(), state.group_id, action);
                let id = self.store.insert_block_at(p, block).await;
                send_event(&self.events, TurnEvent::BlockInserted { id, index: p });
                Applied::Inserted(id)
            }
        }
    }

    /// 在前一个执行任务结束后执行 id
    fn chain_execution(
        &self,
        previous: Option<JoinHandle<()>>,
        executor: Arc<dyn BlockExecutor>,
        id: BlockId,
    ) -> JoinHandle<()> {
        let events = self.events.clone();
        tokio::spawn(async move {
            if let Some(prev) = previous {
                let _ = prev.await;
            }
            executor.execute(id).await;
            send_event(&events, TurnEvent::BlockExecuted { id });
        })
    }

    /// 消费整个批次流并写入文档；流中的错误原样返回（已写入的块保留）
    pub async fn run(
        &self,
        state: &mut ActionState,
        action: &str,
        mut batches: BatchStream,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, AgentError> {
        let base = state.generation_cursor_index;
        let len_before = self.store.len().await;
        let mut processed = 0usize;
        let mut chain: Option<JoinHandle<()>> = None;
        let mut outcome = SyncOutcome::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = batches.next() => next,
            };
            let batch = match next {
                None => break,
                Some(Ok(batch)) => batch,
                Some(Err(e)) => {
                    join(chain.take()).await;
                    return Err(e);
                }
            };
            outcome.generated = batch.len();
            tracing::debug!(action, items = batch.len(), from = processed, "applying batch");

            for (offset, item) in batch.items.iter().enumerate().skip(processed) {
                // 取消后不再写入本批次剩余的项
                if cancel.is_cancelled() {
                    break;
                }
                let p = base + offset;
                let applied = self.apply_item(state, action, p, item).await;
                match applied {
                    Applied::Inserted(_) => outcome.inserted += 1,
                    Applied::Updated(_) => outcome.updated += 1,
                    Applied::Unchanged(_) => {}
                }

                if offset + 1 < batch.len() {
                    state.advance_cursor(p + 1);
                    processed = offset + 1;
                    if let Some(executor) = self.auto_executor() {
                        chain = Some(self.chain_execution(chain.take(), executor, applied.id()));
                        outcome.executed += 1;
                    }
                }
            }
            join(chain.take()).await;
        }

        join(chain.take()).await;
        outcome.cancelled = cancel.is_cancelled();
        if outcome.cancelled {
            tracing::info!(action, generated = outcome.generated, "synchronization cancelled");
            return Ok(outcome);
        }

        state.advance_cursor(base + outcome.generated);
        let grew = self.store.len().await > len_before;
        if grew && outcome.generated > 0 {
            if let Some(executor) = self.auto_executor() {
                if let Some(last) = self.store.block_at(base + outcome.generated - 1).await {
                    executor.execute(last.id).await;
                    send_event(&self.events, TurnEvent::BlockExecuted { id: last.id });
                    outcome.executed += 1;
                }
            }
        }
        Ok(outcome)
    }
}

async fn join(handle: Option<JoinHandle<()>>) {
    if let Some(h) = handle {
        if let Err(e) = h.await {
            tracing::warn!(error = %e, "block execution task failed");
        }
    }
}

/// 编辑模式：把流中唯一一项写入目标块
pub async fn sync_edit(
    store: &Arc<dyn DocumentStore>,
    target: BlockId,
    mut batches: BatchStream,
    cancel: &CancellationToken,
) -> Result<usize, AgentError> {
    let mut writes = 0;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            next = batches.next() => next,
        };
        let Some(batch) = next.transpose()? else {
            break;
        };
        let Some(item) = batch.items.first() else {
            continue;
        };
        let (_, current) = store.find(target).await.ok_or(AgentError::BlockNotFound(target))?;
        if current.source != item.source {
            store.set_block_source(target, &item.source).await;
            writes += 1;
        }
    }
    Ok(writes)
}
