//! Agent 入口
//!
//! 供前端调用的轮次入口：start_turn 按模式运行一轮，
//! Generate 走完整的选择/执行/同步循环，Edit / FollowUp / Chat 直接调用单个动作。
//! cancel 随时中止当前轮次，已写入文档的块保留。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::actions::{default_registry, ActionContext, ActionRegistry, CHAT_ACTION, EDIT_ACTION};
use crate::config::{AgentSection, AppConfig};
use crate::core::{ActionState, AgentError, SessionSupervisor, TurnOutcome};
use crate::document::{Block, BlockExecutor, BlockId, DocumentStore};
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient};
use crate::turn::events::send_event;
use crate::turn::{
    run_generation_loop, sync_edit, ActionSelector, CellSynchronizer, EventSender, TurnEvent,
    TurnReport, TurnSession,
};

/// 轮次模式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnMode {
    /// 自主生成：循环选择动作直到 stop / 取消 / 上限
    Generate,
    /// 按指令改写指定块
    Edit { block: BlockId },
    /// 在该块上一次编辑指令的基础上追加要求
    FollowUp { block: BlockId },
    /// 以文字回答，写成一个叙述块
    Chat,
}

/// 根据配置与可用 API Key 选择 LLM 后端
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    if provider == "mock" {
        tracing::info!("Using Mock LLM");
        return Arc::new(MockLlmClient::new());
    }
    let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok()
        || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "deepseek";

    if use_deepseek {
        let model = cfg
            .llm
            .deepseek
            .model
            .clone()
            .unwrap_or_else(|| crate::llm::DEEPSEEK_CHAT.to_string());
        tracing::info!("Using DeepSeek LLM ({})", model);
        Arc::new(create_deepseek_client(Some(&model)))
    } else if use_openai {
        let model = cfg.llm.openai.model.clone().unwrap_or_else(|| cfg.llm.model.clone());
        tracing::info!("Using OpenAI LLM ({})", model);
        Arc::new(OpenAiClient::new(
            cfg.llm.base_url.as_deref(),
            &model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
        ))
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock LLM");
        Arc::new(MockLlmClient::new())
    }
}

/// 文档上的 Agent：持有动作、选择器与文档，逐轮运行
pub struct Agent {
    settings: AgentSection,
    selector: ActionSelector,
    registry: ActionRegistry,
    store: Arc<dyn DocumentStore>,
    executor: Option<Arc<dyn BlockExecutor>>,
    supervisor: SessionSupervisor,
    /// 每个块最近一次的编辑指令（FollowUp 用）
    previous_requests: Mutex<HashMap<BlockId, String>>,
    namespace: Mutex<String>,
    events: Option<EventSender>,
}

impl Agent {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        store: Arc<dyn DocumentStore>,
        executor: Option<Arc<dyn BlockExecutor>>,
        settings: AgentSection,
    ) -> Self {
        let selector = ActionSelector::new(llm.clone(), settings.auto_execute)
            .with_char_budget(settings.selector_char_budget)
            .with_max_output_tokens(settings.selector_max_tokens);
        let registry =
            default_registry(llm, settings.generation_settings(), settings.edit_temperature);
        Self {
            settings,
            selector,
            registry,
            store,
            executor,
            supervisor: SessionSupervisor::new(),
            previous_requests: Mutex::new(HashMap::new()),
            namespace: Mutex::new(String::new()),
            events: None,
        }
    }

    /// 按配置创建（LLM 由 create_llm_from_config 选择）
    pub fn from_config(
        cfg: &AppConfig,
        store: Arc<dyn DocumentStore>,
        executor: Option<Arc<dyn BlockExecutor>>,
    ) -> Self {
        Self::new(create_llm_from_config(cfg), store, executor, cfg.agent.clone())
    }

    pub fn with_events(mut self, tx: EventSender) -> Self {
        self.events = Some(tx);
        self
    }

    /// 替换动作注册表（测试或自定义动作）
    pub fn with_registry(mut self, registry: ActionRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }

    /// 更新内核命名空间快照（下一轮开始时生效）
    pub fn set_namespace(&self, namespace: impl Into<String>) {
        *self.namespace.lock().unwrap_or_else(PoisonError::into_inner) = namespace.into();
    }

    /// 中止当前轮次
    pub async fn cancel(&self) {
        tracing::info!("turn cancelled by user");
        self.supervisor.cancel().await;
    }

    fn namespace(&self) -> String {
        self.namespace.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn synchronizer(&self, auto_execute: bool) -> CellSynchronizer {
        let sync = CellSynchronizer::new(self.store.clone(), self.executor.clone(), auto_execute);
        match &self.events {
            Some(tx) => sync.with_events(tx.clone()),
            None => sync,
        }
    }

    /// 运行一轮；insertion_index 为生成块的起始位置，缺省时追加到文档末尾
    pub async fn start_turn(
        &self,
        user_text: &str,
        mode: TurnMode,
        insertion_index: Option<usize>,
    ) -> Result<TurnReport, AgentError> {
        let cancel = self.supervisor.begin_turn().await;
        let blocks = self.store.snapshot().await;
        let window = self.settings.history_window();

        match mode {
            TurnMode::Generate => {
                let start = insertion_index.unwrap_or(blocks.len());
                let state = ActionState::begin(&blocks, user_text, start, self.namespace(), window);
                let synchronizer = self.synchronizer(self.settings.auto_execute);
                let mut session = TurnSession::new(
                    &self.selector,
                    &self.registry,
                    &synchronizer,
                    &self.store,
                    cancel,
                )
                .with_max_iterations(self.settings.max_iterations);
                if let Some(tx) = &self.events {
                    session = session.with_event_tx(tx.clone());
                }
                run_generation_loop(&session, state).await
            }
            TurnMode::Chat => {
                let start = insertion_index.unwrap_or(blocks.len());
                let state = ActionState::begin(&blocks, user_text, start, self.namespace(), window);
                self.chat_turn(state, &cancel).await.map_err(|e| self.fail("chat", e))
            }
            TurnMode::Edit { block } | TurnMode::FollowUp { block } => {
                let follow_up = matches!(mode, TurnMode::FollowUp { .. });
                self.edit_turn(&blocks, block, user_text, follow_up, &cancel)
                    .await
                    .map_err(|e| self.fail(if follow_up { "follow_up" } else { "edit" }, e))
            }
        }
    }

    async fn chat_turn(
        &self,
        mut state: ActionState,
        cancel: &CancellationToken,
    ) -> Result<TurnReport, AgentError> {
        let batches = {
            let ctx = ActionContext::new(&state, cancel.clone());
            self.registry.run(CHAT_ACTION, &ctx).await?
        };
        let synced = self
            .synchronizer(false)
            .run(&mut state, CHAT_ACTION, batches, cancel)
            .await?;
        Ok(self.single_action_report(state, synced.cancelled))
    }

    async fn edit_turn(
        &self,
        blocks: &[Block],
        block: BlockId,
        user_text: &str,
        follow_up: bool,
        cancel: &CancellationToken,
    ) -> Result<TurnReport, AgentError> {
        let (index, target) = blocks
            .iter()
            .enumerate()
            .find(|(_, b)| b.id == block)
            .ok_or(AgentError::BlockNotFound(block))?;
        let request = self.edit_request(block, user_text, follow_up, blocks);

        let window = self.settings.history_window();
        let state = ActionState::begin(blocks, request, index, self.namespace(), window);
        let batches = {
            let ctx = ActionContext::new(&state, cancel.clone()).with_target(target);
            self.registry.run(EDIT_ACTION, &ctx).await?
        };
        let writes = sync_edit(&self.store, block, batches, cancel).await?;
        tracing::debug!(%block, writes, "edit synchronized");
        Ok(self.single_action_report(state, cancel.is_cancelled()))
    }

    /// 计算编辑指令并记住它；FollowUp 在上一次指令后追加。
    /// 已不在文档中的块的记录一并清掉
    fn edit_request(
        &self,
        block: BlockId,
        user_text: &str,
        follow_up: bool,
        live: &[Block],
    ) -> String {
        let mut previous = self.previous_requests.lock().unwrap_or_else(PoisonError::into_inner);
        previous.retain(|id, _| live.iter().any(|b| b.id == *id));
        let text = user_text.trim();
        let request = match previous.get(&block) {
            Some(prev) if follow_up => format!("{prev}; {text}"),
            _ => text.to_string(),
        };
        previous.insert(block, request.clone());
        request
    }

    /// 单动作轮次失败：发出 Error 事件并记录
    fn fail(&self, mode: &str, err: AgentError) -> AgentError {
        tracing::warn!(mode, kind = err.kind(), error = %err, "turn failed");
        send_event(
            &self.events,
            TurnEvent::Error {
                kind: err.kind().to_string(),
                text: err.to_string(),
            },
        );
        err
    }

    fn single_action_report(&self, state: ActionState, cancelled: bool) -> TurnReport {
        let outcome = if cancelled {
            TurnOutcome::Aborted
        } else {
            TurnOutcome::Completed
        };
        send_event(&self.events, TurnEvent::Finished { outcome, iterations: 1 });
        TurnReport {
            outcome,
            iterations: 1,
            actions: state.action_history.clone(),
            state,
        }
    }
}
