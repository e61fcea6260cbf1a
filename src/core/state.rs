//! 轮次状态：ActionState、动作种类、循环阶段与终止结果
//!
//! ActionState 在轮次开始时创建，并显式地在循环各组件之间传递；
//! generation_cursor_index 只增不减，action_history 只追加。

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::{blocks_to_messages, HistoryWindow, Message};
use crate::document::Block;

/// 动作选择器可选的三种动作
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    #[serde(rename = "generate")]
    Generate,
    #[serde(rename = "fixError")]
    FixError,
    #[serde(rename = "stop")]
    Stop,
}

impl ActionKind {
    pub const ALL: [ActionKind; 3] = [ActionKind::Generate, ActionKind::FixError, ActionKind::Stop];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Generate => "generate",
            ActionKind::FixError => "fixError",
            ActionKind::Stop => "stop",
        }
    }

    /// 解析模型返回的动作名；兼容早期的 `code` 写法
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "generate" | "code" => Some(ActionKind::Generate),
            "fixError" | "fix_error" => Some(ActionKind::FixError),
            "stop" => Some(ActionKind::Stop),
            _ => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 循环阶段（事件与日志用）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    SelectAction,
    ExecuteAction,
    Synchronize,
}

/// 轮次的终止状态；错误以 Err(AgentError) 返回
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    /// 选择器明确给出 stop
    Stopped,
    /// 用户取消
    Aborted,
    /// 达到迭代上限（不是错误）
    CeilingReached,
    /// 单次动作的入口（编辑 / 追问 / 对话）执行完毕
    Completed,
}

/// 一轮生成的全部状态
#[derive(Clone, Debug)]
pub struct ActionState {
    pub user_request: String,
    /// 轮次开始前的历史（开始时计算一次）
    pub prior_messages: Vec<Message>,
    /// 本轮已生成块对应的消息：blocks[generation_start_index..generation_cursor_index]
    pub messages_since_request: Vec<Message>,
    pub is_first_turn: bool,
    /// 本轮第一个生成块的位置
    pub generation_start_index: usize,
    /// 已完成处理的块的结束位置（不含）
    pub generation_cursor_index: usize,
    /// 内核命名空间快照（变量列表等），由调用方提供
    pub namespace_snapshot: String,
    pub group_id: Uuid,
    pub action_history: Vec<ActionKind>,
    /// 构建 messages_since_request 时使用的输出长度上限
    max_output_length: usize,
}

impl ActionState {
    /// 轮次开始：start_index 之前的块作为历史
    pub fn begin(
        blocks: &[Block],
        user_request: impl Into<String>,
        start_index: usize,
        namespace_snapshot: impl Into<String>,
        window: HistoryWindow,
    ) -> Self {
        let start = start_index.min(blocks.len());
        Self {
            user_request: user_request.into().trim().to_string(),
            prior_messages: blocks_to_messages(&blocks[..start], window),
            messages_since_request: Vec::new(),
            is_first_turn: true,
            generation_start_index: start,
            generation_cursor_index: start,
            namespace_snapshot: namespace_snapshot.into(),
            group_id: Uuid::new_v4(),
            action_history: Vec::new(),
            max_output_length: window.max_output_length,
        }
    }

    pub fn with_group(mut self, group: Uuid) -> Self {
        self.group_id = group;
        self
    }

    /// 游标只前进不后退
    pub fn advance_cursor(&mut self, to: usize) {
        if to > self.generation_cursor_index {
            self.generation_cursor_index = to;
        }
    }

    /// 动作完成后记录历史，并按最新文档重算本轮消息
    pub fn record_action(&mut self, action: ActionKind, blocks: &[Block]) {
        self.action_history.push(action);
        self.is_first_turn = false;
        self.refresh(blocks);
    }

    /// 按最新文档重算 messages_since_request
    pub fn refresh(&mut self, blocks: &[Block]) {
        let start = self.generation_start_index.min(blocks.len());
        let end = self.generation_cursor_index.clamp(start, blocks.len());
        self.messages_since_request = blocks_to_messages(
            &blocks[start..end],
            HistoryWindow::unbounded(self.max_output_length),
        );
    }

    /// 本轮已生成内容中最近一条消息
    pub fn last_message(&self) -> Option<&Message> {
        self.messages_since_request.last()
    }
}
