//! 块历史 -> 消息列表
//!
//! 从后往前扫描：用户叙述块变为 user 消息，其它块变为 assistant `{cell_type, source}`，
//! 执行过的块追加一条输出摘要。连续相同源码只保留一次；
//! 若同一轮中更靠后的块已成功执行，之前失败的块不再进入上下文。

use serde::Serialize;

use crate::context::outputs::{format_outputs, summarize_outputs};
use crate::context::Message;
use crate::document::{AuthorRole, Block, BlockKind};

/// 历史窗口：最多回看多少个块（或多少轮用户请求）
#[derive(Clone, Copy, Debug)]
pub struct HistoryWindow {
    pub lookback: usize,
    /// true 时按用户请求计数，而不是按块计数
    pub count_exchanges: bool,
    /// 所有输出摘要合计的最大字符数
    pub max_output_length: usize,
}

impl HistoryWindow {
    pub fn new(lookback: usize, max_output_length: usize) -> Self {
        Self {
            lookback,
            count_exchanges: false,
            max_output_length,
        }
    }

    /// 不限制条数（用于本轮已生成的块）
    pub fn unbounded(max_output_length: usize) -> Self {
        Self::new(usize::MAX, max_output_length)
    }

    pub fn exchanges(mut self) -> Self {
        self.count_exchanges = true;
        self
    }
}

#[derive(Serialize)]
struct BlockPayload<'a> {
    cell_type: &'a str,
    source: &'a str,
}

#[derive(Serialize)]
struct ExecutionPayload<'a> {
    code_executed: bool,
    error_occurred: bool,
    outputs: &'a str,
}

/// 将块序列转换为消息（按文档顺序返回）
pub fn blocks_to_messages(blocks: &[Block], window: HistoryWindow) -> Vec<Message> {
    let mut remaining = window.lookback;
    let mut prev_source: Option<&str> = None;
    let mut later_succeeded = false;
    let mut reversed: Vec<Message> = Vec::new();

    for block in blocks.iter().rev() {
        if remaining == 0 {
            break;
        }
        let source = block.source.as_str();
        if prev_source == Some(source) {
            continue;
        }

        if block.kind == BlockKind::Narrative && block.author == AuthorRole::User {
            later_succeeded = false;
            reversed.push(Message::user(source.trim()));
            if window.count_exchanges {
                remaining -= 1;
            }
        } else if !source.is_empty() {
            let outputs = format_outputs(block);
            let executed = block.execution_count.is_some() || !outputs.is_empty();
            let error_occurred = outputs.iter().any(|o| o.error_occurred);

            if executed && !error_occurred {
                later_succeeded = true;
            }
            if error_occurred && later_succeeded {
                continue;
            }

            if executed || error_occurred {
                let summary = summarize_outputs(&outputs, window.max_output_length);
                let payload = ExecutionPayload {
                    code_executed: true,
                    error_occurred,
                    outputs: &summary,
                };
                if let Ok(content) = serde_json::to_string(&payload) {
                    reversed.push(Message::assistant(content));
                }
            }

            let payload = BlockPayload {
                cell_type: block.kind.as_str(),
                source,
            };
            if let Ok(content) = serde_json::to_string(&payload) {
                reversed.push(Message::assistant(content));
            }

            if block.kind != BlockKind::Code {
                later_succeeded = false;
            }
        }

        if !window.count_exchanges {
            remaining -= 1;
        }
        prev_source = Some(source);
    }

    reversed.reverse();
    reversed.retain(|m| !m.content.trim().is_empty());
    reversed
}

/// 最近一条 assistant 消息是否标记了执行错误
pub fn marks_error(message: &Message) -> bool {
    message.is_assistant() && message.content.contains(r#""error_occurred":true"#)
}
