//! 流式响应摄取：增量文本 -> 累计快照 -> 容错解码 -> GeneratedBatch
//!
//! 每个快照独立解码；只有抽取结果非空且与上一次产出不同才产出新批次。
//! 连续 MAX_CONSECUTIVE_PARSE_FAILURES 个快照无法解码时以 StreamParse 结束；
//! 取消令牌触发时停止读取，流正常结束。

use std::pin::Pin;

use futures_util::{stream, Stream, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::document::BlockKind;
use crate::llm::{LlmError, TextStream};
use crate::stream::partial_json::{parse_partial, PartialJsonError};

/// 允许的连续解码失败次数
pub const MAX_CONSECUTIVE_PARSE_FAILURES: usize = 3;

/// 模型生成的一个内容块
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedItem {
    pub source: String,
    pub kind: BlockKind,
}

impl GeneratedItem {
    pub fn new(kind: BlockKind, source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            kind,
        }
    }
}

/// 一次动作执行到目前为止生成的全部内容（有序）
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GeneratedBatch {
    pub items: Vec<GeneratedItem>,
}

impl GeneratedBatch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

pub type SnapshotStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;
pub type BatchStream = Pin<Box<dyn Stream<Item = Result<GeneratedBatch, AgentError>> + Send>>;

/// 快照内容的解读方式
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// 工具参数 JSON，顶层对象的 `field` 数组中每项是一个块
    Cells { field: String, default_kind: BlockKind },
    /// 工具参数 JSON，顶层对象的 `field` 字符串就是唯一一个块
    Field { field: String, kind: BlockKind },
    /// 纯文本响应，整体作为一个块（去掉外层代码围栏）
    Text { kind: BlockKind },
}

impl Payload {
    pub fn cells(default_kind: BlockKind) -> Self {
        Payload::Cells {
            field: "cells".to_string(),
            default_kind,
        }
    }

    pub fn field(field: &str, kind: BlockKind) -> Self {
        Payload::Field {
            field: field.to_string(),
            kind,
        }
    }
}

/// 单个快照的解码结果
#[derive(Debug, PartialEq)]
enum Decoded {
    Items(Vec<GeneratedItem>),
    /// 还没有可判断的内容（例如只有空白或一个未结束的围栏）
    Pending,
    Invalid(String),
}

impl Payload {
    fn decode(&self, snapshot: &str) -> Decoded {
        match self {
            Payload::Cells { field, default_kind } => match parse_partial(snapshot) {
                Ok(value) => match extract_cells(&value, field, *default_kind) {
                    Ok(items) => Decoded::Items(items),
                    Err(reason) => Decoded::Invalid(reason),
                },
                Err(PartialJsonError::Empty) => Decoded::Pending,
                Err(e) => Decoded::Invalid(e.to_string()),
            },
            Payload::Field { field, kind } => match parse_partial(snapshot) {
                Ok(Value::Object(map)) => {
                    let source = map.get(field).and_then(normalize_source).unwrap_or_default();
                    if source.is_empty() {
                        Decoded::Items(Vec::new())
                    } else {
                        Decoded::Items(vec![GeneratedItem::new(*kind, source)])
                    }
                }
                Ok(other) => {
                    Decoded::Invalid(format!("expected object, got {}", type_name(&other)))
                }
                Err(PartialJsonError::Empty) => Decoded::Pending,
                Err(e) => Decoded::Invalid(e.to_string()),
            },
            Payload::Text { kind } => match strip_fences(snapshot) {
                None => Decoded::Pending,
                Some(text) if text.trim().is_empty() => Decoded::Items(Vec::new()),
                Some(text) => Decoded::Items(vec![GeneratedItem::new(*kind, text)]),
            },
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 块内容的几种写法：字符串、字符串数组（按行）、嵌套的 {source}
fn normalize_source(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(lines) => Some(lines.iter().filter_map(Value::as_str).collect()),
        Value::Object(map) => map.get("source").and_then(normalize_source),
        _ => None,
    }
}

/// 项的块类型：纯字符串用默认类型；对象必须带有可识别的 cell_type，
/// 否则视为尚未到达（`{"source": ..}` 可能先于 cell_type 流出，`"mark` 也可能只到一半）
fn item_kind(item: &Value, default_kind: BlockKind) -> Option<BlockKind> {
    match item {
        Value::String(_) => Some(default_kind),
        _ => item.get("cell_type").and_then(Value::as_str).and_then(BlockKind::parse),
    }
}

/// 从解码后的快照中抽取 `field` 数组里的块；空内容或类型未定的项被跳过
pub fn extract_cells(
    value: &Value,
    field: &str,
    default_kind: BlockKind,
) -> Result<Vec<GeneratedItem>, String> {
    let Value::Object(map) = value else {
        return Err(format!("expected object, got {}", type_name(value)));
    };
    let items = match map.get(field) {
        None => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(format!("field `{field}` is {}, not an array", type_name(other)))
        }
    };

    Ok(items
        .iter()
        .filter_map(|item| {
            let kind = item_kind(item, default_kind)?;
            let source = normalize_source(item)?;
            (!source.is_empty()).then(|| GeneratedItem::new(kind, source))
        })
        .collect())
}

/// 去掉外层 ``` 围栏；围栏行尚未写完时返回 None
///
/// 开头有围栏时，行首只到了一两个反引号的结束围栏也一并去掉，
/// 避免后一个快照把前一个快照里的反引号收回。
pub fn strip_fences(text: &str) -> Option<String> {
    let trimmed = text.trim_start();
    if !trimmed.is_empty() && "```".starts_with(trimmed) {
        return None;
    }
    let (body, fenced) = match trimmed.strip_prefix("```") {
        Some(rest) => (rest.split_once('\n')?.1, true),
        None => (trimmed, false),
    };
    let body = strip_closing_fence(body.trim_end(), fenced);
    Some(body.trim_end().to_string())
}

fn strip_closing_fence(body: &str, fenced: bool) -> &str {
    if let Some(rest) = body.strip_suffix("```") {
        return rest;
    }
    if fenced {
        for partial in ["``", "`"] {
            match body.strip_suffix(partial) {
                Some(rest) if rest.is_empty() || rest.ends_with('\n') => return rest,
                _ => {}
            }
        }
    }
    body
}

/// 增量 -> 累计快照
pub fn snapshots(deltas: TextStream) -> SnapshotStream {
    Box::pin(deltas.scan(String::new(), |acc, delta| {
        let item = delta.map(|d| {
            acc.push_str(&d);
            acc.clone()
        });
        futures_util::future::ready(Some(item))
    }))
}

struct IngestState {
    snapshots: SnapshotStream,
    cancel: CancellationToken,
    payload: Payload,
    last: Option<Vec<GeneratedItem>>,
    failures: usize,
    finished: bool,
}

/// 将快照流转换为批次流
pub fn ingest_batches(
    snapshots: SnapshotStream,
    cancel: CancellationToken,
    payload: Payload,
) -> BatchStream {
    let state = IngestState {
        snapshots,
        cancel,
        payload,
        last: None,
        failures: 0,
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        if st.finished {
            return None;
        }
        loop {
            let next = tokio::select! {
                biased;
                _ = st.cancel.cancelled() => {
                    tracing::debug!("stream ingestion cancelled");
                    return None;
                }
                next = st.snapshots.next() => next,
            };

            let snapshot = match next {
                None => return None,
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(AgentError::Transport(e)), st));
                }
                Some(Ok(s)) => s,
            };
            if snapshot.trim().is_empty() {
                continue;
            }

            match st.payload.decode(&snapshot) {
                Decoded::Pending => {}
                Decoded::Invalid(reason) => {
                    st.failures += 1;
                    tracing::debug!(failures = st.failures, %reason, "undecodable snapshot");
                    if st.failures >= MAX_CONSECUTIVE_PARSE_FAILURES {
                        st.finished = true;
                        let err = AgentError::StreamParse(format!(
                            "{} consecutive undecodable snapshots, last: {reason}",
                            st.failures
                        ));
                        return Some((Err(err), st));
                    }
                }
                Decoded::Items(items) => {
                    st.failures = 0;
                    if items.is_empty() || st.last.as_ref() == Some(&items) {
                        continue;
                    }
                    st.last = Some(items.clone());
                    return Some((Ok(GeneratedBatch { items }), st));
                }
            }
        }
    }))
}

/// 便捷入口：增量文本流直接转批次流
pub fn batches_from_deltas(
    deltas: TextStream,
    cancel: CancellationToken,
    payload: Payload,
) -> BatchStream {
    ingest_batches(snapshots(deltas), cancel, payload)
}
