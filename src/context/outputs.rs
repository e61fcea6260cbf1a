//! 执行输出摘要
//!
//! 将块的内核输出整理成给模型看的短文本：合并 stdout、识别图像/脚本、清洗 traceback 并提取出错行，
//! 每条输出按总上限平均分配长度，长输出保留首尾并插入省略标记。

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::document::{Block, BlockOutput};

/// 截断时插入的省略标记
pub const ELISION_MARKER: &str = "[[...]]";
/// 图像/图表类输出对模型的描述
pub const GRAPH_PLACEHOLDER: &str = "Graph / Image Displayed to User";

static ANSI_RE: OnceLock<Option<Regex>> = OnceLock::new();
static ARROW_RE: OnceLock<Option<Regex>> = OnceLock::new();
static LINE_NO_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn cached<'a>(cell: &'a OnceLock<Option<Regex>>, pattern: &str) -> Option<&'a Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

/// 单条输出的摘要值
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutputValue {
    Text(String),
    Error {
        error: String,
        line_that_errored: String,
    },
}

impl OutputValue {
    fn is_empty(&self) -> bool {
        matches!(self, OutputValue::Text(t) if t.is_empty())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FormattedOutput {
    pub value: OutputValue,
    pub error_occurred: bool,
}

/// 去掉 ANSI 颜色转义
pub fn strip_ansi(text: &str) -> String {
    match cached(&ANSI_RE, r"\x1b\[[0-9;]*m") {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_string(),
    }
}

/// 从 traceback 中提取出错的代码行：优先取最长 `--->` 箭头所指的最后一行，否则按 `line N` 定位
pub fn extract_error_line(traceback: &str) -> Option<String> {
    let arrow_re = cached(&ARROW_RE, r"-+>")?;
    let longest = arrow_re
        .find_iter(traceback)
        .map(|m| m.as_str())
        .fold("", |acc, m| if m.len() > acc.len() { m } else { acc });

    if !longest.is_empty() {
        let line_re = Regex::new(&format!(r"{}\s*(.+)", regex::escape(longest))).ok()?;
        return line_re
            .captures_iter(traceback)
            .last()
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
    }

    let line_no_re = cached(&LINE_NO_RE, r"line\s+(\d+)")?;
    let line_no = line_no_re.captures(traceback)?.get(1)?.as_str().trim().to_string();
    let pattern = format!(r"(?m)(?:^|\D)({}\s+[^\d].*)", regex::escape(&line_no));
    let code_re = Regex::new(&pattern).ok()?;
    code_re
        .captures(traceback)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// 超长字符串保留首尾各一半，中间插入省略标记（按字符计数）
pub fn limit_string_length(text: &str, max_len: usize) -> String {
    let len = text.chars().count();
    if len <= max_len {
        return text.to_string();
    }
    let half = max_len.saturating_sub(ELISION_MARKER.chars().count()) / 2;
    let head: String = text.chars().take(half).collect();
    let tail: String = text.chars().skip(len - half).collect();
    format!("{head}{ELISION_MARKER}{tail}")
}

fn value_as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|i| i.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        _ => None,
    }
}

fn carries_script(v: &Value) -> bool {
    let hit = |s: &str| s.contains("<script") || s.contains("define('plotly'");
    match v {
        Value::String(s) => hit(s),
        Value::Array(items) => items.iter().filter_map(|i| i.as_str()).any(hit),
        _ => false,
    }
}

/// 富输出（display_data / execute_result）对模型的文本描述
fn describe_display(data: &BTreeMap<String, Value>) -> String {
    for (mime, value) in data {
        if mime.contains("plotly") || mime.contains("image") {
            return GRAPH_PLACEHOLDER.to_string();
        }
        if carries_script(value) {
            return String::new();
        }
    }
    if let Some(text) = data.get("text/plain").and_then(value_as_text) {
        return text;
    }
    if let Some(html) = data.get("text/html").and_then(value_as_text) {
        return html;
    }
    serde_json::to_string(data).unwrap_or_default()
}

/// 合并连续的 stdout 流输出
fn merge_stdout(outputs: &[BlockOutput]) -> Vec<BlockOutput> {
    let mut merged: Vec<BlockOutput> = Vec::with_capacity(outputs.len());
    for out in outputs {
        if let BlockOutput::Stream { name, text } = out {
            if name == "stdout" {
                if let Some(BlockOutput::Stream { name: prev, text: acc }) = merged.last_mut() {
                    if prev == "stdout" {
                        acc.push('\n');
                        acc.push_str(text);
                        continue;
                    }
                }
            }
        }
        merged.push(out.clone());
    }
    merged
}

/// 将块的输出逐条整理为摘要值
pub fn format_outputs(block: &Block) -> Vec<FormattedOutput> {
    merge_stdout(&block.outputs)
        .iter()
        .map(|out| match out {
            BlockOutput::DisplayData { data } | BlockOutput::ExecuteResult { data, .. } => {
                FormattedOutput {
                    value: OutputValue::Text(describe_display(data)),
                    error_occurred: false,
                }
            }
            BlockOutput::Stream { text, .. } => FormattedOutput {
                value: OutputValue::Text(text.clone()),
                error_occurred: false,
            },
            BlockOutput::Error {
                ename,
                evalue,
                traceback,
            } => {
                let joined = traceback
                    .iter()
                    .map(|t| strip_ansi(t))
                    .collect::<Vec<_>>()
                    .join("\n");
                FormattedOutput {
                    value: OutputValue::Error {
                        error: format!("{ename}: {evalue}"),
                        line_that_errored: extract_error_line(&joined)
                            .unwrap_or_else(|| "<error fetching line>".to_string()),
                    },
                    error_occurred: true,
                }
            }
        })
        .collect()
}

/// 把摘要值拼成一段文本：相邻文本合并，每条按 max_len / 条数 截断
pub fn summarize_outputs(outputs: &[FormattedOutput], max_len: usize) -> String {
    let mut merged: Vec<OutputValue> = Vec::new();
    for value in outputs.iter().map(|o| &o.value).filter(|v| !v.is_empty()) {
        match (merged.last_mut(), value) {
            (Some(OutputValue::Text(acc)), OutputValue::Text(t)) => {
                acc.push('\n');
                acc.push_str(t);
            }
            _ => merged.push(value.clone()),
        }
    }
    if merged.is_empty() {
        return String::new();
    }

    let share = max_len / merged.len();
    merged
        .into_iter()
        .map(|v| match v {
            OutputValue::Text(t) => limit_string_length(&t, share),
            OutputValue::Error {
                error,
                line_that_errored,
            } => {
                let limited = OutputValue::Error {
                    error: limit_string_length(&error, share),
                    line_that_errored,
                };
                serde_json::to_string(&limited).unwrap_or_default()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
