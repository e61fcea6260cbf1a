//! 生成类动作共用：工具 schema、生成参数、流式调用

use std::sync::Arc;

use futures_util::stream;
use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::llm::{LlmClient, LlmRequest, ToolSpec};
use crate::stream::{batches_from_deltas, BatchStream, Payload};

/// 生成参数：上下文字符预算与采样温度
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenerationSettings {
    pub char_budget: usize,
    pub temperature: f32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            char_budget: 20_000,
            temperature: 0.5,
        }
    }
}

#[allow(dead_code)]
#[derive(JsonSchema)]
#[serde(rename_all = "lowercase")]
enum CellType {
    Code,
    Markdown,
}

#[allow(dead_code)]
#[derive(JsonSchema)]
struct GeneratedCell {
    /// code 或 markdown
    cell_type: CellType,
    /// 块内容
    source: String,
}

/// 生成工具的参数格式（仅用于 schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct GeneratedCells {
    /// 按顺序追加到文档的块
    cells: Vec<GeneratedCell>,
}

/// 编辑工具的参数格式（仅用于 schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct EditedSource {
    /// 目标块的完整新内容
    source: String,
}

fn inline_schema<T: JsonSchema>() -> Value {
    let schema = SchemaSettings::draft07()
        .with(|s| s.inline_subschemas = true)
        .into_generator()
        .into_root_schema_for::<T>();
    let mut value =
        serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({"type": "object"}));
    if let Value::Object(map) = &mut value {
        map.remove("$schema");
        map.remove("title");
    }
    value
}

/// `{cells: [{cell_type, source}]}` 工具
pub fn cells_tool(name: &str, description: &str) -> ToolSpec {
    ToolSpec::new(name, description, inline_schema::<GeneratedCells>())
}

/// `{source}` 工具
pub fn source_tool(name: &str, description: &str) -> ToolSpec {
    ToolSpec::new(name, description, inline_schema::<EditedSource>())
}

/// 发起流式调用并接入摄取器；建立连接期间取消则返回空流
pub async fn stream_batches(
    llm: &Arc<dyn LlmClient>,
    request: &LlmRequest,
    cancel: &CancellationToken,
    payload: Payload,
) -> Result<BatchStream, AgentError> {
    let deltas = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return Ok(Box::pin(stream::empty()));
        }
        deltas = llm.complete_stream(request) => deltas?,
    };
    Ok(batches_from_deltas(deltas, cancel.clone(), payload))
}
