//! 文档内容块：代码或叙述文本，附带执行输出与分组标记

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type BlockId = Uuid;

/// 块类型；对模型收发时沿用 `code` / `markdown` 命名
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockKind {
    #[serde(rename = "code")]
    Code,
    #[serde(rename = "markdown", alias = "narrative")]
    Narrative,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Code => "code",
            BlockKind::Narrative => "markdown",
        }
    }

    /// 宽松解析模型给出的 cell_type
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "code" | "python" => Some(BlockKind::Code),
            "markdown" | "narrative" | "text" => Some(BlockKind::Narrative),
            _ => None,
        }
    }
}

/// 块的作者
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorRole {
    User,
    Assistant,
}

/// 执行输出（与内核输出约定一致）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum BlockOutput {
    Stream {
        name: String,
        text: String,
    },
    DisplayData {
        data: BTreeMap<String, serde_json::Value>,
    },
    ExecuteResult {
        data: BTreeMap<String, serde_json::Value>,
        #[serde(default)]
        execution_count: Option<u32>,
    },
    Error {
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
}

impl BlockOutput {
    pub fn stdout(text: impl Into<String>) -> Self {
        BlockOutput::Stream {
            name: "stdout".to_string(),
            text: text.into(),
        }
    }

    pub fn text_result(text: impl Into<String>) -> Self {
        let mut data = BTreeMap::new();
        data.insert(
            "text/plain".to_string(),
            serde_json::Value::String(text.into()),
        );
        BlockOutput::ExecuteResult {
            data,
            execution_count: None,
        }
    }

    pub fn error(
        ename: impl Into<String>,
        evalue: impl Into<String>,
        traceback: Vec<String>,
    ) -> Self {
        BlockOutput::Error {
            ename: ename.into(),
            evalue: evalue.into(),
            traceback,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, BlockOutput::Error { .. })
    }
}

/// 文档中的一个内容块；id 在编辑过程中保持稳定
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub kind: BlockKind,
    pub source: String,
    #[serde(default)]
    pub outputs: Vec<BlockOutput>,
    /// 内核分配的执行序号；None 表示从未执行
    #[serde(default)]
    pub execution_count: Option<u32>,
    /// 同一轮用户请求产生的块共享同一个分组
    #[serde(default)]
    pub group: Option<Uuid>,
    pub author: AuthorRole,
    /// 产生该块的动作名（仅 assistant 块）
    #[serde(default)]
    pub action: Option<String>,
}

impl Block {
    pub fn new(kind: BlockKind, source: impl Into<String>, author: AuthorRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            source: source.into(),
            outputs: Vec::new(),
            execution_count: None,
            group: None,
            author,
            action: None,
        }
    }

    /// 用户写的代码块
    pub fn code(source: impl Into<String>) -> Self {
        Self::new(BlockKind::Code, source, AuthorRole::User)
    }

    /// 用户写的叙述块（即用户请求）
    pub fn narrative(source: impl Into<String>) -> Self {
        Self::new(BlockKind::Narrative, source, AuthorRole::User)
    }

    /// 由同步器生成的块，打上分组与动作名
    pub fn generated(
        kind: BlockKind,
        source: impl Into<String>,
        group: Uuid,
        action: &str,
    ) -> Self {
        Self {
            group: Some(group),
            action: Some(action.to_string()),
            ..Self::new(kind, source, AuthorRole::Assistant)
        }
    }

    pub fn with_author(mut self, author: AuthorRole) -> Self {
        self.author = author;
        self
    }

    pub fn with_group(mut self, group: Uuid) -> Self {
        self.group = Some(group);
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<BlockOutput>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_execution_count(mut self, count: u32) -> Self {
        self.execution_count = Some(count);
        self
    }

    pub fn has_error(&self) -> bool {
        self.outputs.iter().any(BlockOutput::is_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(serde_json::to_string(&BlockKind::Narrative).unwrap(), "\"markdown\"");
        let k: BlockKind = serde_json::from_str("\"narrative\"").unwrap();
        assert_eq!(k, BlockKind::Narrative);
        assert_eq!(BlockKind::parse("Python"), Some(BlockKind::Code));
        assert_eq!(BlockKind::parse("sql"), None);
    }

    #[test]
    fn test_output_roundtrip_tagged() {
        let out = BlockOutput::error("ValueError", "bad", vec!["tb".into()]);
        let v = serde_json::to_value(&out).unwrap();
        assert_eq!(v["output_type"], "error");
        assert!(out.is_error());
    }

    #[test]
    fn test_generated_block_is_stamped() {
        let g = Uuid::new_v4();
        let b = Block::generated(BlockKind::Code, "x = 1", g, "generate");
        assert_eq!(b.group, Some(g));
        assert_eq!(b.author, AuthorRole::Assistant);
        assert_eq!(b.action.as_deref(), Some("generate"));
    }
}
