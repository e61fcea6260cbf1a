//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按顺序回放预先写好的决策与流：complete 依次弹出决策 JSON，
//! complete_stream 依次弹出一组增量分片。脚本耗尽后决策默认为 stop，流默认为空。
//! 所有请求都会被记录，便于断言上下文内容。

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{LlmClient, LlmError, LlmRequest, TextStream};

/// 预置的一次流式响应
#[derive(Debug, Clone)]
pub enum ScriptedStream {
    /// 依次产出的增量分片
    Chunks(Vec<String>),
    /// 先产出若干分片，再以传输错误结束
    ChunksThenError(Vec<String>, LlmError),
    /// 建立流本身失败
    Fail(LlmError),
}

/// Mock 客户端：回放脚本并记录请求
#[derive(Debug, Default)]
pub struct MockLlmClient {
    decisions: Mutex<VecDeque<Result<String, LlmError>>>,
    streams: Mutex<VecDeque<ScriptedStream>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条选择器决策（工具参数 JSON）
    pub fn push_decision(&self, raw: impl Into<String>) -> &Self {
        lock(&self.decisions).push_back(Ok(raw.into()));
        self
    }

    /// 追加一次选择器调用失败
    pub fn push_decision_error(&self, err: LlmError) -> &Self {
        lock(&self.decisions).push_back(Err(err));
        self
    }

    /// 追加一次流式响应，分片按给定顺序到达
    pub fn push_stream<I, S>(&self, chunks: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let chunks = chunks.into_iter().map(Into::into).collect();
        lock(&self.streams).push_back(ScriptedStream::Chunks(chunks));
        self
    }

    pub fn push_scripted(&self, scripted: ScriptedStream) -> &Self {
        lock(&self.streams).push_back(scripted);
        self
    }

    /// 到目前为止收到的全部请求（按调用顺序）
    pub fn requests(&self) -> Vec<LlmRequest> {
        lock(&self.requests).clone()
    }

    /// 剩余未消费的决策数
    pub fn pending_decisions(&self) -> usize {
        lock(&self.decisions).len()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError> {
        lock(&self.requests).push(request.clone());
        lock(&self.decisions)
            .pop_front()
            .unwrap_or_else(|| Ok(r#"{"action":{"type":"stop"}}"#.to_string()))
    }

    async fn complete_stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError> {
        lock(&self.requests).push(request.clone());
        let scripted = lock(&self.streams)
            .pop_front()
            .unwrap_or(ScriptedStream::Chunks(Vec::new()));
        match scripted {
            ScriptedStream::Chunks(chunks) => {
                let items = chunks.into_iter().map(Ok::<String, LlmError>);
                Ok(Box::pin(stream::iter(items)))
            }
            ScriptedStream::ChunksThenError(chunks, err) => {
                let items: Vec<Result<String, LlmError>> =
                    chunks.into_iter().map(Ok).chain(std::iter::once(Err(err))).collect();
                Ok(Box::pin(stream::iter(items)))
            }
            ScriptedStream::Fail(err) => Err(err),
        }
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        let calls = lock(&self.requests).len() as u64;
        (calls, 0, calls)
    }
}
