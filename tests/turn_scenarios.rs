//! 轮次场景测试：用脚本化的 Mock LLM、内存文档与模拟内核驱动完整的生成循环

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use tokio_util::sync::CancellationToken;

use cellpilot::actions::{ActionRegistry, CodeAction, GenerationSettings, FIX_INSTRUCTION};
use cellpilot::config::AgentSection;
use cellpilot::core::{ActionKind, ActionState};
use cellpilot::context::HistoryWindow;
use cellpilot::document::{
    AuthorRole, Block, BlockExecutor, BlockId, BlockKind, BlockOutput, DocumentStore,
    InMemoryDocument,
};
use cellpilot::llm::{LlmClient, LlmError, LlmRequest, MockLlmClient, ScriptedStream, TextStream};
use cellpilot::turn::{
    run_generation_loop, ActionSelector, CellSynchronizer, TurnEvent, TurnSession, DECISION_TOOL,
};
use cellpilot::{Agent, AgentError, TurnMode, TurnOutcome};

const GENERATE: &str = r#"{"action":{"type":"generate"}}"#;
const FIX: &str = r#"{"action":{"type":"fixError"}}"#;
const STOP: &str = r#"{"action":{"type":"stop"}}"#;

/// 模拟内核：记录执行顺序；源码含 `1/0` 时写入错误输出
struct KernelDouble {
    doc: InMemoryDocument,
    executed: Mutex<Vec<BlockId>>,
    counter: AtomicU32,
}

impl KernelDouble {
    fn new(doc: &InMemoryDocument) -> Arc<Self> {
        Arc::new(Self {
            doc: doc.clone(),
            executed: Mutex::new(Vec::new()),
            counter: AtomicU32::new(0),
        })
    }

    fn executed(&self) -> Vec<BlockId> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlockExecutor for KernelDouble {
    async fn execute(&self, id: BlockId) {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let Some((_, block)) = self.doc.find(id).await else {
            return;
        };
        let outputs = if block.source.contains("1/0") {
            vec![BlockOutput::error(
                "ZeroDivisionError",
                "division by zero",
                vec!["----> 1 1/0".to_string()],
            )]
        } else {
            vec![BlockOutput::stdout("ok\n")]
        };
        self.doc.set_outputs(id, outputs, Some(n)).await;
        self.executed.lock().unwrap().push(id);
    }
}

fn cells_json(sources: &[&str]) -> String {
    let cells: Vec<_> = sources
        .iter()
        .map(|s| serde_json::json!({"cell_type": "code", "source": s}))
        .collect();
    serde_json::json!({ "cells": cells }).to_string()
}

/// 把完整 JSON 切成若干段，模拟逐段到达
fn chunked(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

fn agent_with(
    mock: &Arc<MockLlmClient>,
    doc: &InMemoryDocument,
    kernel: Option<Arc<KernelDouble>>,
    settings: AgentSection,
) -> Agent {
    let executor: Option<Arc<dyn BlockExecutor>> = kernel.map(|k| k as Arc<dyn BlockExecutor>);
    Agent::new(mock.clone(), Arc::new(doc.clone()), executor, settings)
}

fn sources(blocks: &[Block]) -> Vec<&str> {
    blocks.iter().map(|b| b.source.as_str()).collect()
}

#[tokio::test]
async fn test_generate_generate_stop_unions_items_in_one_group() {
    let doc = InMemoryDocument::from_blocks(vec![Block::code("import pandas as pd")]);
    let kernel = KernelDouble::new(&doc);
    let mock = Arc::new(MockLlmClient::new());
    mock.push_decision(GENERATE).push_decision(GENERATE).push_decision(STOP);
    mock.push_stream(chunked(&cells_json(&["a = 1", "b = 2"]), 7));
    mock.push_stream(chunked(&cells_json(&["c = a + b"]), 5));

    let agent = agent_with(&mock, &doc, Some(kernel.clone()), AgentSection::default());
    let report = agent.start_turn("add numbers", TurnMode::Generate, None).await.unwrap();

    assert_eq!(report.outcome, TurnOutcome::Stopped);
    assert_eq!(report.iterations, 3);
    assert_eq!(report.actions, vec![ActionKind::Generate, ActionKind::Generate, ActionKind::Stop]);

    let blocks = doc.snapshot().await;
    assert_eq!(sources(&blocks), vec!["import pandas as pd", "a = 1", "b = 2", "c = a + b"]);
    let generated = &blocks[1..];
    let group = generated[0].group;
    assert!(group.is_some());
    assert!(generated.iter().all(|b| b.group == group && b.author == AuthorRole::Assistant));
    assert_eq!(report.state.generation_cursor_index, 4);

    let ids: Vec<_> = generated.iter().map(|b| b.id).collect();
    assert_eq!(kernel.executed(), ids);
}

#[tokio::test]
async fn test_second_selection_sees_exactly_first_action_blocks() {
    let doc = InMemoryDocument::from_blocks(vec![
        Block::narrative("earlier question"),
        Block::code("seed = 0"),
    ]);
    let mock = Arc::new(MockLlmClient::new());
    mock.push_decision(GENERATE).push_decision(STOP);
    mock.push_stream([cells_json(&["first = 1", "second = 2"])]);

    let agent = agent_with(&mock, &doc, None, AgentSection::default());
    agent.start_turn("make two cells", TurnMode::Generate, None).await.unwrap();

    let requests = mock.requests();
    assert_eq!(requests.len(), 3);
    let dump = |req: &LlmRequest| serde_json::to_string(&req.messages).unwrap();

    let first_selection = dump(&requests[0]);
    assert!(first_selection.contains("earlier question"));
    assert!(first_selection.contains("seed = 0"));
    assert!(first_selection.contains("make two cells"));
    assert!(!first_selection.contains("first = 1"));

    // 请求之后只能出现本轮动作写入的块
    let messages = &requests[2].messages;
    let request_at = messages
        .iter()
        .position(|m| m.content.contains("make two cells"))
        .unwrap();
    let after: Vec<&str> = messages[request_at + 1..].iter().map(|m| m.content.as_str()).collect();
    assert!(after.iter().all(|c| !c.contains("seed = 0")));
    assert!(after.iter().any(|c| c.contains("first = 1")));
    assert!(after.iter().any(|c| c.contains("second = 2")));
    assert_eq!(requests[2].forced_tool.as_deref(), Some(DECISION_TOOL));
}

struct CancellingClient {
    token: CancellationToken,
}

const CANCEL_MARK: &str = "<cancel>";

#[async_trait]
impl LlmClient for CancellingClient {
    async fn complete(&self, _request: &LlmRequest) -> Result<String, LlmError> {
        Ok(GENERATE.to_string())
    }

    async fn complete_stream(&self, _request: &LlmRequest) -> Result<TextStream, LlmError> {
        let token = self.token.clone();
        let chunks = vec![
            r#"{"cells":["a = 1","#,
            r#""b = 2","#,
            CANCEL_MARK,
            r#""c = 3","d = 4","e = 5"]}"#,
        ];
        Ok(Box::pin(stream::iter(chunks).map(move |c| -> Result<String, LlmError> {
            if c == CANCEL_MARK {
                token.cancel();
                Ok(String::new())
            } else {
                Ok(c.to_string())
            }
        })))
    }
}

#[tokio::test]
async fn test_cancel_mid_stream_keeps_written_blocks() {
    let cancel = CancellationToken::new();
    let client: Arc<dyn LlmClient> = Arc::new(CancellingClient { token: cancel.clone() });
    let doc = InMemoryDocument::new();
    let store: Arc<dyn DocumentStore> = Arc::new(doc.clone());

    let selector = ActionSelector::new(client.clone(), false);
    let mut registry = ActionRegistry::new();
    registry.register(CodeAction::new(client, GenerationSettings::default()));
    let synchronizer = CellSynchronizer::new(store.clone(), None, false);
    let session = TurnSession::new(&selector, &registry, &synchronizer, &store, cancel.clone());

    let state = ActionState::begin(&[], "five cells please", 0, "", HistoryWindow::new(10, 2000));
    let report = run_generation_loop(&session, state).await.unwrap();

    assert_eq!(report.outcome, TurnOutcome::Aborted);
    assert_eq!(sources(&doc.snapshot().await), vec!["a = 1", "b = 2"]);
}

#[tokio::test]
async fn test_fix_error_after_failed_execution() {
    let doc = InMemoryDocument::new();
    let kernel = KernelDouble::new(&doc);
    let mock = Arc::new(MockLlmClient::new());
    mock.push_decision(GENERATE).push_decision(FIX).push_decision(STOP);
    mock.push_stream([cells_json(&["x = 1/0"])]);
    mock.push_stream([cells_json(&["x = 1/1"])]);

    let agent = agent_with(&mock, &doc, Some(kernel), AgentSection::default());
    let report = agent.start_turn("divide", TurnMode::Generate, None).await.unwrap();

    assert_eq!(report.actions, vec![ActionKind::Generate, ActionKind::FixError, ActionKind::Stop]);
    let blocks = doc.snapshot().await;
    assert_eq!(sources(&blocks), vec!["x = 1/0", "x = 1/1"]);
    assert!(blocks[0].has_error());
    assert_eq!(blocks[1].action.as_deref(), Some("fixError"));

    let requests = mock.requests();
    let fix_request = &requests[3];
    assert_eq!(fix_request.messages.last().unwrap().content, FIX_INSTRUCTION);
}

#[tokio::test]
async fn test_first_turn_stop_is_masked_and_recovered_as_generate() {
    let doc = InMemoryDocument::new();
    let mock = Arc::new(MockLlmClient::new());
    mock.push_decision(STOP).push_decision(STOP);
    mock.push_stream([cells_json(&["print('hi')"])]);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let agent = agent_with(&mock, &doc, None, AgentSection::default()).with_events(tx);
    let report = agent.start_turn("say hi", TurnMode::Generate, None).await.unwrap();
    drop(agent);

    assert_eq!(report.actions, vec![ActionKind::Generate, ActionKind::Stop]);
    let variants = &mock.requests()[0].tools[0].parameters["properties"]["action"]["oneOf"];
    assert_eq!(variants.as_array().unwrap().len(), 1);

    let mut selections = Vec::new();
    while let Some(ev) = rx.recv().await {
        if let TurnEvent::ActionSelected { action, contract_violation } = ev {
            selections.push((action, contract_violation));
        }
    }
    assert_eq!(
        selections,
        vec![("generate".to_string(), true), ("stop".to_string(), false)]
    );
}

#[tokio::test]
async fn test_selector_transport_error_ends_turn() {
    let doc = InMemoryDocument::new();
    let mock = Arc::new(MockLlmClient::new());
    mock.push_decision_error(LlmError::Request("503".into()));

    let agent = agent_with(&mock, &doc, None, AgentSection::default());
    let err = agent.start_turn("anything", TurnMode::Generate, None).await.unwrap_err();
    assert!(matches!(err, AgentError::Transport(LlmError::Request(_))));
    assert!(doc.snapshot().await.is_empty());
}

#[tokio::test]
async fn test_stream_interruption_keeps_partial_output() {
    let doc = InMemoryDocument::new();
    let mock = Arc::new(MockLlmClient::new());
    mock.push_decision(GENERATE);
    mock.push_scripted(ScriptedStream::ChunksThenError(
        vec![r#"{"cells":["a = 1", "b ="#.to_string()],
        LlmError::Stream("connection reset".into()),
    ));

    let agent = agent_with(&mock, &doc, None, AgentSection::default());
    let err = agent.start_turn("two cells", TurnMode::Generate, None).await.unwrap_err();
    assert!(matches!(err, AgentError::Transport(LlmError::Stream(_))));
    assert_eq!(sources(&doc.snapshot().await), vec!["a = 1", "b ="]);
}

#[tokio::test]
async fn test_undecodable_stream_aborts_with_parse_error() {
    let doc = InMemoryDocument::new();
    let mock = Arc::new(MockLlmClient::new());
    mock.push_decision(GENERATE);
    mock.push_stream(["I cannot", " call tools", " today"]);

    let agent = agent_with(&mock, &doc, None, AgentSection::default());
    let err = agent.start_turn("anything", TurnMode::Generate, None).await.unwrap_err();
    assert!(matches!(err, AgentError::StreamParse(_)));
}

#[tokio::test]
async fn test_iteration_ceiling_is_not_an_error() {
    let doc = InMemoryDocument::new();
    let mock = Arc::new(MockLlmClient::new());
    mock.push_decision(GENERATE).push_decision(GENERATE).push_decision(GENERATE);
    mock.push_stream([cells_json(&["one"])]);
    mock.push_stream([cells_json(&["two"])]);

    let settings = AgentSection {
        max_iterations: 2,
        ..AgentSection::default()
    };
    let agent = agent_with(&mock, &doc, None, settings);
    let report = agent.start_turn("keep going", TurnMode::Generate, None).await.unwrap();

    assert_eq!(report.outcome, TurnOutcome::CeilingReached);
    assert_eq!(report.iterations, 2);
    assert_eq!(sources(&doc.snapshot().await), vec!["one", "two"]);
    assert_eq!(mock.pending_decisions(), 1);
}

#[tokio::test]
async fn test_generation_inserts_before_later_user_blocks() {
    let doc = InMemoryDocument::from_blocks(vec![Block::code("setup()"), Block::code("later()")]);
    let mock = Arc::new(MockLlmClient::new());
    mock.push_decision(GENERATE).push_decision(STOP);
    mock.push_stream([cells_json(&["middle_a()", "middle_b()"])]);

    let agent = agent_with(&mock, &doc, None, AgentSection::default());
    agent.start_turn("insert here", TurnMode::Generate, Some(1)).await.unwrap();

    assert_eq!(
        sources(&doc.snapshot().await),
        vec!["setup()", "middle_a()", "middle_b()", "later()"]
    );
}

#[tokio::test]
async fn test_edit_and_follow_up_rewrite_target_block() {
    let doc = InMemoryDocument::from_blocks(vec![Block::code("x = 1")]);
    let target = doc.snapshot().await[0].id;
    let mock = Arc::new(MockLlmClient::new());
    mock.push_stream([r#"{"source": "x = 2"#, r#""}"#]);
    mock.push_stream([r#"{"source": "x = 2\nprint(x)"}"#]);

    let agent = agent_with(&mock, &doc, None, AgentSection::default());
    let report = agent
        .start_turn("make it 2", TurnMode::Edit { block: target }, None)
        .await
        .unwrap();
    assert_eq!(report.outcome, TurnOutcome::Completed);
    assert_eq!(doc.snapshot().await[0].source, "x = 2");

    agent
        .start_turn("and print it", TurnMode::FollowUp { block: target }, None)
        .await
        .unwrap();
    let blocks = doc.snapshot().await;
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].source, "x = 2\nprint(x)");

    let requests = mock.requests();
    assert_eq!(requests[0].forced_tool.as_deref(), Some("editCode"));
    let follow_up: serde_json::Value =
        serde_json::from_str(&requests[1].messages.last().unwrap().content).unwrap();
    assert_eq!(follow_up["userRequest"], "make it 2; and print it");
    assert_eq!(follow_up["currentCellSource"], "x = 2");
}

#[tokio::test]
async fn test_chat_writes_one_narrative_block() {
    let doc = InMemoryDocument::from_blocks(vec![Block::code("df = load()")]);
    let mock = Arc::new(MockLlmClient::new());
    mock.push_stream(["```markdown\n", "The frame has ", "three columns.\n```"]);

    let agent = agent_with(&mock, &doc, None, AgentSection::default());
    let report = agent.start_turn("what is df?", TurnMode::Chat, None).await.unwrap();
    assert_eq!(report.outcome, TurnOutcome::Completed);

    let blocks = doc.snapshot().await;
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[1].kind, BlockKind::Narrative);
    assert_eq!(blocks[1].author, AuthorRole::Assistant);
    assert_eq!(blocks[1].source, "The frame has three columns.");
    assert!(mock.requests()[0].tools.is_empty());
}
