//! 生成主循环
//!
//! SelectAction -> ExecuteAction -> Synchronize -> 下一轮 SelectAction；
//! 终止于 Stopped（选择了 stop）、Aborted（用户取消）、CeilingReached（达到迭代上限），
//! 任何传输或解析失败立即以 Err 结束，不重试。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::actions::{ActionContext, ActionRegistry};
use crate::core::{ActionKind, ActionState, AgentError, LoopPhase, TurnOutcome};
use crate::document::DocumentStore;
use crate::turn::events::{send_event, EventSender, TurnEvent};
use crate::turn::selector::ActionSelector;
use crate::turn::sync::CellSynchronizer;

/// 默认迭代上限
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// 一轮的结果
#[derive(Debug)]
pub struct TurnReport {
    pub outcome: TurnOutcome,
    pub iterations: usize,
    pub actions: Vec<ActionKind>,
    pub state: ActionState,
}

/// 一轮生成所需的组件
pub struct TurnSession<'a> {
    pub selector: &'a ActionSelector,
    pub registry: &'a ActionRegistry,
    pub synchronizer: &'a CellSynchronizer,
    pub store: &'a Arc<dyn DocumentStore>,
    pub cancel_token: CancellationToken,
    pub max_iterations: usize,
    /// 可选：事件推送通道
    pub event_tx: Option<EventSender>,
}

impl<'a> TurnSession<'a> {
    pub fn new(
        selector: &'a ActionSelector,
        registry: &'a ActionRegistry,
        synchronizer: &'a CellSynchronizer,
        store: &'a Arc<dyn DocumentStore>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            selector,
            registry,
            synchronizer,
            store,
            cancel_token,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            event_tx: None,
        }
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_event_tx(mut self, tx: EventSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn fail(&self, phase: LoopPhase, err: AgentError) -> AgentError {
        tracing::warn!(?phase, kind = err.kind(), error = %err, "turn failed");
        send_event(
            &self.event_tx,
            TurnEvent::Error {
                kind: err.kind().to_string(),
                text: err.to_string(),
            },
        );
        err
    }
}

/// 执行一轮生成
pub async fn run_generation_loop(
    session: &TurnSession<'_>,
    mut state: ActionState,
) -> Result<TurnReport, AgentError> {
    let cancel = session.cancel_token.clone();
    let (init_prompt, init_completion, init_total) = session.selector.token_usage();
    let mut iterations = 0;

    tracing::info!(
        request = %state.user_request,
        start = state.generation_start_index,
        max_iterations = session.max_iterations,
        "turn started"
    );

    let outcome = loop {
        if cancel.is_cancelled() {
            break TurnOutcome::Aborted;
        }
        if iterations >= session.max_iterations {
            break TurnOutcome::CeilingReached;
        }
        send_event(
            &session.event_tx,
            TurnEvent::StepUpdate {
                iteration: iterations,
                max_iterations: session.max_iterations,
            },
        );

        let selection = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            selection = session.selector.select(&state) => Some(selection),
        };
        let selection = match selection {
            None => break TurnOutcome::Aborted,
            Some(Ok(s)) => s,
            Some(Err(e)) => return Err(session.fail(LoopPhase::SelectAction, e)),
        };
        iterations += 1;
        let action = selection.action;
        tracing::info!(
            action = %action,
            iteration = iterations,
            violation = selection.contract_violation,
            "action selected"
        );
        send_event(
            &session.event_tx,
            TurnEvent::ActionSelected {
                action: action.to_string(),
                contract_violation: selection.contract_violation,
            },
        );

        if action == ActionKind::Stop {
            state.action_history.push(action);
            break TurnOutcome::Stopped;
        }

        let batches = {
            let ctx = ActionContext::new(&state, cancel.clone());
            match session.registry.run(action.as_str(), &ctx).await {
                Ok(b) => b,
                Err(e) => return Err(session.fail(LoopPhase::ExecuteAction, e)),
            }
        };

        let synced = match session
            .synchronizer
            .run(&mut state, action.as_str(), batches, &cancel)
            .await
        {
            Ok(o) => o,
            Err(e) => return Err(session.fail(LoopPhase::Synchronize, e)),
        };

        let blocks = session.store.snapshot().await;
        state.record_action(action, &blocks);
        tracing::debug!(
            generated = synced.generated,
            inserted = synced.inserted,
            updated = synced.updated,
            cursor = state.generation_cursor_index,
            "action synchronized"
        );
        if synced.cancelled {
            break TurnOutcome::Aborted;
        }
    };

    let (prompt, completion, total) = session.selector.token_usage();
    send_event(
        &session.event_tx,
        TurnEvent::TokenUsage {
            prompt_tokens: prompt.saturating_sub(init_prompt),
            completion_tokens: completion.saturating_sub(init_completion),
            total_tokens: total.saturating_sub(init_total),
            cumulative_total: total,
        },
    );
    send_event(&session.event_tx, TurnEvent::Finished { outcome, iterations });
    tracing::info!(?outcome, iterations, "turn finished");

    Ok(TurnReport {
        outcome,
        iterations,
        actions: state.action_history.clone(),
        state,
    })
}
