//! 轮次：动作选择、块同步与生成主循环

pub mod events;
pub mod loop_;
pub mod selector;
pub mod sync;

pub use events::{EventSender, TurnEvent};
pub use loop_::{run_generation_loop, TurnReport, TurnSession, DEFAULT_MAX_ITERATIONS};
pub use selector::{
    decision_tool, mask_actions, parse_decision, ActionSelector, Selection, DECISION_TOOL,
};
pub use sync::{sync_edit, CellSynchronizer, SyncOutcome};
