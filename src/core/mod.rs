//! 核心层：错误、轮次状态、会话监管

pub mod error;
pub mod session_supervisor;
pub mod state;

pub use error::AgentError;
pub use session_supervisor::SessionSupervisor;
pub use state::{ActionKind, ActionState, LoopPhase, TurnOutcome};
