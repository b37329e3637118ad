//! 核心编排层：错误与恢复、编排状态、会话、主控循环、优雅关闭

pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session;
pub mod shutdown;
pub mod state;

pub use error::{AgentError, RecoveryAction};
pub use orchestrator::{create_llm_from_config, Controller, RunOutcome};
pub use recovery::RecoveryEngine;
pub use session::{Session, SessionId, SessionManager, SessionSlot};
pub use shutdown::{run_with_graceful_shutdown, ShutdownManager, ShutdownReason};
pub use state::{
    step_id, Decision, Node, OrchestrationState, ReviewDecision, ToolInvocationRecord,
};
