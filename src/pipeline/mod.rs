//! 编排流水线的各个节点：解析、模式策略、规划、执行、复审、汇报、事件

pub mod events;
pub mod executor;
pub mod modes;
pub mod parse;
pub mod planner;
pub mod reviewer;
pub mod writer;

pub use events::{EventSender, RunEvent};
pub use executor::StepExecutor;
pub use modes::{ModePolicies, DEFAULT_MODE};
pub use parse::extract_json;
pub use planner::{default_plan, CompiledPlan, PlanCompiler};
pub use reviewer::ProgressReviewer;
pub use writer::ReportCompiler;
