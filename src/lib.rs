//! Nabd - 自主任务编排智能体
//!
//! 一次请求经过 规划 -> 执行 -> 复审 -> 汇报 的状态机，每个节点完成后写检查点，可跨重启恢复。
//!
//! 模块划分：
//! - **agent**: 无头运行时（CLI / HTTP 共用的请求处理）
//! - **checkpoint**: 检查点存储（none / memory / file / sqlite）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排主控、状态、会话、错误与恢复、优雅关闭
//! - **llm**: oracle 客户端抽象与实现（OpenAI 兼容 / Groq / Mock）
//! - **memory**: 会话消息历史
//! - **observability**: tracing 初始化与指标接口
//! - **pipeline**: 规划、执行、复审、汇报各节点与 JSON 提取
//! - **rate_limit**: 分级限流
//! - **sandbox**: 容器化代码执行
//! - **tools**: 工具集合、注册表与执行器
//! - **web**: HTTP 接口（feature = "web"）

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod pipeline;
pub mod rate_limit;
pub mod sandbox;
pub mod tools;
#[cfg(feature = "web")]
pub mod web;
