//! Agentic RAG - Rust 反思式检索增强问答
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与失败恢复策略
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）、嵌入提供方
//! - **knowledge**: 文本切分、过滤表达式、嵌入缓存、向量知识库
//! - **rag**: 查询去重、证据累积、反思解析、补充查询规划、编排主循环
//! - **observability**: 日志初始化

pub mod config;
pub mod core;
pub mod knowledge;
pub mod llm;
pub mod observability;
pub mod rag;

pub use rag::{OrchestrationController, RagOutcome, SessionFailure};
