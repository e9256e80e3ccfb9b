//! 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 RagError 决定 RetryAfter / Abort。

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::llm::LlmError;

/// 编排器依赖的外部协作方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Collaborator {
    Retriever,
    Generator,
    Embedder,
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Collaborator::Retriever => "retriever",
            Collaborator::Generator => "generator",
            Collaborator::Embedder => "embedder",
        };
        f.write_str(name)
    }
}

/// 检索、生成、存储过程中可能出现的错误
#[derive(Error, Debug)]
pub enum RagError {
    /// 外部协作方不可用（网络、服务错误、超时）
    #[error("{collaborator} unavailable: {detail}")]
    CollaboratorUnavailable {
        collaborator: Collaborator,
        detail: String,
        retryable: bool,
    },

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid filter expression: {0}")]
    InvalidFilter(String),

    #[error("Embedding cache error: {0}")]
    Cache(#[from] rusqlite::Error),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl RagError {
    /// 生成服务调用失败
    pub fn generator(err: LlmError) -> Self {
        RagError::CollaboratorUnavailable {
            collaborator: Collaborator::Generator,
            retryable: err.is_retryable(),
            detail: err.to_string(),
        }
    }

    /// 嵌入服务调用失败
    pub fn embedder(err: LlmError) -> Self {
        RagError::CollaboratorUnavailable {
            collaborator: Collaborator::Embedder,
            retryable: err.is_retryable(),
            detail: err.to_string(),
        }
    }

    /// 外部调用超时（总是可重试）
    pub fn timeout(collaborator: Collaborator, limit: Duration) -> Self {
        RagError::CollaboratorUnavailable {
            collaborator,
            detail: format!("timed out after {:?}", limit),
            retryable: true,
        }
    }

    /// 将检索过程中的任意错误归为检索方不可用；已是 CollaboratorUnavailable 的保持原样
    pub fn into_retriever_failure(self) -> Self {
        match self {
            e @ RagError::CollaboratorUnavailable { .. } => e,
            other => RagError::CollaboratorUnavailable {
                collaborator: Collaborator::Retriever,
                detail: other.to_string(),
                retryable: false,
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::CollaboratorUnavailable {
                retryable: true,
                ..
            }
        )
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 等待后重试同一调用
    RetryAfter(Duration),
    /// 终止当前会话，返回部分结果
    Abort,
}
