//! 编排过程事件：用于 CLI/前端展示每一步检索、生成与反思

use serde::Serialize;

use crate::core::Collaborator;
use crate::rag::TerminationReason;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RagEvent {
    /// 一次检索完成：返回条数与其中新证据条数
    Retrieval {
        query: String,
        returned: usize,
        new_passages: usize,
    },
    /// 生成了一版回答（iteration = 0 为初始回答）
    AnswerGenerated { iteration: usize, chars: usize },
    /// 一轮反思结束
    Reflection {
        iteration: usize,
        should_continue: bool,
        hints: Vec<String>,
    },
    /// 外部调用失败，退避后重试
    Retry {
        collaborator: Collaborator,
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },
    /// 会话结束
    Terminated {
        reason: TerminationReason,
        iterations: usize,
        evidence: usize,
    },
}
