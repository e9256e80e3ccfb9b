//! 核心层：错误类型与失败恢复策略

pub mod error;
pub mod recovery;

pub use error::{Collaborator, RagError, RecoveryAction};
pub use recovery::RecoveryEngine;
