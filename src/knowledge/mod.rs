//! 知识层：文本切分、分词、过滤表达式、嵌入缓存与向量知识库
//!
//! 编排器只依赖 Retriever trait；KnowledgeStore 是内置实现。

pub mod cache;
pub mod filter;
pub mod splitter;
pub mod store;
pub mod tokenizer;

use async_trait::async_trait;

use crate::core::RagError;
use crate::rag::EvidencePassage;

pub use cache::{CachedEmbedder, EmbeddingCache};
pub use filter::Filter;
pub use splitter::{default_separators, RecursiveSplitter};
pub use store::{KnowledgeStore, Metadata};

/// 语义检索方
#[async_trait]
pub trait Retriever: Send + Sync {
    /// 返回按分数降序的片段，可少于 limit；无匹配时返回空而不是错误
    async fn search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<EvidencePassage>, RagError>;
}
