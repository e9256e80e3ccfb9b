//! 内存向量知识库：按集合存放片段与向量，余弦相似度检索，可附加过滤表达式
//!
//! 向量在取锁之前算好，持锁期间只做插入与打分。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::core::RagError;
use crate::knowledge::{Filter, RecursiveSplitter, Retriever};
use crate::llm::EmbeddingProvider;
use crate::rag::{EvidencePassage, Scalar};

/// 片段元数据
pub type Metadata = BTreeMap<String, Scalar>;

struct Entry {
    id: String,
    text: String,
    metadata: Metadata,
    vector: Vec<f32>,
}

struct Collection {
    dimension: usize,
    entries: Vec<Entry>,
}

pub struct KnowledgeStore {
    embedder: Arc<dyn EmbeddingProvider>,
    collections: RwLock<HashMap<String, Collection>>,
}

impl KnowledgeStore {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// 创建集合；已存在时按 drop_if_exists 决定清空重建还是保留
    pub async fn create_collection(&self, name: &str, dimension: usize, drop_if_exists: bool) {
        let mut collections = self.collections.write().await;
        if collections.contains_key(name) && !drop_if_exists {
            return;
        }
        collections.insert(
            name.to_string(),
            Collection {
                dimension,
                entries: Vec::new(),
            },
        );
        info!(collection = name, dimension, "collection created");
    }

    pub async fn has_collection(&self, name: &str) -> bool {
        self.collections.read().await.contains_key(name)
    }

    /// 集合内片段数
    pub async fn len(&self, name: &str) -> Result<usize, RagError> {
        self.collections
            .read()
            .await
            .get(name)
            .map(|c| c.entries.len())
            .ok_or_else(|| RagError::CollectionNotFound(name.to_string()))
    }

    /// 批量写入文本；metadata 若提供须与 texts 等长。返回写入条数
    pub async fn insert_documents(
        &self,
        collection: &str,
        texts: &[String],
        metadata: Option<&[Metadata]>,
    ) -> Result<usize, RagError> {
        if let Some(meta) = metadata {
            if meta.len() != texts.len() {
                return Err(RagError::ConfigError(format!(
                    "{} metadata entries for {} documents",
                    meta.len(),
                    texts.len()
                )));
            }
        }
        if !self.has_collection(collection).await {
            return Err(RagError::CollectionNotFound(collection.to_string()));
        }
        if texts.is_empty() {
            return Ok(0);
        }

        let vectors = self
            .embedder
            .embed_batch(texts)
            .await
            .map_err(RagError::embedder)?;

        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| RagError::CollectionNotFound(collection.to_string()))?;
        if let Some(bad) = vectors.iter().find(|v| v.len() != target.dimension) {
            return Err(RagError::DimensionMismatch {
                expected: target.dimension,
                actual: bad.len(),
            });
        }

        for (i, (text, vector)) in texts.iter().zip(vectors).enumerate() {
            target.entries.push(Entry {
                id: Uuid::new_v4().to_string(),
                text: text.clone(),
                metadata: metadata.map(|m| m[i].clone()).unwrap_or_default(),
                vector,
            });
        }
        Ok(texts.len())
    }

    /// 相似度检索：先过滤再按分数降序截取 limit 条
    pub async fn search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<EvidencePassage>, RagError> {
        if !self.has_collection(collection).await {
            return Err(RagError::CollectionNotFound(collection.to_string()));
        }
        let query_vector = self.embedder.embed(query).await.map_err(RagError::embedder)?;

        let collections = self.collections.read().await;
        let target = collections
            .get(collection)
            .ok_or_else(|| RagError::CollectionNotFound(collection.to_string()))?;
        if query_vector.len() != target.dimension {
            return Err(RagError::DimensionMismatch {
                expected: target.dimension,
                actual: query_vector.len(),
            });
        }

        let mut hits: Vec<EvidencePassage> = target
            .entries
            .iter()
            .map(|entry| EvidencePassage {
                text: entry.text.clone(),
                score: cosine_similarity(&query_vector, &entry.vector),
                source_id: entry.id.clone(),
                metadata: entry.metadata.clone(),
            })
            .filter(|passage| filter.map_or(true, |f| f.matches(passage)))
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    /// 重建集合并写入切分后的文档；每个片段带上文档元数据与 doc_id / chunk 序号
    pub async fn setup_knowledge_base(
        &self,
        collection: &str,
        dimension: usize,
        documents: &[String],
        metadata: Option<&[Metadata]>,
        splitter: &RecursiveSplitter,
    ) -> Result<usize, RagError> {
        self.create_collection(collection, dimension, true).await;

        let mut chunks = Vec::new();
        let mut chunk_meta = Vec::new();
        for (doc_index, document) in documents.iter().enumerate() {
            let base = metadata
                .and_then(|m| m.get(doc_index))
                .cloned()
                .unwrap_or_default();
            for (chunk_index, chunk) in splitter.split(document).into_iter().enumerate() {
                let mut meta = base.clone();
                meta.insert("doc_id".to_string(), Scalar::from(doc_index as i64));
                meta.insert("chunk".to_string(), Scalar::from(chunk_index as i64));
                chunks.push(chunk);
                chunk_meta.push(meta);
            }
        }

        let inserted = self
            .insert_documents(collection, &chunks, Some(&chunk_meta))
            .await?;
        info!(
            collection,
            documents = documents.len(),
            chunks = inserted,
            embedder = self.embedder.name(),
            "knowledge base ready"
        );
        Ok(inserted)
    }
}

#[async_trait]
impl Retriever for KnowledgeStore {
    async fn search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<EvidencePassage>, RagError> {
        KnowledgeStore::search(self, collection, query, limit, filter).await
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
