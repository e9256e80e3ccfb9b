//! 嵌入缓存：按文本内容的 SHA-256 寻址，持久化到 SQLite，进程重启后仍可命中
//!
//! CachedEmbedder 包装任意 EmbeddingProvider：只为未命中的文本分批计算，输出顺序与输入一致。
//! 缓存读写失败只记 warn，按未命中处理，不影响嵌入结果。

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::core::RagError;
use crate::llm::{EmbeddingProvider, LlmError};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS embeddings (
    key TEXT PRIMARY KEY,
    vector BLOB NOT NULL
)";

/// 内容寻址的向量缓存
pub struct EmbeddingCache {
    conn: Mutex<Connection>,
}

impl EmbeddingCache {
    /// 打开（不存在则创建）缓存数据库
    pub fn open(path: &Path) -> Result<Self, RagError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                RagError::ConfigError(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// 内存缓存（测试用）
    pub fn in_memory() -> Result<Self, RagError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// 缓存键：文本 SHA-256 的十六进制表示
    pub fn key_for(text: &str) -> String {
        hex::encode(Sha256::digest(text.as_bytes()))
    }

    pub fn get(&self, text: &str) -> Result<Option<Vec<f32>>, RagError> {
        let blob: Option<Vec<u8>> = self
            .conn()
            .query_row(
                "SELECT vector FROM embeddings WHERE key = ?1",
                params![Self::key_for(text)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob.map(|bytes| decode_vector(&bytes)))
    }

    pub fn put(&self, text: &str, vector: &[f32]) -> Result<(), RagError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO embeddings (key, vector) VALUES (?1, ?2)",
            params![Self::key_for(text), encode_vector(vector)],
        )?;
        Ok(())
    }

    pub fn len(&self) -> Result<usize, RagError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, RagError> {
        Ok(self.len()? == 0)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// 带缓存的嵌入提供方
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    cache: EmbeddingCache,
    batch_size: usize,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, cache: EmbeddingCache, batch_size: usize) -> Self {
        Self {
            inner,
            cache,
            batch_size: batch_size.max(1),
        }
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    fn lookup(&self, text: &str) -> Option<Vec<f32>> {
        match self.cache.get(text) {
            Ok(hit) => hit,
            Err(e) => {
                warn!(error = %e, "embedding cache read failed");
                None
            }
        }
    }

    fn store(&self, text: &str, vector: &[f32]) {
        if let Err(e) = self.cache.put(text, vector) {
            warn!(error = %e, "embedding cache write failed");
        }
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        if let Some(hit) = self.lookup(text) {
            return Ok(hit);
        }
        let vector = self.inner.embed(text).await?;
        self.store(text, &vector);
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let mut out: Vec<Option<Vec<f32>>> = texts.iter().map(|t| self.lookup(t)).collect();
        let misses: Vec<usize> = (0..texts.len()).filter(|&i| out[i].is_none()).collect();
        debug!(
            total = texts.len(),
            misses = misses.len(),
            provider = self.inner.name(),
            "embedding batch"
        );

        for batch in misses.chunks(self.batch_size) {
            let inputs: Vec<String> = batch.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self.inner.embed_batch(&inputs).await?;
            if vectors.len() != inputs.len() {
                return Err(LlmError::ApiError(format!(
                    "embedding batch returned {} vectors for {} inputs",
                    vectors.len(),
                    inputs.len()
                )));
            }
            for (&i, vector) in batch.iter().zip(vectors) {
                self.store(&texts[i], &vector);
                out[i] = Some(vector);
            }
        }

        out.into_iter()
            .map(|v| v.ok_or_else(|| LlmError::ApiError("missing embedding".to_string())))
            .collect()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::llm::HashingEmbedder;

    /// 统计实际计算次数的嵌入方
    struct CountingEmbedder {
        inner: HashingEmbedder,
        computed: AtomicUsize,
        batches: AtomicUsize,
    }

    impl CountingEmbedder {
        fn new() -> Self {
            Self {
                inner: HashingEmbedder::new(32),
                computed: AtomicUsize::new(0),
                batches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
            self.computed.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(text).await
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            let mut out = Vec::new();
            for t in texts {
                out.push(self.embed(t).await?);
            }
            Ok(out)
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[test]
    fn test_key_is_sha256_hex() {
        assert_eq!(
            EmbeddingCache::key_for("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_get_put_roundtrip() {
        let cache = EmbeddingCache::in_memory().unwrap();
        assert_eq!(cache.get("hello").unwrap(), None);
        cache.put("hello", &[0.5, -1.25, 3.0]).unwrap();
        assert_eq!(cache.get("hello").unwrap(), Some(vec![0.5, -1.25, 3.0]));
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_batch_computes_only_misses_in_order() {
        let inner = Arc::new(CountingEmbedder::new());
        let cached = CachedEmbedder::new(inner.clone(), EmbeddingCache::in_memory().unwrap(), 2);

        let first = cached.embed("b").await.unwrap();
        assert_eq!(inner.computed.load(Ordering::SeqCst), 1);

        let texts: Vec<String> = ["a", "b", "c", "d", "e"].iter().map(|s| s.to_string()).collect();
        let vectors = cached.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), 5);
        assert_eq!(vectors[1], first);
        // a c d e 四个未命中，按 2 个一批
        assert_eq!(inner.computed.load(Ordering::SeqCst), 5);
        assert_eq!(inner.batches.load(Ordering::SeqCst), 2);

        let expected = HashingEmbedder::new(32).embed("d").await.unwrap();
        assert_eq!(vectors[3], expected);

        cached.embed_batch(&texts).await.unwrap();
        assert_eq!(inner.computed.load(Ordering::SeqCst), 5);
    }
}
