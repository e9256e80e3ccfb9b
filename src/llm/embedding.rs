//! 嵌入 API：供知识库入库与检索使用
//!
//! - OpenAiEmbedder：调用 OpenAI 兼容的 /embeddings 端点，支持批量输入
//! - HashingEmbedder：离线确定性嵌入（分词后特征哈希），用于测试与无 API Key 的演示

use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::knowledge::tokenizer;
use crate::llm::LlmError;

/// 嵌入提供方
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 将单段文本编码为向量
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;

    /// 批量编码，输出顺序与输入一致；默认逐条调用 embed
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// 提供方名称（日志用）
    fn name(&self) -> &str;
}

/// 使用 async-openai 调用 OpenAI 兼容的 embeddings API
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbedder {
    /// 从环境变量与可选 base_url 创建（与 LLM 共用 OPENAI_API_KEY / base_url）
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }

    async fn request(&self, input: EmbeddingInput) -> Result<Vec<Vec<f32>>, LlmError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(input)
            .build()
            .map_err(|e| LlmError::InvalidRequest(e.to_string()))?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| LlmError::ApiError(e.to_string()))?;
        Ok(response.data.into_iter().map(|e| e.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(LlmError::InvalidRequest("cannot embed blank text".to_string()));
        }
        self.request(EmbeddingInput::String(text.to_string()))
            .await?
            .pop()
            .ok_or_else(|| LlmError::ApiError("embeddings response has no data".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let vectors = self
            .request(EmbeddingInput::StringArray(texts.to_vec()))
            .await?;
        if vectors.len() != texts.len() {
            return Err(LlmError::ApiError(format!(
                "embedding count mismatch: sent {}, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// 特征哈希嵌入：每个词的 SHA-256 前 8 字节决定桶位与符号，结果做 L2 归一化
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenizer::tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        Ok(self.encode(text))
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

/// 从应用配置创建嵌入提供方：provider = "openai" 且有 API Key 时用 OpenAiEmbedder，否则退回 HashingEmbedder
pub fn create_embedder_from_config(
    provider: &str,
    base_url: Option<&str>,
    model: &str,
    dimension: usize,
) -> Arc<dyn EmbeddingProvider> {
    if provider.eq_ignore_ascii_case("openai") {
        let key = std::env::var("OPENAI_API_KEY").ok().unwrap_or_default();
        if !key.is_empty() && key != "sk-placeholder" {
            return Arc::new(OpenAiEmbedder::new(base_url, model, Some(&key)));
        }
        tracing::warn!("embedding provider openai requested but OPENAI_API_KEY is missing, using hashing");
    }
    Arc::new(HashingEmbedder::new(dimension))
}
