//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）、嵌入提供方

pub mod deepseek;
pub mod embedding;
pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use deepseek::{create_deepseek_client, DEEPSEEK_BASE_URL, DEEPSEEK_CHAT};
pub use embedding::{create_embedder_from_config, EmbeddingProvider, HashingEmbedder, OpenAiEmbedder};
pub use message::{prompt_chars, Message, Role};
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError};

use crate::config::LlmSection;

/// 按 [llm] 配置创建生成服务客户端：deepseek / openai / mock
pub fn create_llm_from_config(llm: &LlmSection) -> Arc<dyn LlmClient> {
    match llm.provider.to_ascii_lowercase().as_str() {
        "mock" => Arc::new(MockLlmClient),
        "openai" => {
            let model = llm.openai.model.as_deref().unwrap_or(&llm.model);
            Arc::new(
                OpenAiClient::new(llm.base_url.as_deref(), model, None)
                    .with_request_timeout(llm.timeouts.request),
            )
        }
        _ => Arc::new(create_deepseek_client(llm)),
    }
}
