//! DeepSeek 后端（OpenAI 兼容格式）
//!
//! 默认模型 deepseek-chat。

use crate::config::LlmSection;
use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";

/// 按 [llm] 配置创建 DeepSeek 客户端
///
/// - API Key：`DEEPSEEK_API_KEY`，其次 `OPENAI_API_KEY`
/// - 模型：`[llm.deepseek] model`，其次 `DEEPSEEK_MODEL` 环境变量，最后 `[llm] model`
/// - `[llm] base_url` 可指向自建代理，未设置时用官方地址
pub fn create_deepseek_client(llm: &LlmSection) -> OpenAiClient {
    let api_key = std::env::var("DEEPSEEK_API_KEY")
        .or_else(|_| std::env::var("OPENAI_API_KEY"))
        .ok();
    let model = llm
        .deepseek
        .model
        .clone()
        .or_else(|| std::env::var("DEEPSEEK_MODEL").ok())
        .unwrap_or_else(|| llm.model.clone());
    let base_url = llm.base_url.as_deref().unwrap_or(DEEPSEEK_BASE_URL);

    OpenAiClient::new(Some(base_url), &model, api_key.as_deref())
        .with_request_timeout(llm.timeouts.request)
}
