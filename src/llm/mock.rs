//! Mock LLM 客户端（用于测试与离线演示，无需 API）
//!
//! - MockLlmClient：取最后一条 User 消息回显为回答；反思请求得到的是非 JSON 文本，会话随之自然终止。
//! - ScriptedLlmClient：按队列依次返回预设回复，并记录每次调用的消息，便于断言调用次数与顺序。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message, Role};

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(format!("Echo from Mock: {}", last_user))
    }
}

/// 脚本化客户端：队列耗尽后返回 fallback（未设置时返回 ApiError）
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    fallback: Option<String>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(|s| Ok(s.into())).collect()),
            fallback: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 追加一条失败回复
    pub fn push_error(self, err: LlmError) -> Self {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Err(err));
        }
        self
    }

    /// 追加一条成功回复
    pub fn push_response(self, text: impl Into<String>) -> Self {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Ok(text.into()));
        }
        self
    }

    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    /// 已发生的调用次数
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// 每次调用收到的消息（按调用顺序）
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        let next = self
            .responses
            .lock()
            .map_err(|e| LlmError::ApiError(e.to_string()))?
            .pop_front();
        match next {
            Some(result) => result,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| LlmError::ApiError("script exhausted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_echoes_last_user_message() {
        let out = MockLlmClient
            .complete(&[Message::system("sys"), Message::user("hello")])
            .await
            .unwrap();
        assert_eq!(out, "Echo from Mock: hello");
    }

    #[tokio::test]
    async fn test_scripted_replays_in_order_then_fails() {
        let llm = ScriptedLlmClient::new(["a", "b"]).push_error(LlmError::Timeout);
        assert_eq!(llm.complete(&[]).await.unwrap(), "a");
        assert_eq!(llm.complete(&[]).await.unwrap(), "b");
        assert_eq!(llm.complete(&[]).await, Err(LlmError::Timeout));
        assert!(llm.complete(&[]).await.is_err());
        assert_eq!(llm.call_count(), 4);
    }

    #[tokio::test]
    async fn test_scripted_fallback() {
        let llm = ScriptedLlmClient::new(Vec::<String>::new()).with_fallback("done");
        assert_eq!(llm.complete(&[Message::user("q")]).await.unwrap(), "done");
        assert_eq!(llm.calls()[0][0].content, "q");
    }
}
