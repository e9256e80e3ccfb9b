//! AnswerGenerator：基于证据集合生成回答
//!
//! 每次都用全部已累积证据作为上下文（不做增量回答）。iteration = 0 为初始回答，其余为第 N 次改进。

use std::sync::Arc;

use tracing::debug;

use crate::config::PromptsSection;
use crate::llm::{prompt_chars, LlmClient, LlmError, Message};
use crate::rag::EvidencePassage;

pub struct AnswerGenerator {
    llm: Arc<dyn LlmClient>,
    answer_system: String,
    refine_system: String,
}

impl AnswerGenerator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self::from_prompts(llm, &PromptsSection::default())
    }

    pub fn from_prompts(llm: Arc<dyn LlmClient>, prompts: &PromptsSection) -> Self {
        Self {
            llm,
            answer_system: prompts.answer_system.clone(),
            refine_system: prompts.refine_system.clone(),
        }
    }

    pub async fn generate(
        &self,
        question: &str,
        evidence: &[EvidencePassage],
        iteration: usize,
    ) -> Result<String, LlmError> {
        let messages = self.build_messages(question, evidence, iteration);
        debug!(iteration, prompt_chars = prompt_chars(&messages), "generating answer");
        self.llm.complete(&messages).await
    }

    fn build_messages(
        &self,
        question: &str,
        evidence: &[EvidencePassage],
        iteration: usize,
    ) -> Vec<Message> {
        let context = render_context(evidence);
        if iteration == 0 {
            vec![
                Message::system(self.answer_system.clone()),
                Message::user(format!(
                    "基于以下文档内容回答问题：\n\n文档内容：\n{}\n\n问题：{}",
                    context, question
                )),
            ]
        } else {
            vec![
                Message::system(
                    self.refine_system
                        .replace("{iteration}", &iteration.to_string()),
                ),
                Message::user(format!(
                    "基于以下所有文档内容回答问题：\n\n文档内容：\n{}\n\n问题：{}",
                    context, question
                )),
            ]
        }
    }
}

/// 编号列出证据：`文档1: ...`
fn render_context(evidence: &[EvidencePassage]) -> String {
    evidence
        .iter()
        .enumerate()
        .map(|(i, p)| format!("文档{}: {}", i + 1, p.text))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Role, ScriptedLlmClient};

    fn evidence() -> Vec<EvidencePassage> {
        vec![
            EvidencePassage::new("机器学习是人工智能的一个重要分支。", 0.9, "d1"),
            EvidencePassage::new("深度学习是机器学习的一个子集。", 0.8, "d2"),
        ]
    }

    #[tokio::test]
    async fn test_initial_prompt_lists_numbered_documents() {
        let llm = Arc::new(ScriptedLlmClient::new(["answer"]));
        let generator = AnswerGenerator::new(llm.clone());
        let answer = generator.generate("区别是什么？", &evidence(), 0).await.unwrap();
        assert_eq!(answer, "answer");

        let call = &llm.calls()[0];
        assert_eq!(call[0].role, Role::System);
        assert!(call[0].content.contains("严格基于提供的参考文档"));
        assert!(call[1]
            .content
            .contains("文档1: 机器学习是人工智能的一个重要分支。\n文档2: 深度学习是机器学习的一个子集。"));
        assert!(call[1].content.ends_with("问题：区别是什么？"));
    }

    #[tokio::test]
    async fn test_refine_prompt_mentions_iteration() {
        let llm = Arc::new(ScriptedLlmClient::new(["better"]));
        let generator = AnswerGenerator::new(llm.clone());
        generator.generate("q", &evidence(), 2).await.unwrap();
        let call = &llm.calls()[0];
        assert!(call[0].content.contains("第2次迭代优化"));
        assert!(call[1].content.starts_with("基于以下所有文档内容回答问题"));
    }
}
