//! Reflector：对当前回答做一次反思评估
//!
//! 按配置的反思格式选择 prompt 模板，调用生成服务，再交给 ReflectionSchema 解析。
//! 只有生成服务本身失败时返回错误；回复无法解析不算错误，记一条 warn 并返回 Unparsed。

use std::sync::Arc;

use tracing::warn;

use crate::config::PromptsSection;
use crate::llm::{LlmClient, LlmError, Message};
use crate::rag::{EvidencePassage, ReflectionSchema, ReflectionVerdict};

pub struct Reflector {
    llm: Arc<dyn LlmClient>,
    schema: ReflectionSchema,
    system_prompt: String,
    prompt_template: String,
}

impl Reflector {
    pub fn new(llm: Arc<dyn LlmClient>, schema: ReflectionSchema) -> Self {
        Self::from_prompts(llm, schema, &PromptsSection::default())
    }

    pub fn from_prompts(
        llm: Arc<dyn LlmClient>,
        schema: ReflectionSchema,
        prompts: &PromptsSection,
    ) -> Self {
        let prompt_template = match schema {
            ReflectionSchema::Completeness => prompts.completeness_reflection.clone(),
            ReflectionSchema::QualityScore { .. } => prompts.quality_reflection.clone(),
        };
        Self {
            llm,
            schema,
            system_prompt: prompts.reflection_system.clone(),
            prompt_template,
        }
    }

    pub fn schema(&self) -> ReflectionSchema {
        self.schema
    }

    pub async fn evaluate(
        &self,
        question: &str,
        answer: &str,
        evidence: &[EvidencePassage],
    ) -> Result<ReflectionVerdict, LlmError> {
        let prompt = self
            .prompt_template
            .replace("{question}", question)
            .replace("{answer}", answer)
            .replace("{evidence_count}", &evidence.len().to_string());

        let messages = vec![Message::system(self.system_prompt.clone()), Message::user(prompt)];
        let response = self.llm.complete(&messages).await?;
        let verdict = self.schema.parse(&response);

        if let ReflectionVerdict::Unparsed { diagnostic } = &verdict {
            warn!(%diagnostic, "reflection payload could not be parsed, using default verdict");
        }
        Ok(verdict)
    }
}
