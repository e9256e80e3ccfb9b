//! OrchestrationController：检索 → 生成 → 反思 → (补充检索 → 合并 → 重新生成)* 主循环
//!
//! 每个会话从原问题的初始检索开始，随后每轮：
//! 1. 轮数已达 max_iterations → 结束
//! 2. 反思当前回答并追加 IterationRecord；反思认为无需继续 → 结束
//! 3. RefinementPlanner 给出新查询；没有新查询 → 结束
//! 4. 逐条检索并合并证据；本轮没有新证据 → 结束
//! 5. 基于全部已累积证据重新生成回答，进入下一轮
//!
//! 所有外部调用严格顺序执行；失败按 RecoveryEngine 退避重试或终止，终止时返回已累积的部分结果。

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::RagSection;
use crate::core::{Collaborator, RagError, RecoveryAction, RecoveryEngine};
use crate::knowledge::{Filter, Retriever};
use crate::llm::LlmClient;
use crate::rag::{
    AnswerGenerator, Decision, EvidencePassage, EvidenceSet, QueryLedger, RagEvent,
    ReflectionVerdict, Reflector, RefinementPlanner,
};

/// 已发查询记录的作用域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerScope {
    /// 每个问题重新开始
    Session,
    /// 同一个编排器实例上的所有问题共享
    Controller,
}

/// 会话结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    MaxIterations,
    VerdictSatisfied,
    NoRefinementQueries,
    NoNewEvidence,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TerminationReason::MaxIterations => "max iterations reached",
            TerminationReason::VerdictSatisfied => "reflection satisfied",
            TerminationReason::NoRefinementQueries => "no new refinement queries",
            TerminationReason::NoNewEvidence => "no new evidence",
        };
        f.write_str(text)
    }
}

/// 一轮反思的审计记录（创建后不再修改）
#[derive(Debug, Clone, Serialize)]
pub struct IterationRecord {
    /// 从 1 开始
    pub index: usize,
    pub answer_snapshot: String,
    pub verdict: ReflectionVerdict,
    pub decision: Decision,
    pub evidence_count_at_start: usize,
    pub recorded_at: DateTime<Utc>,
}

/// 会话正常结束的结果
#[derive(Debug, Clone, Serialize)]
pub struct RagOutcome {
    pub question: String,
    pub final_answer: String,
    pub evidence: Vec<EvidencePassage>,
    pub iteration_history: Vec<IterationRecord>,
    pub termination: TerminationReason,
    /// 实际发给检索方的查询（按发出顺序）
    pub issued_queries: Vec<String>,
}

/// 外部调用不可恢复失败时的结果：携带已累积的部分状态
#[derive(Debug, Error)]
#[error("session aborted: {error}")]
pub struct SessionFailure {
    #[source]
    pub error: RagError,
    pub question: String,
    /// 初始回答尚未生成时为 None
    pub partial_answer: Option<String>,
    pub evidence: Vec<EvidencePassage>,
    pub iteration_history: Vec<IterationRecord>,
    pub issued_queries: Vec<String>,
}

/// 编排参数（由 [rag] 配置段解析）
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub collection: String,
    pub max_iterations: usize,
    pub initial_limit: usize,
    pub refinement_limit: usize,
    pub ledger_scope: LedgerScope,
    pub filter: Option<Filter>,
    pub call_timeout: Option<Duration>,
}

impl ControllerSettings {
    pub fn from_config(rag: &RagSection) -> Result<Self, RagError> {
        let filter = match rag.filter.as_deref().map(str::trim) {
            Some(expr) if !expr.is_empty() => Some(Filter::parse(expr)?),
            _ => None,
        };
        Ok(Self {
            collection: rag.collection.clone(),
            max_iterations: rag.max_iterations(),
            initial_limit: rag.initial_limit,
            refinement_limit: rag.refinement_limit,
            ledger_scope: rag.ledger_scope,
            filter,
            call_timeout: (rag.call_timeout_secs > 0)
                .then(|| Duration::from_secs(rag.call_timeout_secs)),
        })
    }
}

struct SessionState {
    evidence: EvidenceSet,
    answer: Option<String>,
    history: Vec<IterationRecord>,
    issued: Vec<String>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            evidence: EvidenceSet::new(),
            answer: None,
            history: Vec::new(),
            issued: Vec::new(),
        }
    }
}

pub struct OrchestrationController {
    retriever: Arc<dyn Retriever>,
    llm: Arc<dyn LlmClient>,
    generator: AnswerGenerator,
    reflector: Reflector,
    planner: RefinementPlanner,
    recovery: RecoveryEngine,
    settings: ControllerSettings,
    /// 仅 LedgerScope::Controller 使用；会话期间持有锁并原地登记，会话被取消时已登记的查询仍保留
    shared_ledger: Mutex<QueryLedger>,
    event_tx: Option<mpsc::UnboundedSender<RagEvent>>,
}

impl OrchestrationController {
    pub fn from_config(
        llm: Arc<dyn LlmClient>,
        retriever: Arc<dyn Retriever>,
        rag: &RagSection,
    ) -> Result<Self, RagError> {
        Ok(Self {
            generator: AnswerGenerator::from_prompts(llm.clone(), &rag.prompts),
            reflector: Reflector::from_prompts(llm.clone(), rag.schema(), &rag.prompts),
            planner: RefinementPlanner::new(rag.strategy(), rag.max_refinement_queries),
            recovery: RecoveryEngine::from_config(&rag.failure),
            settings: ControllerSettings::from_config(rag)?,
            shared_ledger: Mutex::new(QueryLedger::new()),
            event_tx: None,
            retriever,
            llm,
        })
    }

    pub fn with_event_tx(mut self, tx: mpsc::UnboundedSender<RagEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn with_recovery(mut self, recovery: RecoveryEngine) -> Self {
        self.recovery = recovery;
        self
    }

    /// 回答一个问题
    pub async fn run_query(&self, question: &str) -> Result<RagOutcome, SessionFailure> {
        info!(question, scope = ?self.settings.ledger_scope, "starting session");
        let usage_before = self.llm.token_usage();

        let mut state = SessionState::new();
        let result = match self.settings.ledger_scope {
            LedgerScope::Session => {
                self.drive(question, &mut QueryLedger::new(), &mut state)
                    .await
            }
            LedgerScope::Controller => {
                let mut shared = self.shared_ledger.lock().await;
                self.drive(question, &mut *shared, &mut state).await
            }
        };

        let usage_after = self.llm.token_usage();
        info!(
            prompt_tokens = usage_after.0.saturating_sub(usage_before.0),
            completion_tokens = usage_after.1.saturating_sub(usage_before.1),
            total_tokens = usage_after.2.saturating_sub(usage_before.2),
            "session token usage"
        );

        match result {
            Ok(reason) => {
                info!(
                    %reason,
                    iterations = state.history.len(),
                    evidence = state.evidence.len(),
                    "session finished"
                );
                self.emit(RagEvent::Terminated {
                    reason,
                    iterations: state.history.len(),
                    evidence: state.evidence.len(),
                });
                Ok(RagOutcome {
                    question: question.to_string(),
                    final_answer: state.answer.unwrap_or_default(),
                    evidence: state.evidence.into_passages(),
                    iteration_history: state.history,
                    termination: reason,
                    issued_queries: state.issued,
                })
            }
            Err(error) => {
                error!(%error, iterations = state.history.len(), "session aborted");
                Err(SessionFailure {
                    error,
                    question: question.to_string(),
                    partial_answer: state.answer,
                    evidence: state.evidence.into_passages(),
                    iteration_history: state.history,
                    issued_queries: state.issued,
                })
            }
        }
    }

    async fn drive(
        &self,
        question: &str,
        ledger: &mut QueryLedger,
        state: &mut SessionState,
    ) -> Result<TerminationReason, RagError> {
        // 原问题总是发出，即使共享记录中已有
        ledger.register(question);
        self.retrieve(question, self.settings.initial_limit, state).await?;
        state.answer = Some(self.generate(question, state.evidence.all(), 0).await?);

        let schema = self.reflector.schema();
        loop {
            if state.history.len() >= self.settings.max_iterations {
                return Ok(TerminationReason::MaxIterations);
            }
            let iteration = state.history.len() + 1;
            let evidence_count_at_start = state.evidence.len();
            let answer = state.answer.clone().unwrap_or_default();

            let verdict = self.reflect(question, &answer, state.evidence.all()).await?;
            let decision = schema.normalize(&verdict);
            info!(
                iteration,
                should_continue = decision.should_continue,
                hints = decision.refinement_hints.len(),
                "reflection"
            );
            self.emit(RagEvent::Reflection {
                iteration,
                should_continue: decision.should_continue,
                hints: decision.refinement_hints.clone(),
            });
            state.history.push(IterationRecord {
                index: iteration,
                answer_snapshot: answer,
                verdict,
                decision: decision.clone(),
                evidence_count_at_start,
                recorded_at: Utc::now(),
            });

            if !decision.should_continue {
                return Ok(TerminationReason::VerdictSatisfied);
            }

            let queries = self.planner.plan(question, &decision, ledger);
            if queries.is_empty() {
                return Ok(TerminationReason::NoRefinementQueries);
            }

            let mut new_passages = 0;
            for query in &queries {
                new_passages += self
                    .retrieve(query, self.settings.refinement_limit, state)
                    .await?;
            }
            if new_passages == 0 {
                return Ok(TerminationReason::NoNewEvidence);
            }

            state.answer = Some(
                self.generate(question, state.evidence.all(), iteration)
                    .await?,
            );
        }
    }

    /// 检索并合并；返回新证据条数
    async fn retrieve(
        &self,
        query: &str,
        limit: usize,
        state: &mut SessionState,
    ) -> Result<usize, RagError> {
        state.issued.push(query.to_string());
        let retriever = &self.retriever;
        let collection = self.settings.collection.as_str();
        let filter = self.settings.filter.as_ref();
        let passages = self
            .call(Collaborator::Retriever, move || async move {
                retriever
                    .search(collection, query, limit, filter)
                    .await
                    .map_err(RagError::into_retriever_failure)
            })
            .await?;

        let returned = passages.len();
        let delta = state.evidence.merge(passages).len();
        debug!(query, returned, new_passages = delta, total = state.evidence.len(), "retrieval merged");
        self.emit(RagEvent::Retrieval {
            query: query.to_string(),
            returned,
            new_passages: delta,
        });
        Ok(delta)
    }

    async fn generate(
        &self,
        question: &str,
        evidence: &[EvidencePassage],
        iteration: usize,
    ) -> Result<String, RagError> {
        let generator = &self.generator;
        let answer = self
            .call(Collaborator::Generator, move || async move {
                generator
                    .generate(question, evidence, iteration)
                    .await
                    .map_err(RagError::generator)
            })
            .await?;
        info!(iteration, evidence = evidence.len(), chars = answer.chars().count(), "answer generated");
        self.emit(RagEvent::AnswerGenerated {
            iteration,
            chars: answer.chars().count(),
        });
        Ok(answer)
    }

    async fn reflect(
        &self,
        question: &str,
        answer: &str,
        evidence: &[EvidencePassage],
    ) -> Result<ReflectionVerdict, RagError> {
        let reflector = &self.reflector;
        self.call(Collaborator::Generator, move || async move {
            reflector
                .evaluate(question, answer, evidence)
                .await
                .map_err(RagError::generator)
        })
        .await
    }

    /// 执行一次外部调用：可选超时，失败时按 RecoveryEngine 重试或放弃
    async fn call<T, F, Fut>(&self, collaborator: Collaborator, mut op: F) -> Result<T, RagError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RagError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = match self.settings.call_timeout {
                Some(limit) => match tokio::time::timeout(limit, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(RagError::timeout(collaborator, limit)),
                },
                None => op().await,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            match self.recovery.handle(&err, attempt) {
                RecoveryAction::RetryAfter(delay) => {
                    warn!(%collaborator, attempt, delay_ms = delay.as_millis() as u64, error = %err, "call failed, retrying");
                    self.emit(RagEvent::Retry {
                        collaborator,
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                        reason: err.to_string(),
                    });
                    tokio::time::sleep(delay).await;
                }
                RecoveryAction::Abort => return Err(err),
            }
        }
    }

    fn emit(&self, event: RagEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_parse_filter_and_timeout() {
        let rag = RagSection {
            filter: Some(r#"category == "AI""#.to_string()),
            call_timeout_secs: 30,
            max_iterations: -1,
            ..RagSection::default()
        };
        let settings = ControllerSettings::from_config(&rag).unwrap();
        assert!(settings.filter.is_some());
        assert_eq!(settings.call_timeout, Some(Duration::from_secs(30)));
        assert_eq!(settings.max_iterations, 0);
    }

    #[test]
    fn test_blank_filter_means_none() {
        let rag = RagSection {
            filter: Some("   ".to_string()),
            ..RagSection::default()
        };
        let settings = ControllerSettings::from_config(&rag).unwrap();
        assert!(settings.filter.is_none());
        assert_eq!(settings.call_timeout, None);
    }

    #[test]
    fn test_invalid_filter_is_rejected() {
        let rag = RagSection {
            filter: Some("category ==".to_string()),
            ..RagSection::default()
        };
        assert!(matches!(
            ControllerSettings::from_config(&rag),
            Err(RagError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_termination_reason_serializes_snake_case() {
        let json = serde_json::to_string(&TerminationReason::NoNewEvidence).unwrap();
        assert_eq!(json, "\"no_new_evidence\"");
    }
}
