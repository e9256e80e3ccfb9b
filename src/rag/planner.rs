//! RefinementPlanner：把反思线索变成本轮要发出的新查询
//!
//! 两种策略（由配置选择）：
//! - full_queries：每条线索本身就是一条完整查询，逐条去重后发出
//! - combined_keywords：线索是关键词，与原问题拼成一条组合查询
//!
//! 已登记在 QueryLedger 中的查询（含原问题）与空线索都会被丢弃；返回的查询已登记。

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::rag::{Decision, QueryLedger};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinementStrategy {
    FullQueries,
    CombinedKeywords,
}

#[derive(Debug, Clone)]
pub struct RefinementPlanner {
    strategy: RefinementStrategy,
    /// 每轮最多发出的查询数
    max_queries: usize,
}

impl RefinementPlanner {
    pub fn new(strategy: RefinementStrategy, max_queries: usize) -> Self {
        Self {
            strategy,
            max_queries,
        }
    }

    /// 生成本轮的新查询；超出上限的候选不会被登记，后续轮次仍可使用
    pub fn plan(&self, question: &str, decision: &Decision, ledger: &mut QueryLedger) -> Vec<String> {
        let candidates: Vec<String> = match self.strategy {
            RefinementStrategy::FullQueries => decision
                .refinement_hints
                .iter()
                .map(|hint| hint.trim().to_string())
                .filter(|hint| !hint.is_empty())
                .collect(),
            RefinementStrategy::CombinedKeywords => {
                combine_keywords(question, &decision.refinement_hints)
                    .into_iter()
                    .collect()
            }
        };

        let mut planned = Vec::new();
        for candidate in candidates {
            if planned.len() >= self.max_queries {
                break;
            }
            if ledger.register(&candidate) {
                planned.push(candidate);
            } else {
                debug!(query = %candidate, "skipping already issued query");
            }
        }
        planned
    }
}

/// 原问题 + 非空关键词（空格分隔）；没有可用关键词时返回 None
fn combine_keywords(question: &str, keywords: &[String]) -> Option<String> {
    let keywords: Vec<&str> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .collect();
    if keywords.is_empty() {
        return None;
    }
    Some(format!("{} {}", question.trim(), keywords.join(" ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(hints: &[&str]) -> Decision {
        Decision {
            should_continue: true,
            refinement_hints: hints.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_full_queries_filters_empty_and_issued() {
        let planner = RefinementPlanner::new(RefinementStrategy::FullQueries, 3);
        let mut ledger = QueryLedger::new();
        ledger.register("什么是人工智能？");
        let planned = planner.plan(
            "什么是人工智能？",
            &decision(&["", "什么是人工智能？", "AI 的应用领域", "  "]),
            &mut ledger,
        );
        assert_eq!(planned, vec!["AI 的应用领域"]);
        assert!(ledger.contains("AI 的应用领域"));
    }

    #[test]
    fn test_full_queries_cap_and_unregistered_overflow() {
        let planner = RefinementPlanner::new(RefinementStrategy::FullQueries, 2);
        let mut ledger = QueryLedger::new();
        let planned = planner.plan("q", &decision(&["a", "b", "c", "d"]), &mut ledger);
        assert_eq!(planned, vec!["a", "b"]);
        assert!(!ledger.contains("c"));
    }

    #[test]
    fn test_duplicate_hints_in_one_verdict() {
        let planner = RefinementPlanner::new(RefinementStrategy::FullQueries, 3);
        let mut ledger = QueryLedger::new();
        let planned = planner.plan("q", &decision(&["a", "a", " a "]), &mut ledger);
        assert_eq!(planned, vec!["a"]);
    }

    #[test]
    fn test_combined_keywords_single_query() {
        let planner = RefinementPlanner::new(RefinementStrategy::CombinedKeywords, 3);
        let mut ledger = QueryLedger::new();
        let planned = planner.plan(
            "深度学习和机器学习有什么区别？",
            &decision(&["神经网络", "", "特征工程"]),
            &mut ledger,
        );
        assert_eq!(planned, vec!["深度学习和机器学习有什么区别？ 神经网络 特征工程"]);

        let again = planner.plan(
            "深度学习和机器学习有什么区别？",
            &decision(&["神经网络", "特征工程"]),
            &mut ledger,
        );
        assert!(again.is_empty());
    }

    #[test]
    fn test_combined_keywords_without_keywords() {
        let planner = RefinementPlanner::new(RefinementStrategy::CombinedKeywords, 3);
        let mut ledger = QueryLedger::new();
        assert!(planner.plan("q", &decision(&[" ", ""]), &mut ledger).is_empty());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_no_hints_no_queries() {
        let planner = RefinementPlanner::new(RefinementStrategy::FullQueries, 3);
        let mut ledger = QueryLedger::new();
        assert!(planner.plan("q", &Decision::fallback(), &mut ledger).is_empty());
    }
}
