//! 反思式 RAG 编排：证据累积、查询去重、反思解析、补充查询规划与主循环

pub mod controller;
pub mod events;
pub mod evidence;
pub mod generator;
pub mod ledger;
pub mod planner;
pub mod reflector;
pub mod verdict;

pub use controller::{
    ControllerSettings, IterationRecord, LedgerScope, OrchestrationController, RagOutcome,
    SessionFailure, TerminationReason,
};
pub use events::RagEvent;
pub use evidence::{EvidencePassage, EvidenceSet, Scalar};
pub use generator::AnswerGenerator;
pub use ledger::QueryLedger;
pub use planner::{RefinementPlanner, RefinementStrategy};
pub use reflector::Reflector;
pub use verdict::{extract_json_object, Decision, ExtractError, ReflectionSchema, ReflectionVerdict};
