//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `RAG__*` 覆盖（双下划线表示嵌套，如 `RAG__RAG__MAX_ITERATIONS=3`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::llm::DEEPSEEK_CHAT;
use crate::rag::{LedgerScope, RefinementStrategy, ReflectionSchema};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub embedding: EmbeddingSection,
    pub ingest: IngestSection,
    pub rag: RagSection,
}

/// [app] 段：应用名、数据目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 嵌入缓存等持久化文件所在目录
    pub data_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            data_dir: PathBuf::from("data"),
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub deepseek: LlmDeepSeekSection,
    pub openai: LlmOpenAiSection,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: DEEPSEEK_CHAT.to_string(),
            base_url: None,
            deepseek: LlmDeepSeekSection::default(),
            openai: LlmOpenAiSection::default(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmDeepSeekSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmOpenAiSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒），0 表示不限
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [embedding] 段：嵌入后端、维度、批大小、缓存文件
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingSection {
    /// openai / hashing
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub dimension: usize,
    pub batch_size: usize,
    /// 缓存文件路径；未设置时为 `<data_dir>/embedding_cache.db`，空字符串表示禁用缓存
    pub cache_path: Option<PathBuf>,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            provider: "hashing".to_string(),
            model: "text-embedding-3-small".to_string(),
            base_url: None,
            dimension: 1024,
            batch_size: 64,
            cache_path: None,
        }
    }
}

impl EmbeddingSection {
    /// 解析实际缓存路径；None 表示不使用持久化缓存
    pub fn resolved_cache_path(&self, data_dir: &std::path::Path) -> Option<PathBuf> {
        match &self.cache_path {
            Some(p) if p.as_os_str().is_empty() => None,
            Some(p) => Some(p.clone()),
            None => Some(data_dir.join("embedding_cache.db")),
        }
    }
}

/// [ingest] 段：文档切分
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestSection {
    /// 单个片段的最大字符数
    pub chunk_size: usize,
    /// 分隔符优先级（从高到低），空字符串表示按字符硬切
    pub separators: Vec<String>,
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            separators: crate::knowledge::splitter::default_separators(),
        }
    }
}

/// [rag] 段：迭代检索-反思-补充的编排参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RagSection {
    pub collection: String,
    /// 最大反思轮数；≤ 0 时只执行初始检索与回答
    pub max_iterations: i64,
    /// 初始检索返回条数
    pub initial_limit: usize,
    /// 每条补充查询返回条数
    pub refinement_limit: usize,
    /// 每轮最多发出的补充查询数
    pub max_refinement_queries: usize,
    pub reflection_schema: ReflectionSchemaKind,
    /// quality_score 模式下判定「足够」的最低分（1..=10）
    pub quality_threshold: u8,
    /// 未设置时取反思模式的默认策略
    pub refinement_strategy: Option<RefinementStrategy>,
    pub ledger_scope: LedgerScope,
    /// 每次检索附加的过滤表达式，如 `category == "AI" and importance > 85`
    pub filter: Option<String>,
    /// 单次外部调用超时（秒），0 表示不限
    pub call_timeout_secs: u64,
    pub failure: FailureSection,
    pub prompts: PromptsSection,
}

impl Default for RagSection {
    fn default() -> Self {
        Self {
            collection: "agentic_rag".to_string(),
            max_iterations: 2,
            initial_limit: 5,
            refinement_limit: 3,
            max_refinement_queries: 3,
            reflection_schema: ReflectionSchemaKind::Completeness,
            quality_threshold: 7,
            refinement_strategy: None,
            ledger_scope: LedgerScope::Session,
            filter: None,
            call_timeout_secs: 0,
            failure: FailureSection::default(),
            prompts: PromptsSection::default(),
        }
    }
}

impl RagSection {
    /// 反思模式（quality_score 模式带阈值）
    pub fn schema(&self) -> ReflectionSchema {
        match self.reflection_schema {
            ReflectionSchemaKind::Completeness => ReflectionSchema::Completeness,
            ReflectionSchemaKind::QualityScore => ReflectionSchema::QualityScore {
                threshold: self.quality_threshold.clamp(1, 10),
            },
        }
    }

    /// 实际使用的补充查询策略
    pub fn strategy(&self) -> RefinementStrategy {
        self.refinement_strategy
            .unwrap_or_else(|| self.schema().natural_strategy())
    }

    /// 负数视为 0
    pub fn max_iterations(&self) -> usize {
        self.max_iterations.max(0) as usize
    }
}

/// 配置中的反思模式名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionSchemaKind {
    Completeness,
    QualityScore,
}

/// 外部调用失败时的策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// 首次失败即终止会话并返回已累积的部分结果
    Abort,
    /// 指数退避重试，耗尽后终止
    Retry,
}

/// [rag.failure] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FailureSection {
    pub mode: FailureMode,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for FailureSection {
    fn default() -> Self {
        Self {
            mode: FailureMode::Abort,
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

/// [rag.prompts] 段：可覆盖的提示词模板
///
/// 占位符：`{question}`、`{answer}`、`{evidence_count}`、`{iteration}`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptsSection {
    pub answer_system: String,
    pub refine_system: String,
    pub reflection_system: String,
    pub completeness_reflection: String,
    pub quality_reflection: String,
}

impl Default for PromptsSection {
    fn default() -> Self {
        Self {
            answer_system: DEFAULT_ANSWER_SYSTEM.to_string(),
            refine_system: DEFAULT_REFINE_SYSTEM.to_string(),
            reflection_system: DEFAULT_REFLECTION_SYSTEM.to_string(),
            completeness_reflection: DEFAULT_COMPLETENESS_REFLECTION.to_string(),
            quality_reflection: DEFAULT_QUALITY_REFLECTION.to_string(),
        }
    }
}

const DEFAULT_ANSWER_SYSTEM: &str = "你是一个专业的AI助手。请基于提供的文档内容回答用户问题。\
重要提醒：请严格基于提供的参考文档回答，不要捏造或编造文档中不存在的信息。\
如果文档内容不足以完全回答问题，请明确指出需要更多信息的方面，不要进行推测或假设。";

const DEFAULT_REFINE_SYSTEM: &str = "你是一个专业的AI助手。这是第{iteration}次迭代优化。\
请基于提供的所有文档内容给出最全面、准确的回答。\
重要提醒：请严格基于提供的参考文档回答，不要捏造或编造文档中不存在的信息，不要进行无根据的推测或假设。";

const DEFAULT_REFLECTION_SYSTEM: &str =
    "你是一个专业的问答质量分析师。请严格按照要求的JSON格式输出，不要添加任何额外的文本。";

const DEFAULT_COMPLETENESS_REFLECTION: &str = r#"请评估以下回答的完整性，并以JSON格式返回结果：

用户问题：{question}
当前回答：{answer}
已检索文档数：{evidence_count}

请评估：
1. 回答是否完整回答了用户问题
2. 如果不完整，需要搜索什么信息来补充
3. 生成具体的语义搜索查询语句（不是关键词）

请严格按照以下JSON格式返回：
{
    "is_complete": true/false,
    "missing_info": "如果不完整，描述缺少什么信息",
    "search_queries": ["具体的搜索查询语句1", "具体的搜索查询语句2"]
}

注意：
- search_queries应该是完整的问句或描述，不是单个关键词
- 只有当回答明显不足时才设置is_complete为false
- 最多生成3个搜索查询"#;

const DEFAULT_QUALITY_REFLECTION: &str = r#"请为以下回答的质量打分，并以JSON格式返回结果：

用户问题：{question}
当前回答：{answer}
已检索文档数：{evidence_count}

请严格按照以下JSON格式返回：
{
    "quality_score": 1-10 的整数,
    "is_sufficient": true/false,
    "is_factual": true/false,
    "needs_more_info": true/false,
    "refinement_keywords": ["关键词1", "关键词2"],
    "analysis": "简要分析"
}"#;

/// 从 config 目录加载配置，环境变量 RAG__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 RAG__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("RAG")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(text: &str) -> AppConfig {
        config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.rag.max_iterations(), 2);
        assert_eq!(cfg.rag.initial_limit, 5);
        assert_eq!(cfg.rag.refinement_limit, 3);
        assert_eq!(cfg.rag.ledger_scope, LedgerScope::Session);
        assert_eq!(cfg.rag.strategy(), RefinementStrategy::FullQueries);
        assert_eq!(cfg.ingest.chunk_size, 500);
        assert_eq!(cfg.embedding.batch_size, 64);
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let cfg = from_toml(
            r#"
            [rag]
            max_iterations = 4
            reflection_schema = "quality_score"
            quality_threshold = 8
            "#,
        );
        assert_eq!(cfg.rag.max_iterations(), 4);
        assert_eq!(cfg.rag.schema(), ReflectionSchema::QualityScore { threshold: 8 });
        assert_eq!(cfg.rag.strategy(), RefinementStrategy::CombinedKeywords);
        assert_eq!(cfg.rag.collection, "agentic_rag");
        assert_eq!(cfg.llm.timeouts.request, 60);
    }

    #[test]
    fn test_explicit_strategy_overrides_schema_default() {
        let cfg = from_toml(
            r#"
            [rag]
            reflection_schema = "quality_score"
            refinement_strategy = "full_queries"
            ledger_scope = "controller"
            "#,
        );
        assert_eq!(cfg.rag.strategy(), RefinementStrategy::FullQueries);
        assert_eq!(cfg.rag.ledger_scope, LedgerScope::Controller);
    }

    #[test]
    fn test_negative_iterations_clamp_to_zero() {
        let cfg = from_toml("[rag]\nmax_iterations = -3\n");
        assert_eq!(cfg.rag.max_iterations(), 0);
    }

    #[test]
    fn test_cache_path_resolution() {
        let mut section = EmbeddingSection::default();
        let dir = std::path::Path::new("data");
        assert_eq!(
            section.resolved_cache_path(dir),
            Some(PathBuf::from("data/embedding_cache.db"))
        );
        section.cache_path = Some(PathBuf::new());
        assert_eq!(section.resolved_cache_path(dir), None);
    }
}
