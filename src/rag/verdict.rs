//! 反思结论：解析生成服务返回的结构化判断，并统一为「是否继续 + 补充线索」
//!
//! 两种结论格式：
//! - completeness：`{"is_complete": bool, "missing_info": str, "search_queries": [str]}`
//! - quality_score：`{"quality_score": 1-10, "is_sufficient": bool, "is_factual": bool,
//!   "needs_more_info": bool, "refinement_keywords": [str], "analysis": str}`
//!
//! 使用哪种格式由配置决定，不从回复内容推断。解析永不失败：无法解析时得到 `Unparsed`，
//! 其归一结果为「继续，但没有线索」，会话随后因无补充查询而自然结束。

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::rag::RefinementStrategy;

/// 从回复文本中提取结构化载荷失败的原因
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    #[error("no structured payload in response")]
    NoPayload,

    #[error("unbalanced braces starting at byte {0}")]
    Unbalanced(usize),

    #[error("no balanced block is a valid JSON object: {0}")]
    InvalidJson(String),
}

/// 找到每个 `{` 对应的配平块（跳过字符串字面量内的括号），返回第一个能解析为 JSON 对象的块
///
/// 代码围栏、前后说明文字都会被自然跳过。某个 `{` 找不到配平位置时，其后的括号都嵌套在它内部，也不会配平，扫描到此为止。
pub fn extract_json_object(text: &str) -> Result<Map<String, Value>, ExtractError> {
    let mut last_error = None;
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        match balanced_end(text, start) {
            Some(end) => match serde_json::from_str::<Value>(&text[start..end]) {
                Ok(Value::Object(map)) => return Ok(map),
                Ok(_) => {}
                Err(e) => last_error = Some(ExtractError::InvalidJson(e.to_string())),
            },
            None => {
                last_error.get_or_insert(ExtractError::Unbalanced(start));
                break;
            }
        }
        search_from = start + 1;
    }

    Err(last_error.unwrap_or(ExtractError::NoPayload))
}

/// 返回与 start 处 `{` 配平的 `}` 之后的字节位置
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// 生成服务给出的反思结论
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReflectionVerdict {
    Completeness {
        complete: bool,
        missing_info: Option<String>,
        refinement_queries: Vec<String>,
    },
    QualityScore {
        quality_score: u8,
        sufficient: bool,
        factual: bool,
        needs_more_info: bool,
        refinement_keywords: Vec<String>,
        analysis: String,
    },
    /// 载荷缺失或不合法；diagnostic 记录原因与原始回复片段
    Unparsed { diagnostic: String },
}

impl ReflectionVerdict {
    pub fn is_unparsed(&self) -> bool {
        matches!(self, ReflectionVerdict::Unparsed { .. })
    }
}

/// 归一后的决策：编排器只看这两个字段
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub should_continue: bool,
    pub refinement_hints: Vec<String>,
}

impl Decision {
    /// 解析失败时的安全默认值
    pub fn fallback() -> Self {
        Self {
            should_continue: true,
            refinement_hints: Vec::new(),
        }
    }
}

/// 反思格式（由配置选定）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflectionSchema {
    Completeness,
    /// 分数 ≥ threshold 且 sufficient 时停止
    QualityScore { threshold: u8 },
}

/// 原始回复片段在诊断信息中保留的最大字符数
const DIAGNOSTIC_PREVIEW_CHARS: usize = 200;

impl ReflectionSchema {
    /// 该格式自然对应的补充查询策略
    pub fn natural_strategy(&self) -> RefinementStrategy {
        match self {
            ReflectionSchema::Completeness => RefinementStrategy::FullQueries,
            ReflectionSchema::QualityScore { .. } => RefinementStrategy::CombinedKeywords,
        }
    }

    /// 解析回复文本；任何失败都落到 Unparsed
    pub fn parse(&self, raw: &str) -> ReflectionVerdict {
        let parsed = extract_json_object(raw)
            .map_err(|e| e.to_string())
            .and_then(|map| match self {
                ReflectionSchema::Completeness => parse_completeness(&map),
                ReflectionSchema::QualityScore { .. } => parse_quality(&map),
            });

        match parsed {
            Ok(verdict) => verdict,
            Err(reason) => {
                let preview: String = raw.trim().chars().take(DIAGNOSTIC_PREVIEW_CHARS).collect();
                ReflectionVerdict::Unparsed {
                    diagnostic: format!("{reason}; raw response: {preview}"),
                }
            }
        }
    }

    /// 归一为 {should_continue, refinement_hints}
    pub fn normalize(&self, verdict: &ReflectionVerdict) -> Decision {
        match verdict {
            ReflectionVerdict::Completeness {
                complete,
                refinement_queries,
                ..
            } => Decision {
                should_continue: !complete,
                refinement_hints: refinement_queries.clone(),
            },
            ReflectionVerdict::QualityScore {
                quality_score,
                sufficient,
                refinement_keywords,
                ..
            } => {
                let threshold = match self {
                    ReflectionSchema::QualityScore { threshold } => *threshold,
                    ReflectionSchema::Completeness => u8::MAX,
                };
                Decision {
                    should_continue: !(*quality_score >= threshold && *sufficient),
                    refinement_hints: refinement_keywords.clone(),
                }
            }
            ReflectionVerdict::Unparsed { .. } => Decision::fallback(),
        }
    }
}

fn field<'a>(map: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| map.get(*name))
}

fn required_bool(map: &Map<String, Value>, names: &[&str]) -> Result<bool, String> {
    match field(map, names) {
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(format!("{} must be boolean, got {other}", names[0])),
        None => Err(format!("missing required field {}", names[0])),
    }
}

fn optional_bool(map: &Map<String, Value>, names: &[&str], default: bool) -> bool {
    field(map, names).and_then(Value::as_bool).unwrap_or(default)
}

fn optional_string(map: &Map<String, Value>, names: &[&str]) -> Option<String> {
    field(map, names).and_then(Value::as_str).map(str::to_string)
}

/// 不是字符串数组时视为空列表，而不是整体解析失败
fn string_list(map: &Map<String, Value>, names: &[&str]) -> Vec<String> {
    let Some(Value::Array(items)) = field(map, names) else {
        return Vec::new();
    };
    items
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()
        .unwrap_or_default()
}

fn parse_completeness(map: &Map<String, Value>) -> Result<ReflectionVerdict, String> {
    Ok(ReflectionVerdict::Completeness {
        complete: required_bool(map, &["is_complete", "complete"])?,
        missing_info: optional_string(map, &["missing_info", "missingInfo"]),
        refinement_queries: string_list(
            map,
            &["search_queries", "refinement_queries", "refinementQueries"],
        ),
    })
}

fn parse_quality(map: &Map<String, Value>) -> Result<ReflectionVerdict, String> {
    let score = match field(map, &["quality_score", "qualityScore"]) {
        Some(v) => v
            .as_u64()
            .or_else(|| v.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
            .ok_or_else(|| format!("quality_score must be an integer, got {v}"))?,
        None => return Err("missing required field quality_score".to_string()),
    };
    if !(1..=10).contains(&score) {
        return Err(format!("quality_score {score} outside 1..=10"));
    }

    Ok(ReflectionVerdict::QualityScore {
        quality_score: score as u8,
        sufficient: required_bool(map, &["is_sufficient", "sufficient"])?,
        factual: optional_bool(map, &["is_factual", "factual"], true),
        needs_more_info: optional_bool(map, &["needs_more_info", "needsMoreInfo"], false),
        refinement_keywords: string_list(
            map,
            &["refinement_keywords", "refinementKeywords", "keywords"],
        ),
        analysis: optional_string(map, &["analysis"]).unwrap_or_default(),
    })
}
