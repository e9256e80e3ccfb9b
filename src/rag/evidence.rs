//! 证据片段与证据集合
//!
//! EvidenceSet 跨轮次累积检索到的片段，按正文去重（不看来源与分数），保持首次出现顺序，不做淘汰。

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// 元数据标量值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Float(x) => write!(f, "{x}"),
            Scalar::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Str(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Str(s)
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Scalar::Int(i)
    }
}

impl From<f64> for Scalar {
    fn from(x: f64) -> Self {
        Scalar::Float(x)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

/// 检索返回的一个证据片段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidencePassage {
    pub text: String,
    pub score: f32,
    pub source_id: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Scalar>,
}

impl EvidencePassage {
    pub fn new(text: impl Into<String>, score: f32, source_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            score,
            source_id: source_id.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// 会话内累积的证据（按正文去重，插入有序）
#[derive(Debug, Clone, Default)]
pub struct EvidenceSet {
    passages: Vec<EvidencePassage>,
    seen: HashSet<String>,
}

impl EvidenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 合并新片段，返回其中正文此前未出现过的部分（同时按接收顺序追加到集合）
    ///
    /// 同一批内重复的正文只保留第一次出现。
    pub fn merge(&mut self, incoming: Vec<EvidencePassage>) -> Vec<EvidencePassage> {
        let mut delta = Vec::new();
        for passage in incoming {
            if self.seen.insert(passage.text.clone()) {
                self.passages.push(passage.clone());
                delta.push(passage);
            }
        }
        delta
    }

    /// 全部证据（用作生成上下文）
    pub fn all(&self) -> &[EvidencePassage] {
        &self.passages
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn into_passages(self) -> Vec<EvidencePassage> {
        self.passages
    }
}
