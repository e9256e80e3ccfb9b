//! 查询台账：记录已发出的查询，防止重复检索
//!
//! 查询身份为精确字符串相等，不做任何归一化。发出顺序由会话自己记录。

use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct QueryLedger {
    issued: HashSet<String>,
}

impl QueryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 未出现过则记录并返回 true；已存在返回 false（调用方应跳过该查询）
    pub fn register(&mut self, query: &str) -> bool {
        self.issued.insert(query.to_string())
    }

    pub fn contains(&self, query: &str) -> bool {
        self.issued.contains(query)
    }

    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }
}
