//! 递归文本切分：入库前把长文档切成不超过 chunk_size 个字符的片段
//!
//! 按分隔符优先级逐级切分；片段仍超长时换下一级分隔符递归，分隔符用尽（或遇到空分隔符）时按字符硬切。
//! 长度一律按字符计，UTF-8 安全。

/// 默认分隔符优先级（从高到低）
pub fn default_separators() -> Vec<String> {
    ["\n\n", "\n", "。", "！", "？", ";", ":", "，", ",", " ", ""]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// 递归切分器
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    separators: Vec<String>,
}

impl Default for RecursiveSplitter {
    fn default() -> Self {
        Self::new(800)
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

impl RecursiveSplitter {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            separators: default_separators(),
        }
    }

    pub fn with_separators(mut self, separators: Vec<String>) -> Self {
        self.separators = separators;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// 切分文本；空白输入返回空，未超长时返回去除首尾空白的整段
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        if char_len(text) <= self.chunk_size {
            return vec![text.trim().to_string()];
        }
        self.split_recursive(text, &self.separators)
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        match separators.split_first() {
            Some((sep, rest)) if !sep.is_empty() => {
                let pieces = split_keep_separator(text, sep);
                self.merge_pieces(pieces, rest)
            }
            _ => self.hard_split(text),
        }
    }

    /// 贪心合并相邻片段；单个片段超长时用剩余分隔符递归
    fn merge_pieces(&self, pieces: Vec<&str>, remaining: &[String]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current = String::new();

        for piece in pieces {
            if piece.trim().is_empty() {
                continue;
            }
            if char_len(piece.trim()) > self.chunk_size {
                flush(&mut chunks, &mut current);
                chunks.extend(self.split_recursive(piece, remaining));
            } else if char_len(&current) + char_len(piece) <= self.chunk_size {
                current.push_str(piece);
            } else {
                flush(&mut chunks, &mut current);
                current.push_str(piece);
            }
        }
        flush(&mut chunks, &mut current);
        chunks
    }

    fn hard_split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        chars
            .chunks(self.chunk_size)
            .map(|c| c.iter().collect::<String>().trim().to_string())
            .filter(|c| !c.is_empty())
            .collect()
    }
}

fn flush(chunks: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
    current.clear();
}

/// 按分隔符切分，分隔符保留在前一段末尾
fn split_keep_separator<'a>(text: &'a str, sep: &str) -> Vec<&'a str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(sep) {
        let end = idx + sep.len();
        pieces.push(&text[start..end]);
        start = end;
    }
    pieces.push(&text[start..]);
    pieces
}
