//! 分词：供离线 hashing 嵌入使用
//!
//! 含 CJK 字符时用 jieba-rs 搜索引擎模式切分，纯英文按空白切分；统一转小写并去掉首尾标点。

use std::sync::OnceLock;

use jieba_rs::Jieba;

/// 全局 Jieba 实例（延迟初始化）
static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn get_jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

/// 判断字符是否为 CJK（中日韩）字符
fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}' |   // CJK Unified Ideographs
        '\u{3400}'..='\u{4DBF}' |   // CJK Unified Ideographs Extension A
        '\u{F900}'..='\u{FAFF}' |   // CJK Compatibility Ideographs
        '\u{3040}'..='\u{309F}' |   // Hiragana
        '\u{30A0}'..='\u{30FF}'     // Katakana
    )
}

/// 判断文本是否包含 CJK 字符
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk)
}

fn normalize(token: &str) -> Option<String> {
    let token = token
        .trim_matches(|c: char| !c.is_alphanumeric() && !is_cjk(c))
        .to_lowercase();
    let keep = match token.chars().next() {
        Some(first) if is_cjk(first) => true,
        Some(_) => token.chars().count() > 1,
        None => false,
    };
    keep.then_some(token)
}

/// 切分为小写词序列（保留重复，词频由调用方决定是否使用）
pub fn tokenize(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    if contains_cjk(text) {
        get_jieba()
            .cut_for_search(text, true)
            .into_iter()
            .filter_map(normalize)
            .collect()
    } else {
        text.split_whitespace().filter_map(normalize).collect()
    }
}
