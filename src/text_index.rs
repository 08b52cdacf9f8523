use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// OCR 引擎的识别结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OcrPayload {
    /// 完整文本
    #[serde(default)]
    pub text: String,
    /// 单词列表
    #[serde(default)]
    pub words: Vec<String>,
    /// 每个识别区域的置信度
    #[serde(default)]
    pub confidences: Vec<f64>,
}

impl OcrPayload {
    pub fn new(text: impl Into<String>, words: Vec<String>) -> Self {
        Self { text: text.into(), words, confidences: vec![] }
    }
}

/// 归一化索引词：去除首尾空白并转为小写
pub fn normalize_term(word: &str) -> String {
    word.trim().to_lowercase()
}

/// OCR 单词倒排索引，单词 => 升序且不重复的位置列表
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextIndex {
    terms: BTreeMap<String, Vec<u32>>,
}

impl TextIndex {
    /// 根据每张图片的 OCR 结果构建索引，第 i 项对应位置 i
    pub fn build<'a, I>(payloads: I) -> Self
    where
        I: IntoIterator<Item = Option<&'a OcrPayload>>,
    {
        let mut builder = TextIndexBuilder::default();
        for (position, payload) in payloads.into_iter().enumerate() {
            if let Some(payload) = payload {
                builder.add(position as u32, &payload.words);
            }
        }
        builder.finish()
    }

    /// 按单词查询，查询串按空白切分后取所有单词结果的并集
    pub fn lookup(&self, query: &str) -> BTreeSet<u32> {
        let mut result = BTreeSet::new();
        for token in query.split_whitespace() {
            if let Some(postings) = self.terms.get(&token.to_lowercase()) {
                result.extend(postings.iter().copied());
            }
        }
        result
    }

    pub fn postings(&self, term: &str) -> Option<&[u32]> {
        self.terms.get(term).map(|v| v.as_slice())
    }

    pub fn terms(&self) -> impl Iterator<Item = (&str, &[u32])> {
        self.terms.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn unique_terms(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// 所有倒排列表中最大的位置
    pub fn max_position(&self) -> Option<u32> {
        self.terms.values().filter_map(|v| v.last().copied()).max()
    }

    /// 检查倒排列表是否严格升序
    pub fn is_sorted(&self) -> bool {
        self.terms.values().all(|v| v.windows(2).all(|w| w[0] < w[1]))
    }
}

/// 倒排索引构建器
#[derive(Debug, Default)]
pub struct TextIndexBuilder {
    terms: BTreeMap<String, BTreeSet<u32>>,
}

impl TextIndexBuilder {
    pub fn add<S: AsRef<str>>(&mut self, position: u32, words: &[S]) {
        for word in words {
            let term = normalize_term(word.as_ref());
            if term.is_empty() {
                continue;
            }
            self.terms.entry(term).or_default().insert(position);
        }
    }

    pub fn finish(self) -> TextIndex {
        let terms = self.terms.into_iter().map(|(k, v)| (k, v.into_iter().collect())).collect();
        TextIndex { terms }
    }
}
