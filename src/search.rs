use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use log::debug;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{Result, StoreError};
use crate::snapshot::Snapshot;

/// 以图搜图的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ScoredResult {
    pub position: u32,
    pub path: String,
    pub filename: String,
    /// 余弦相似度，范围 [-1, 1]
    pub similarity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_text: Option<String>,
}

/// 文本搜索的结果，本身没有分数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TextResult {
    pub position: u32,
    pub path: String,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_text: Option<String>,
}

/// 混合搜索的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MergedResult {
    pub position: u32,
    pub path: String,
    pub filename: String,
    /// 视觉相似度，仅命中文本时为空
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual_score: Option<f64>,
    /// 是否命中文本查询
    pub text_match: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_text: Option<String>,
}

/// 相似度降序，相同时按位置升序
fn by_score_desc(a: &(u32, f64), b: &(u32, f64)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}

/// 从相似度列中选出最高的 k 个，返回按相似度降序排列的 (位置, 相似度)
pub fn select_top_k(similarities: &[f64], k: usize) -> Vec<(u32, f64)> {
    if k == 0 {
        return vec![];
    }
    let mut scored =
        similarities.iter().enumerate().map(|(i, &s)| (i as u32, s)).collect::<Vec<_>>();
    if k < scored.len() {
        // 先部分选择再排序，避免对整列排序
        scored.select_nth_unstable_by(k - 1, by_score_desc);
        scored.truncate(k);
    }
    scored.sort_unstable_by(by_score_desc);
    scored
}

/// 以向量搜索相似图片
///
/// 先取相似度最高的 `top_k` 个结果，再按 `threshold` 过滤，
/// 因此返回数量可能少于 `top_k`，且不会用窗口外的结果补足
pub fn search_by_vector(
    snapshot: &Snapshot,
    query: &[f32],
    top_k: usize,
    threshold: f64,
) -> Result<Vec<ScoredResult>> {
    let similarities = snapshot.embeddings().similarity_column(query)?;
    let top = select_top_k(&similarities, top_k);

    let mut results = Vec::with_capacity(top.len());
    for (position, similarity) in top {
        if similarity < threshold {
            continue;
        }
        let record = snapshot.catalog().record(position)?;
        results.push(ScoredResult {
            position,
            path: record.path.clone(),
            filename: record.filename.clone(),
            similarity,
            ocr_text: record.ocr_text.clone(),
        });
    }

    debug!("找到 {} 张相似图片（阈值 {}）", results.len(), threshold);
    Ok(results)
}

/// 匹配文本的图片位置：单词倒排索引的并集，加上 OCR 全文的子串匹配
///
/// 子串匹配需要扫描所有记录，开销随图片数量线性增长
pub fn match_text(snapshot: &Snapshot, query: &str, max_results: usize) -> Vec<u32> {
    if query.trim().is_empty() {
        return vec![];
    }

    let mut matches: BTreeSet<u32> = snapshot.text_index().lookup(query);

    let phrase = query.to_lowercase();
    for record in snapshot.catalog().records() {
        if let Some(text) = &record.ocr_text {
            if text.to_lowercase().contains(&phrase) {
                matches.insert(record.position);
            }
        }
    }

    matches.into_iter().take(max_results).collect()
}

/// 按图片中的文字搜索
pub fn search_by_text(
    snapshot: &Snapshot,
    query: &str,
    max_results: usize,
) -> Result<Vec<TextResult>> {
    let positions = match_text(snapshot, query, max_results);
    let results = snapshot
        .catalog()
        .get(&positions)?
        .into_iter()
        .map(|record| TextResult {
            position: record.position,
            path: record.path,
            filename: record.filename,
            ocr_text: record.ocr_text,
        })
        .collect::<Vec<_>>();

    debug!("找到 {} 张匹配文本 '{}' 的图片", results.len(), query);
    Ok(results)
}

/// 混合搜索：合并视觉结果和文本结果
///
/// 两种结果取并集，按视觉相似度降序排列，没有视觉分数的结果视为 0 分。
/// 这只是简单的结果融合，没有针对两种信号做加权
pub fn hybrid_search(
    snapshot: &Snapshot,
    query_vector: Option<&[f32]>,
    query_text: Option<&str>,
    top_k: usize,
    threshold: f64,
    truncate: bool,
) -> Result<Vec<MergedResult>> {
    // 空白文本等同于没有文本查询
    let query_text = query_text.filter(|text| !text.trim().is_empty());
    if query_vector.is_none() && query_text.is_none() {
        return Err(StoreError::NoQuery);
    }

    let mut merged: Vec<MergedResult> = vec![];
    let mut slots: HashMap<u32, usize> = HashMap::new();

    if let Some(vector) = query_vector {
        for result in search_by_vector(snapshot, vector, top_k, threshold)? {
            slots.insert(result.position, merged.len());
            merged.push(MergedResult {
                position: result.position,
                path: result.path,
                filename: result.filename,
                visual_score: Some(result.similarity),
                text_match: false,
                ocr_text: result.ocr_text,
            });
        }
    }

    if let Some(text) = query_text {
        for result in search_by_text(snapshot, text, top_k)? {
            match slots.get(&result.position) {
                Some(&slot) => merged[slot].text_match = true,
                None => {
                    slots.insert(result.position, merged.len());
                    merged.push(MergedResult {
                        position: result.position,
                        path: result.path,
                        filename: result.filename,
                        visual_score: None,
                        text_match: true,
                        ocr_text: result.ocr_text,
                    });
                }
            }
        }
    }

    // 稳定排序，分数相同的保持原有顺序
    merged.sort_by(|a, b| b.visual_score.unwrap_or(0.0).total_cmp(&a.visual_score.unwrap_or(0.0)));
    if truncate {
        merged.truncate(top_k);
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use rstest::*;

    use super::*;
    use crate::snapshot::{IndexItem, SnapshotBuilder};
    use crate::text_index::OcrPayload;

    /// 构造与查询向量 [1, 0] 的相似度依次为 0.9, 0.8, ..., 0.0 的快照
    #[fixture]
    fn graded() -> Snapshot {
        let mut builder = SnapshotBuilder::new(2);
        for i in 0..10 {
            let s = 0.9 - 0.1 * i as f32;
            let v = vec![s, (1.0 - s * s).sqrt()];
            builder.push(IndexItem::new(format!("{i}.jpg"), v)).unwrap();
        }
        builder.finish(1).unwrap().0
    }

    fn words(text: &str, words: &[&str]) -> Option<OcrPayload> {
        Some(OcrPayload::new(text, words.iter().map(|s| s.to_string()).collect()))
    }

    #[fixture]
    fn texts() -> Snapshot {
        let mut builder = SnapshotBuilder::new(2);
        builder
            .extend([
                IndexItem::new("hello.png", vec![1.0, 0.0]).with_ocr(words("Hello", &["Hello"])),
                IndexItem::new("world.png", vec![0.0, 1.0]).with_ocr(words("world", &["world"])),
                IndexItem::new("ml.png", vec![-1.0, 0.0]).with_ocr(words(
                    "Machine Learning basics",
                    &["Machine", "basics"],
                )),
                IndexItem::new("plain.png", vec![0.0, -1.0]),
            ])
            .unwrap();
        builder.finish(1).unwrap().0
    }

    #[rstest]
    fn test_select_then_filter(graded: Snapshot) {
        let results = search_by_vector(&graded, &[1.0, 0.0], 3, 0.85).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].position, 0);
        assert!((results[0].similarity - 0.9).abs() < 1e-5);
    }

    #[rstest]
    fn test_top_k_ordering(graded: Snapshot) {
        let results = search_by_vector(&graded, &[1.0, 0.0], 4, -1.0).unwrap();
        let positions = results.iter().map(|r| r.position).collect::<Vec<_>>();
        assert_eq!(positions, vec![0, 1, 2, 3]);
        assert!(results.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    }

    #[rstest]
    #[case(0, 0)]
    #[case(3, 3)]
    #[case(100, 10)]
    fn test_top_k_bounds(graded: Snapshot, #[case] k: usize, #[case] expected: usize) {
        let results = search_by_vector(&graded, &[1.0, 0.0], k, -1.0).unwrap();
        assert_eq!(results.len(), expected);
    }

    #[rstest]
    fn test_ties_broken_by_position() {
        let similarities = [0.5, 0.9, 0.5, 0.9, 0.5];
        assert_eq!(select_top_k(&similarities, 3), vec![(1, 0.9), (3, 0.9), (0, 0.5)]);
        assert_eq!(select_top_k(&similarities, 5)[2..], [(0, 0.5), (2, 0.5), (4, 0.5)]);
    }

    #[rstest]
    fn test_text_or_semantics(texts: Snapshot) {
        let results = search_by_text(&texts, "hello world", 10).unwrap();
        let paths = results.iter().map(|r| r.path.as_str()).collect::<Vec<_>>();
        assert_eq!(paths, vec!["hello.png", "world.png"]);
    }

    #[rstest]
    fn test_text_phrase_fallback(texts: Snapshot) {
        // 单词列表里缺少 learning，但全文包含该短语
        assert_eq!(match_text(&texts, "learning", 10), vec![2]);
        assert_eq!(match_text(&texts, "machine learning", 10), vec![2]);
        assert_eq!(match_text(&texts, "LEARNING BASICS", 10), vec![2]);
    }

    #[rstest]
    fn test_text_truncated_in_position_order(texts: Snapshot) {
        assert_eq!(match_text(&texts, "hello world basics", 2), vec![0, 1]);
        assert_eq!(match_text(&texts, "   ", 10), Vec::<u32>::new());
    }

    #[rstest]
    fn test_hybrid_requires_query(texts: Snapshot) {
        assert!(matches!(
            hybrid_search(&texts, None, None, 10, 0.0, true),
            Err(StoreError::NoQuery)
        ));
        assert!(matches!(
            hybrid_search(&texts, None, Some(" \t"), 10, 0.0, true),
            Err(StoreError::NoQuery)
        ));
    }

    #[rstest]
    fn test_hybrid_blank_text_is_vector_only(texts: Snapshot) {
        let results = hybrid_search(&texts, Some(&[1.0, 0.0]), Some(""), 10, 0.5, true).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].path, "hello.png");
        assert!(!results[0].text_match);
    }

    #[rstest]
    fn test_hybrid_union(texts: Snapshot) {
        // 向量只命中 hello.png，文本只命中 world.png
        let results =
            hybrid_search(&texts, Some(&[1.0, 0.0]), Some("world"), 10, 0.5, true).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].path, "hello.png");
        assert_eq!(results[0].visual_score.map(|s| (s * 1e6).round()), Some(1e6));
        assert!(!results[0].text_match);
        assert_eq!(results[1].path, "world.png");
        assert_eq!(results[1].visual_score, None);
        assert!(results[1].text_match);
    }

    #[rstest]
    fn test_hybrid_merges_same_position(texts: Snapshot) {
        let results =
            hybrid_search(&texts, Some(&[1.0, 0.0]), Some("hello"), 10, 0.5, true).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].visual_score.is_some());
        assert!(results[0].text_match);
    }

    #[rstest]
    fn test_hybrid_negative_scores_sort_after_text_only(texts: Snapshot) {
        let results =
            hybrid_search(&texts, Some(&[-1.0, 0.0]), Some("hello"), 4, -1.0, true).unwrap();
        // ml.png (1.0) 最前；hello.png 同时命中文本，分数为 -1.0，排在最后
        assert_eq!(results[0].path, "ml.png");
        assert_eq!(results.last().map(|r| r.path.as_str()), Some("hello.png"));
        assert!(results.last().is_some_and(|r| r.text_match));

        let truncated =
            hybrid_search(&texts, Some(&[-1.0, 0.0]), Some("hello"), 2, -1.0, true).unwrap();
        assert_eq!(truncated.len(), 2);
    }
}
