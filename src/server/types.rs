use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::imdb::Statistics;
use crate::indexer::IndexingStatus;
use crate::search::{MergedResult, ScoredResult, TextResult};
use crate::snapshot::IndexItem;

/// 服务状态
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    pub indexing: IndexingStatus,
    pub statistics: Statistics,
}

/// 扫描目录并重建索引的参数
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct IndexRequest {
    /// 图片目录，不填则使用服务启动时指定的目录
    #[serde(default)]
    pub directories: Option<Vec<String>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IndexResponse {
    pub message: String,
    /// 扫描到的图片数量
    pub total: usize,
}

/// 使用调用方提供的数据重建索引
#[derive(Debug, Deserialize, ToSchema)]
pub struct RebuildRequest {
    pub items: Vec<IndexItem>,
}

/// 以向量搜索
#[derive(Debug, Deserialize, ToSchema)]
pub struct VectorSearchRequest {
    pub vector: Vec<f32>,
    /// 返回的结果数量
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VectorSearchResponse {
    /// 搜索耗时，单位为毫秒
    pub time: u64,
    pub results: Vec<ScoredResult>,
}

/// 按文字搜索
#[derive(Debug, Deserialize, ToSchema)]
pub struct TextSearchRequest {
    pub query: String,
    pub max_results: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TextSearchResponse {
    pub time: u64,
    pub results: Vec<TextResult>,
}

/// 混合搜索，向量和文本至少提供一个
#[derive(Debug, Deserialize, ToSchema)]
pub struct HybridSearchRequest {
    pub vector: Option<Vec<f32>>,
    pub query: Option<String>,
    /// 合并后的结果数量，不填则不截断
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HybridSearchResponse {
    pub time: u64,
    pub results: Vec<MergedResult>,
}
