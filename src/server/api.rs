use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum_auth::AuthBearer;
use log::{error, info};
use tokio::task::{block_in_place, spawn_blocking};

use super::error::{AppError, Result};
use super::state::AppState;
use super::types::*;
use crate::error::StoreError;
use crate::imdb::RebuildStats;
use crate::scan::scan_directories;

fn check_token(state: &AppState, token: &str) -> Result<()> {
    if token != state.token {
        return Err(AppError::unauthorized());
    }
    Ok(())
}

/// 获取索引状态和统计信息
#[utoipa::path(
    get,
    path = "/status",
    responses(
        (status = 200, body = StatusResponse),
    )
)]
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse { indexing: state.indexer.status(), statistics: state.db.statistics() })
}

/// 扫描目录并在后台重建索引
#[utoipa::path(
    post,
    path = "/index",
    request_body = IndexRequest,
    responses(
        (status = 200, body = IndexResponse),
        (status = 409, description = "已有索引任务正在进行"),
    )
)]
pub async fn index_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
    data: Option<Json<IndexRequest>>,
) -> Result<Json<IndexResponse>> {
    check_token(&state, &token)?;
    if state.db.is_rebuilding() {
        return Err(StoreError::RebuildInProgress.into());
    }

    let dirs = match data.and_then(|Json(data)| data.directories) {
        Some(dirs) => dirs.into_iter().map(PathBuf::from).collect(),
        None => state.image_dirs.clone(),
    };
    if dirs.is_empty() {
        return Err(AppError::new(StatusCode::BAD_REQUEST, "没有指定图片目录"));
    }

    let paths = block_in_place(|| scan_directories(&dirs, &state.scan))?;
    if paths.is_empty() {
        return Err(AppError::new(StatusCode::BAD_REQUEST, "没有找到图片"));
    }
    let total = paths.len();

    info!("开始索引 {} 张图片", total);
    let state = state.clone();
    spawn_blocking(move || {
        if let Err(e) = state.indexer.run(&state.db, &paths) {
            error!("索引失败: {:#}", e);
        }
    });

    Ok(Json(IndexResponse { message: "开始索引".to_owned(), total }))
}

/// 使用调用方提供的向量和文字重建索引
#[utoipa::path(
    post,
    path = "/rebuild",
    request_body = RebuildRequest,
    responses(
        (status = 200, body = RebuildStats),
        (status = 409, description = "已有索引任务正在进行"),
    )
)]
pub async fn rebuild_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
    Json(data): Json<RebuildRequest>,
) -> Result<Json<RebuildStats>> {
    check_token(&state, &token)?;
    let stats = block_in_place(|| state.db.rebuild(data.items))?;
    Ok(Json(stats))
}

/// 以向量搜索相似图片
#[utoipa::path(
    post,
    path = "/search/vector",
    request_body = VectorSearchRequest,
    responses(
        (status = 200, body = VectorSearchResponse),
    )
)]
pub async fn search_vector_handler(
    State(state): State<Arc<AppState>>,
    Json(data): Json<VectorSearchRequest>,
) -> Result<Json<VectorSearchResponse>> {
    let start = Instant::now();
    let top_k = data.top_k.unwrap_or(state.db.search_options().count);
    let results = block_in_place(|| state.db.search_by_vector(&data.vector, top_k))?;
    Ok(Json(VectorSearchResponse { time: start.elapsed().as_millis() as u64, results }))
}

/// 按图片中的文字搜索
#[utoipa::path(
    post,
    path = "/search/text",
    request_body = TextSearchRequest,
    responses(
        (status = 200, body = TextSearchResponse),
        (status = 400, description = "查询为空"),
    )
)]
pub async fn search_text_handler(
    State(state): State<Arc<AppState>>,
    Json(data): Json<TextSearchRequest>,
) -> Result<Json<TextSearchResponse>> {
    if data.query.trim().is_empty() {
        return Err(AppError::new(StatusCode::BAD_REQUEST, "查询不能为空"));
    }
    let start = Instant::now();
    let max_results = data.max_results.unwrap_or(state.db.search_options().count);
    let results = block_in_place(|| state.db.search_by_text(&data.query, max_results))?;
    Ok(Json(TextSearchResponse { time: start.elapsed().as_millis() as u64, results }))
}

/// 混合搜索，结果为向量搜索和文字搜索的并集
#[utoipa::path(
    post,
    path = "/search/hybrid",
    request_body = HybridSearchRequest,
    responses(
        (status = 200, body = HybridSearchResponse),
    )
)]
pub async fn search_hybrid_handler(
    State(state): State<Arc<AppState>>,
    Json(data): Json<HybridSearchRequest>,
) -> Result<Json<HybridSearchResponse>> {
    let start = Instant::now();
    let results = block_in_place(|| {
        state.db.hybrid_search(data.vector.as_deref(), data.query.as_deref(), data.top_k)
    })?;
    Ok(Json(HybridSearchResponse { time: start.elapsed().as_millis() as u64, results }))
}
