mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use self::state::*;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::status_handler,
        api::index_handler,
        api::rebuild_handler,
        api::search_vector_handler,
        api::search_text_handler,
        api::search_hybrid_handler,
    ),
    components(schemas(
        types::StatusResponse,
        types::IndexRequest,
        types::IndexResponse,
        types::RebuildRequest,
        types::VectorSearchRequest,
        types::VectorSearchResponse,
        types::TextSearchRequest,
        types::TextSearchResponse,
        types::HybridSearchRequest,
        types::HybridSearchResponse,
    ))
)]
pub struct ApiDoc;

/// 构建API服务器
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(api::status_handler))
        .route("/index", post(api::index_handler))
        .route("/rebuild", post(api::rebuild_handler))
        .route("/search/vector", post(api::search_vector_handler))
        .route("/search/text", post(api::search_text_handler))
        .route("/search/hybrid", post(api::search_hybrid_handler))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::disable())
        // 请求体限制：10M
        .layer(RequestBodyLimitLayer::new(1024 * 1024 * 10))
        .with_state(state)
}
