use std::path::PathBuf;
use std::sync::Arc;

use crate::IMDB;
use crate::cli::server::ServerCommand;
use crate::config::ScanOptions;
use crate::indexer::Indexer;

/// 应用状态
pub struct AppState {
    /// 图片检索库
    pub db: IMDB,
    /// 索引流水线
    pub indexer: Indexer,
    /// 扫描配置选项
    pub scan: ScanOptions,
    /// 默认扫描的图片目录
    pub image_dirs: Vec<PathBuf>,
    /// 鉴权 token
    pub token: String,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(db: IMDB, indexer: Indexer, opts: ServerCommand) -> Arc<Self> {
        Arc::new(AppState {
            db,
            indexer,
            scan: opts.scan,
            image_dirs: opts.image_dirs,
            token: opts.token,
        })
    }
}
