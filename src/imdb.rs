use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, TryLockError};
use std::time::Instant;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::{ConfDir, DEFAULT_DIMENSION, SearchOptions};
use crate::error::{Result, StoreError};
use crate::search::{self, MergedResult, ScoredResult, TextResult};
use crate::snapshot::{IndexItem, Snapshot, SnapshotBuilder};
use crate::utils::bytes_to_mb;
use crate::{metrics, persist};

/// 重建索引的统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RebuildStats {
    /// 候选图片数量
    pub candidates: usize,
    /// 成功加入索引的图片数量
    pub indexed: usize,
    /// 特征提取失败的图片数量
    pub feature_failures: usize,
    /// 向量模长为 0 被跳过的图片数量
    pub zero_norm: usize,
    /// OCR 失败的图片数量，这些图片仍然会被索引，只是没有文本
    pub ocr_failures: usize,
    /// 倒排索引中的单词数量
    pub unique_terms: usize,
    /// 新快照的代数
    pub generation: u64,
}

/// 索引统计信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Statistics {
    pub image_count: usize,
    pub embedding_count: usize,
    pub unique_terms: usize,
    pub total_bytes: u64,
    pub total_size_mb: f64,
    pub is_indexed: bool,
    pub generation: u64,
}

pub struct IMDBBuilder {
    conf_dir: Option<ConfDir>,
    dimension: usize,
    search: SearchOptions,
}

impl IMDBBuilder {
    /// 使用指定目录持久化索引
    pub fn new(conf_dir: ConfDir) -> Self {
        Self { conf_dir: Some(conf_dir), dimension: DEFAULT_DIMENSION, search: Default::default() }
    }

    /// 不持久化的纯内存索引
    pub fn in_memory() -> Self {
        Self { conf_dir: None, dimension: DEFAULT_DIMENSION, search: Default::default() }
    }

    pub fn dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn search(mut self, search: SearchOptions) -> Self {
        self.search = search;
        self
    }

    /// 打开索引，如果磁盘上有可用的快照则加载并发布
    ///
    /// 快照缺失或损坏时不会返回错误，而是以未索引状态启动
    pub fn open(self) -> IMDB {
        let db = IMDB {
            conf_dir: self.conf_dir,
            dimension: self.dimension,
            search: self.search,
            current: RwLock::new(None),
            rebuild: Mutex::new(()),
            rebuilding: AtomicBool::new(false),
        };
        if let Some(conf_dir) = &db.conf_dir {
            match persist::load(conf_dir) {
                Ok(snapshot) if snapshot.dimension() != db.dimension => {
                    error!(
                        "索引维度 {} 与配置维度 {} 不一致，忽略已有索引",
                        snapshot.dimension(),
                        db.dimension
                    );
                }
                Ok(snapshot) => db.publish(snapshot),
                Err(StoreError::MissingEmbeddings(path)) => {
                    info!("未找到已有索引: {}", path.display());
                }
                Err(e) => error!("加载索引失败，需要重新构建: {}", e),
            }
        }
        db
    }
}

/// 图片检索库
///
/// 查询总是读取当前发布的快照；重建在旁路构建新快照，保存后整体替换。
/// 同一时间只允许一个重建任务，查询不会被重建阻塞
pub struct IMDB {
    conf_dir: Option<ConfDir>,
    dimension: usize,
    search: SearchOptions,
    current: RwLock<Option<Arc<Snapshot>>>,
    rebuild: Mutex<()>,
    /// 只由 [`RebuildGuard`] 维护，查询状态时不触碰重建锁
    rebuilding: AtomicBool,
}

impl IMDB {
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn search_options(&self) -> &SearchOptions {
        &self.search
    }

    pub fn conf_dir(&self) -> Option<&ConfDir> {
        self.conf_dir.as_ref()
    }

    /// 获取当前发布的快照
    pub fn snapshot(&self) -> Result<Arc<Snapshot>> {
        let current = self.current.read().expect("failed to acquire rw lock");
        current.clone().ok_or(StoreError::NotIndexed)
    }

    pub fn is_indexed(&self) -> bool {
        self.current.read().expect("failed to acquire rw lock").is_some()
    }

    pub fn is_rebuilding(&self) -> bool {
        self.rebuilding.load(Ordering::Acquire)
    }

    /// 开始重建，已有重建任务时立即返回 [`StoreError::RebuildInProgress`]
    ///
    /// 返回的 guard 被丢弃时重建结束
    pub fn try_begin_rebuild(&self) -> Result<RebuildGuard<'_>> {
        let lock = match self.rebuild.try_lock() {
            Ok(lock) => lock,
            // 上一次重建中途 panic 不影响已发布的快照
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(StoreError::RebuildInProgress),
        };
        self.rebuilding.store(true, Ordering::Release);
        Ok(RebuildGuard { db: self, _lock: lock })
    }

    /// 使用给定的图片重建索引
    pub fn rebuild(&self, items: Vec<IndexItem>) -> Result<RebuildStats> {
        self.try_begin_rebuild()?.commit(items)
    }

    /// 重新从磁盘加载索引
    pub fn reload(&self) -> Result<()> {
        let conf_dir = self.conf_dir.as_ref().ok_or(StoreError::NotIndexed)?;
        let _guard = self.try_begin_rebuild()?;
        let snapshot = persist::load(conf_dir)?;
        if snapshot.dimension() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: snapshot.dimension(),
            });
        }
        self.publish(snapshot);
        Ok(())
    }

    fn publish(&self, snapshot: Snapshot) {
        let snapshot = Arc::new(snapshot);
        metrics::set_indexed_images(snapshot.len());
        info!("发布索引快照 #{}: {} 张图片", snapshot.generation(), snapshot.len());
        *self.current.write().expect("failed to acquire rw lock") = Some(snapshot);
    }

    /// 以向量搜索相似图片，使用配置中的相似度阈值
    pub fn search_by_vector(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredResult>> {
        self.search_by_vector_with(vector, top_k, self.search.threshold)
    }

    pub fn search_by_vector_with(
        &self,
        vector: &[f32],
        top_k: usize,
        threshold: f64,
    ) -> Result<Vec<ScoredResult>> {
        let snapshot = self.snapshot()?;
        let start = Instant::now();
        let result = search::search_by_vector(&snapshot, vector, top_k, threshold);
        metrics::observe_search("visual", start.elapsed().as_secs_f64());
        result
    }

    /// 按图片中的文字搜索
    pub fn search_by_text(&self, query: &str, max_results: usize) -> Result<Vec<TextResult>> {
        let snapshot = self.snapshot()?;
        let start = Instant::now();
        let result = search::search_by_text(&snapshot, query, max_results);
        metrics::observe_search("text", start.elapsed().as_secs_f64());
        result
    }

    /// 混合搜索，`top_k` 为空时使用默认数量且不截断合并后的结果
    pub fn hybrid_search(
        &self,
        vector: Option<&[f32]>,
        text: Option<&str>,
        top_k: Option<usize>,
    ) -> Result<Vec<MergedResult>> {
        let text = text.filter(|text| !text.trim().is_empty());
        if vector.is_none() && text.is_none() {
            return Err(StoreError::NoQuery);
        }
        let snapshot = self.snapshot()?;
        let start = Instant::now();
        let result = search::hybrid_search(
            &snapshot,
            vector,
            text,
            top_k.unwrap_or(self.search.count),
            self.search.threshold,
            top_k.is_some(),
        );
        metrics::observe_search("hybrid", start.elapsed().as_secs_f64());
        result
    }

    pub fn statistics(&self) -> Statistics {
        let Ok(snapshot) = self.snapshot() else {
            return Statistics::default();
        };
        let total_bytes = snapshot.catalog().total_bytes();
        Statistics {
            image_count: snapshot.catalog().len(),
            embedding_count: snapshot.embeddings().len(),
            unique_terms: snapshot.text_index().unique_terms(),
            total_bytes,
            total_size_mb: bytes_to_mb(total_bytes),
            is_indexed: true,
            generation: snapshot.generation(),
        }
    }
}

/// 持有重建锁，同一时间只存在一个
pub struct RebuildGuard<'a> {
    db: &'a IMDB,
    _lock: MutexGuard<'a, ()>,
}

impl RebuildGuard<'_> {
    /// 构建新快照，保存到磁盘后发布
    ///
    /// 任意一步失败时都不会发布，之前的快照保持可用
    pub fn commit(self, items: Vec<IndexItem>) -> Result<RebuildStats> {
        let start = Instant::now();
        let db = self.db;
        let generation = db
            .current
            .read()
            .expect("failed to acquire rw lock")
            .as_ref()
            .map_or(0, |s| s.generation())
            + 1;
        let candidates = items.len();
        info!("开始构建索引快照 #{}: {} 张图片", generation, candidates);

        let mut builder = SnapshotBuilder::new(db.dimension);
        if let Err(e) = builder.extend(items) {
            warn!("构建索引失败: {}", e);
            return Err(e);
        }
        let (snapshot, build_stats) = builder.finish(generation)?;

        if let Some(conf_dir) = &db.conf_dir {
            persist::save(conf_dir, &snapshot)?;
        }

        let stats = RebuildStats {
            candidates,
            indexed: build_stats.indexed,
            zero_norm: build_stats.zero_norm,
            unique_terms: snapshot.text_index().unique_terms(),
            generation,
            ..Default::default()
        };
        db.publish(snapshot);

        let elapsed = start.elapsed().as_secs_f64();
        metrics::observe_rebuild(elapsed);
        debug!("构建索引耗时 {:.2}s", elapsed);
        Ok(stats)
    }
}

impl Drop for RebuildGuard<'_> {
    fn drop(&mut self) {
        self.db.rebuilding.store(false, Ordering::Release);
    }
}
