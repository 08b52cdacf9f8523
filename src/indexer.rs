use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Result, bail};
use indicatif::ProgressBar;
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::extract::{FeatureExtractor, OcrEngine};
use crate::imdb::{IMDB, RebuildStats};
use crate::snapshot::IndexItem;
use crate::utils::pb_style;

/// 每批提取的图片数量
const BATCH_SIZE: usize = 64;

/// 当前的索引进度
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct IndexingStatus {
    pub is_indexing: bool,
    pub progress: usize,
    pub total: usize,
    pub message: String,
}

/// 索引流水线：提取特征和文字，然后重建索引
pub struct Indexer {
    features: Box<dyn FeatureExtractor>,
    ocr: Box<dyn OcrEngine>,
    status: Mutex<IndexingStatus>,
    show_progress: bool,
}

impl Indexer {
    pub fn new(features: impl FeatureExtractor + 'static, ocr: impl OcrEngine + 'static) -> Self {
        Self {
            features: Box::new(features),
            ocr: Box::new(ocr),
            status: Mutex::new(IndexingStatus::default()),
            show_progress: true,
        }
    }

    /// 是否在终端显示进度条
    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn status(&self) -> IndexingStatus {
        self.status.lock().expect("failed to acquire lock").clone()
    }

    fn update_status(&self, f: impl FnOnce(&mut IndexingStatus)) {
        f(&mut self.status.lock().expect("failed to acquire lock"));
    }

    /// 为给定的图片重建索引
    ///
    /// 已有重建任务时立即失败；提取失败的图片会被跳过并计数
    pub fn run(&self, db: &IMDB, paths: &[PathBuf]) -> Result<RebuildStats> {
        let guard = db.try_begin_rebuild()?;
        if paths.is_empty() {
            bail!("没有找到图片");
        }

        self.update_status(|s| {
            *s = IndexingStatus {
                is_indexing: true,
                progress: 0,
                total: paths.len(),
                message: "正在提取特征".to_owned(),
            }
        });

        let result = self.extract_all(paths).and_then(|(items, stats)| {
            self.update_status(|s| s.message = "正在构建索引".to_owned());
            let commit = guard.commit(items)?;
            Ok(RebuildStats {
                candidates: paths.len(),
                feature_failures: stats.feature_failures,
                ocr_failures: stats.ocr_failures,
                ..commit
            })
        });

        self.update_status(|s| {
            s.is_indexing = false;
            s.message = match &result {
                Ok(stats) => format!("索引完成: {} 张图片", stats.indexed),
                Err(e) => format!("索引失败: {}", e),
            };
        });
        if let Ok(stats) = &result {
            info!(
                "索引完成: {}/{} 张图片, 特征失败 {}, 零向量 {}, OCR 失败 {}",
                stats.indexed,
                stats.candidates,
                stats.feature_failures,
                stats.zero_norm,
                stats.ocr_failures
            );
        }
        result
    }

    fn extract_all(&self, paths: &[PathBuf]) -> Result<(Vec<IndexItem>, RebuildStats)> {
        let pb = if self.show_progress {
            ProgressBar::new(paths.len() as u64).with_style(pb_style())
        } else {
            ProgressBar::hidden()
        };
        let mut stats = RebuildStats::default();
        let mut items = Vec::with_capacity(paths.len());

        for chunk in paths.chunks(BATCH_SIZE) {
            let vectors = self.features.extract_batch(chunk);
            let ocr = chunk.par_iter().map(|path| self.ocr.extract(path)).collect::<Vec<_>>();

            for ((path, vector), ocr) in chunk.iter().zip(vectors).zip(ocr) {
                let vector = match vector {
                    Ok(vector) => vector,
                    Err(e) => {
                        warn!("提取特征失败: {}: {:#}", path.display(), e);
                        stats.feature_failures += 1;
                        continue;
                    }
                };
                let ocr = ocr.unwrap_or_else(|e| {
                    warn!("OCR 失败: {}: {:#}", path.display(), e);
                    stats.ocr_failures += 1;
                    None
                });
                items.push(
                    IndexItem::new(path.to_string_lossy(), vector)
                        .with_ocr(ocr)
                        .with_byte_size(byte_size(path)),
                );
            }

            pb.inc(chunk.len() as u64);
            self.update_status(|s| s.progress += chunk.len());
        }

        pb.finish_with_message("特征提取完成");
        Ok((items, stats))
    }
}

fn byte_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
