use log::warn;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::catalog::{Catalog, ImageRecord};
use crate::embedding::{EmbeddingStore, EmbeddingStoreBuilder};
use crate::error::{Result, StoreError};
use crate::text_index::{OcrPayload, TextIndex, TextIndexBuilder};

/// 允许的单位向量模长误差
pub const NORM_TOLERANCE: f32 = 1e-4;

/// 一张待索引的图片：路径、特征向量以及可选的 OCR 结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct IndexItem {
    pub path: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub ocr: Option<OcrPayload>,
    #[serde(default)]
    pub byte_size: u64,
}

impl IndexItem {
    pub fn new(path: impl Into<String>, vector: Vec<f32>) -> Self {
        Self { path: path.into(), vector, ocr: None, byte_size: 0 }
    }

    pub fn with_ocr(mut self, ocr: Option<OcrPayload>) -> Self {
        self.ocr = ocr;
        self
    }

    pub fn with_byte_size(mut self, byte_size: u64) -> Self {
        self.byte_size = byte_size;
        self
    }
}

/// 不可变的索引快照：向量矩阵、图片目录、倒排索引三者按位置对齐
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub(crate) generation: u64,
    pub(crate) embeddings: EmbeddingStore,
    pub(crate) catalog: Catalog,
    pub(crate) text_index: TextIndex,
}

impl Snapshot {
    /// 组装快照并检查一致性
    pub fn new(
        generation: u64,
        embeddings: EmbeddingStore,
        catalog: Catalog,
        text_index: TextIndex,
    ) -> Result<Self> {
        let snapshot = Self { generation, embeddings, catalog, text_index };
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn empty(dimension: usize) -> Self {
        Self {
            generation: 0,
            embeddings: EmbeddingStore::empty(dimension),
            catalog: Catalog::new(),
            text_index: TextIndex::default(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn embeddings(&self) -> &EmbeddingStore {
        &self.embeddings
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn text_index(&self) -> &TextIndex {
        &self.text_index
    }

    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.embeddings.dimension()
    }

    /// 检查快照的所有不变量
    pub fn validate(&self) -> Result<()> {
        let (rows, records) = (self.embeddings.len(), self.catalog.len());
        if rows != records {
            return Err(StoreError::InconsistentSnapshot(format!(
                "向量数量 {} 与记录数量 {} 不一致",
                rows, records
            )));
        }
        if let Some(i) =
            self.catalog.records().iter().enumerate().position(|(i, r)| r.position as usize != i)
        {
            return Err(StoreError::InconsistentSnapshot(format!("第 {} 条记录的位置错误", i)));
        }
        if let Some(max) = self.text_index.max_position() {
            if max as usize >= records {
                return Err(StoreError::InconsistentSnapshot(format!(
                    "倒排索引中的位置 {} 超出记录数量 {}",
                    max, records
                )));
            }
        }
        if !self.text_index.is_sorted() {
            return Err(StoreError::InconsistentSnapshot("倒排列表未排序".to_owned()));
        }
        if let Some(i) = self.embeddings.find_unnormalized(NORM_TOLERANCE) {
            return Err(StoreError::InconsistentSnapshot(format!("第 {} 行向量未归一化", i)));
        }
        Ok(())
    }
}

/// 构建快照时的统计信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStats {
    /// 成功加入索引的图片数量
    pub indexed: usize,
    /// 因向量模长为 0 被跳过的图片数量
    pub zero_norm: usize,
}

/// 在旁路构建新快照，三个结构同步追加，位置天然对齐
pub struct SnapshotBuilder {
    embeddings: EmbeddingStoreBuilder,
    catalog: Catalog,
    text_index: TextIndexBuilder,
    stats: BuildStats,
}

impl SnapshotBuilder {
    pub fn new(dimension: usize) -> Self {
        Self {
            embeddings: EmbeddingStoreBuilder::new(dimension),
            catalog: Catalog::new(),
            text_index: TextIndexBuilder::default(),
            stats: BuildStats::default(),
        }
    }

    /// 添加一张图片，返回分配的位置
    ///
    /// 向量模长为 0 时跳过该图片并返回 `Ok(None)`；维度不一致时返回错误
    pub fn push(&mut self, item: IndexItem) -> Result<Option<u32>> {
        match self.embeddings.push(&item.vector) {
            Ok(_) => {}
            Err(StoreError::ZeroNormVector) => {
                warn!("向量模长为 0，跳过: {}", item.path);
                self.stats.zero_norm += 1;
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        let mut record = ImageRecord::new(item.path, item.byte_size);
        if let Some(ocr) = item.ocr {
            record.ocr_text = Some(ocr.text);
            record.ocr_words = Some(ocr.words);
        }
        let words = record.ocr_words.clone();
        let position = self.catalog.append(record);
        if let Some(words) = words {
            self.text_index.add(position, &words);
        }
        self.stats.indexed += 1;
        Ok(Some(position))
    }

    pub fn extend<I: IntoIterator<Item = IndexItem>>(&mut self, items: I) -> Result<()> {
        for item in items {
            self.push(item)?;
        }
        Ok(())
    }

    /// 完成构建，返回经过校验的快照
    pub fn finish(self, generation: u64) -> Result<(Snapshot, BuildStats)> {
        let embeddings = self.embeddings.finish()?;
        let snapshot =
            Snapshot::new(generation, embeddings, self.catalog, self.text_index.finish())?;
        Ok((snapshot, self.stats))
    }
}
