use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// 图片记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// 记录在目录中的位置，与向量矩阵的行号一致
    pub position: u32,
    /// 图片路径
    pub path: String,
    /// 图片文件名
    pub filename: String,
    /// 文件大小，单位为字节
    pub byte_size: u64,
    /// OCR 识别出的完整文本
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_text: Option<String>,
    /// OCR 识别出的单词列表
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_words: Option<Vec<String>>,
}

impl ImageRecord {
    /// 创建一条记录，位置由 [`Catalog::append`] 填充
    pub fn new(path: impl Into<String>, byte_size: u64) -> Self {
        let path = path.into();
        let filename = file_name(&path);
        Self { position: 0, path, filename, byte_size, ocr_text: None, ocr_words: None }
    }
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_owned())
}

/// 图片元数据目录，与向量矩阵按位置一一对应
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    records: Vec<ImageRecord>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从磁盘读取的记录列表创建目录，要求位置与下标一致
    pub fn from_records(records: Vec<ImageRecord>) -> Result<Self> {
        if let Some((i, record)) =
            records.iter().enumerate().find(|(i, r)| r.position as usize != *i)
        {
            return Err(StoreError::InconsistentSnapshot(format!(
                "第 {} 条记录的位置为 {}",
                i, record.position
            )));
        }
        Ok(Self { records })
    }

    /// 追加一条记录，返回分配的位置
    pub fn append(&mut self, mut record: ImageRecord) -> u32 {
        let position = self.records.len() as u32;
        record.position = position;
        self.records.push(record);
        position
    }

    /// 按位置获取记录，任意一个位置越界都会返回错误
    pub fn get(&self, positions: &[u32]) -> Result<Vec<ImageRecord>> {
        positions.iter().map(|&p| self.record(p).cloned()).collect()
    }

    pub fn record(&self, position: u32) -> Result<&ImageRecord> {
        self.records
            .get(position as usize)
            .ok_or(StoreError::OutOfRange { position, len: self.records.len() })
    }

    pub fn records(&self) -> &[ImageRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.records.iter().map(|r| r.byte_size).sum()
    }

    pub fn into_records(self) -> Vec<ImageRecord> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use rstest::*;

    use super::*;

    #[fixture]
    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.append(ImageRecord::new("/data/a.jpg", 10));
        catalog.append(ImageRecord::new("/data/sub/b.png", 20));
        catalog.append(ImageRecord::new("c.gif", 30));
        catalog
    }

    #[rstest]
    fn test_append_assigns_positions(catalog: Catalog) {
        for (i, record) in catalog.records().iter().enumerate() {
            assert_eq!(record.position as usize, i);
        }
        assert_eq!(catalog.records()[1].filename, "b.png");
        assert_eq!(catalog.records()[2].filename, "c.gif");
        assert_eq!(catalog.total_bytes(), 60);
    }

    #[rstest]
    fn test_get_out_of_range(catalog: Catalog) {
        let records = catalog.get(&[2, 0]).unwrap();
        assert_eq!(records[0].path, "c.gif");
        assert_eq!(records[1].path, "/data/a.jpg");

        assert!(matches!(
            catalog.get(&[0, 3]),
            Err(StoreError::OutOfRange { position: 3, len: 3 })
        ));
    }

    #[rstest]
    fn test_from_records_rejects_holes(catalog: Catalog) {
        let mut records = catalog.into_records();
        records.remove(1);
        assert!(matches!(
            Catalog::from_records(records),
            Err(StoreError::InconsistentSnapshot(_))
        ));
    }
}
