use std::ffi::OsString;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ndarray::Array1;
use ndarray_npy::read_npy;
use rayon::prelude::*;

use crate::text_index::OcrPayload;

/// 特征提取器，为图片生成特征向量
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<Vec<f32>>;

    /// 批量提取，返回结果与输入一一对应
    fn extract_batch(&self, paths: &[PathBuf]) -> Vec<Result<Vec<f32>>> {
        paths.par_iter().map(|path| self.extract(path)).collect()
    }
}

/// OCR 引擎
///
/// 返回 `Ok(None)` 表示图片中没有文字；返回错误时该图片仍会被索引，只是没有文本
pub trait OcrEngine: Send + Sync {
    fn extract(&self, path: &Path) -> Result<Option<OcrPayload>>;
}

/// 图片旁的附属文件路径，例如 `a.jpg` => `a.jpg.npy`
pub fn sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// 从 `<image>.npy` 读取外部模型生成的特征向量
#[derive(Debug, Clone, Default)]
pub struct SidecarFeatures;

impl FeatureExtractor for SidecarFeatures {
    fn extract(&self, path: &Path) -> Result<Vec<f32>> {
        let npy = sidecar_path(path, "npy");
        let vector: Array1<f32> =
            read_npy(&npy).with_context(|| format!("读取特征文件失败: {}", npy.display()))?;
        Ok(vector.to_vec())
    }
}

/// 从 `<image>.ocr.json` 读取外部 OCR 结果
#[derive(Debug, Clone, Default)]
pub struct SidecarOcr;

impl OcrEngine for SidecarOcr {
    fn extract(&self, path: &Path) -> Result<Option<OcrPayload>> {
        let json = sidecar_path(path, "ocr.json");
        if !json.exists() {
            return Ok(None);
        }
        let file = File::open(&json)?;
        let payload = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("解析 OCR 文件失败: {}", json.display()))?;
        Ok(Some(payload))
    }
}
