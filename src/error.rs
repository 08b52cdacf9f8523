use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// 检索核心的错误类型
#[derive(Error, Debug)]
pub enum StoreError {
    /// 向量维度与索引配置不一致
    #[error("向量维度不匹配: 期望 {expected}, 实际 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// 向量模长为 0（或不是有限值），无法归一化
    #[error("向量模长过小，无法归一化")]
    ZeroNormVector,

    #[error("位置 {position} 越界，当前共 {len} 条记录")]
    OutOfRange { position: u32, len: usize },

    /// 已有重建任务在进行，调用方可稍后重试
    #[error("索引正在重建中")]
    RebuildInProgress,

    #[error("索引文件不存在: {0}")]
    MissingEmbeddings(PathBuf),

    #[error("索引快照不一致: {0}")]
    InconsistentSnapshot(String),

    #[error("不支持的索引格式版本: {found}，当前版本 {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },

    /// 图片查询和文本查询都为空
    #[error("至少需要提供图片向量或文本查询之一")]
    NoQuery,

    #[error("索引尚未构建")]
    NotIndexed,

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 序列化错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bincode 序列化错误: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("读取 npy 失败: {0}")]
    ReadNpy(#[from] ndarray_npy::ReadNpyError),

    #[error("写入 npy 失败: {0}")]
    WriteNpy(#[from] ndarray_npy::WriteNpyError),

    #[error("数组形状错误: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl StoreError {
    /// 是否为可以直接交给调用方的请求错误
    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::DimensionMismatch { .. } | Self::ZeroNormVector | Self::NoQuery)
    }
}
