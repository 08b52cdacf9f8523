use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let proj_dirs = ProjectDirs::from("", "imfind", "imfind").expect("failed to get project dir");
    ConfDir::new(proj_dirs.data_dir().join("index"))
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap_or("index")
}

/// 默认的特征向量维度
pub const DEFAULT_DIMENSION: usize = 512;
/// 默认返回的结果数量
pub const DEFAULT_TOP_K: usize = 20;
/// 默认的相似度阈值
pub const DEFAULT_THRESHOLD: f64 = 0.7;

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 返回的结果数量
    #[arg(long, value_name = "COUNT", default_value_t = DEFAULT_TOP_K)]
    pub count: usize,
    /// 相似度阈值，先取前 COUNT 个结果再过滤低于阈值的结果
    #[arg(
        long,
        value_name = "SCORE",
        default_value_t = DEFAULT_THRESHOLD,
        allow_negative_numbers = true
    )]
    pub threshold: f64,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { count: DEFAULT_TOP_K, threshold: DEFAULT_THRESHOLD }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct ScanOptions {
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png,gif,bmp,webp")]
    pub suffix: String,
    /// 只扫描目录的第一层
    #[arg(long)]
    pub no_recursive: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self { suffix: "jpg,jpeg,png,gif,bmp,webp".to_owned(), no_recursive: false }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "imfind", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 索引文件目录
    #[arg(short, long, global = true, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
    /// 特征向量维度，需要与外部特征提取模型一致
    #[arg(short, long, global = true, default_value_t = DEFAULT_DIMENSION)]
    pub dimension: usize,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 扫描目录并重建索引
    Build(BuildCommand),
    /// 以图搜图、按文字搜索或混合搜索
    Search(SearchCommand),
    /// 显示索引统计信息
    Stats(StatsCommand),
    /// 启动 HTTP 搜索服务
    Server(ServerCommand),
}

/// 索引文件目录
#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 指向当前快照目录的文件，保存快照时通过替换它完成切换
    pub fn current(&self) -> PathBuf {
        self.path.join("CURRENT")
    }

    pub fn current_tmp(&self) -> PathBuf {
        self.path.join("CURRENT.tmp")
    }

    pub fn snapshot(&self, name: &str) -> SnapshotDir {
        SnapshotDir { path: self.path.join(name) }
    }
}

/// 单个快照的目录，保存后不再修改
#[derive(Debug, Clone)]
pub struct SnapshotDir {
    path: PathBuf,
}

impl SnapshotDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回向量矩阵文件的路径
    pub fn embeddings(&self) -> PathBuf {
        self.path.join("embeddings.npy")
    }

    /// 返回图片元数据文件的路径
    pub fn metadata(&self) -> PathBuf {
        self.path.join("metadata.json")
    }

    /// 返回倒排索引文件的路径
    pub fn text_index(&self) -> PathBuf {
        self.path.join("text_index.bin")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}
