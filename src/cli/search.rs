use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use ndarray::Array1;
use ndarray_npy::read_npy;
use serde::Serialize;

use crate::cli::SubCommandExtend;
use crate::config::{Opts, SearchOptions};
use crate::search::{MergedResult, ScoredResult, TextResult};
use crate::{IMDBBuilder, StoreError};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub search: SearchOptions,
    /// 查询向量文件，一维 f32 的 npy 数组
    #[arg(long, value_name = "FILE")]
    pub vector: Option<PathBuf>,
    /// 查询文本，多个单词之间为“或”的关系
    #[arg(long, value_name = "QUERY")]
    pub text: Option<String>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", default_value = "table")]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let db = IMDBBuilder::new(opts.conf_dir.clone())
            .dimension(opts.dimension)
            .search(self.search.clone())
            .open();

        let vector = match &self.vector {
            Some(path) => {
                let vector: Array1<f32> = read_npy(path)
                    .with_context(|| format!("读取查询向量失败: {}", path.display()))?;
                Some(vector.to_vec())
            }
            None => None,
        };
        let count = self.search.count;

        match (&vector, &self.text) {
            (Some(vector), None) => {
                let result = db.search_by_vector(vector, count)?;
                print_result(&result, self)
            }
            (None, Some(text)) => {
                let result = db.search_by_text(text, count)?;
                print_result(&result, self)
            }
            (Some(vector), Some(text)) => {
                let result = db.hybrid_search(Some(vector), Some(text), Some(count))?;
                print_result(&result, self)
            }
            (None, None) => bail!(StoreError::NoQuery),
        }
    }
}

/// 以表格形式输出的一行
trait TableRow {
    fn row(&self) -> String;
}

impl TableRow for ScoredResult {
    fn row(&self) -> String {
        format!("{:.4}\t{}", self.similarity, self.path)
    }
}

impl TableRow for TextResult {
    fn row(&self) -> String {
        format!("-\t{}", self.path)
    }
}

impl TableRow for MergedResult {
    fn row(&self) -> String {
        let score = self.visual_score.map_or_else(|| "-".to_owned(), |s| format!("{:.4}", s));
        let text = if self.text_match { "T" } else { "-" };
        format!("{}\t{}\t{}", score, text, self.path)
    }
}

fn print_result<T: Serialize + TableRow>(result: &[T], opts: &SearchCommand) -> Result<()> {
    match opts.output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for item in result {
                println!("{}", item.row());
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone)]
pub enum OutputFormat {
    Json,
    Table,
}
