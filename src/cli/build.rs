use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::ScanOptions;
use crate::extract::{SidecarFeatures, SidecarOcr};
use crate::indexer::Indexer;
use crate::scan::scan_directories;
use crate::{IMDBBuilder, Opts};

#[derive(Parser, Debug, Clone)]
pub struct BuildCommand {
    #[command(flatten)]
    pub scan: ScanOptions,
    /// 图片所在目录，每张图片旁需要有 `<图片>.npy` 特征文件，可选 `<图片>.ocr.json` 文字文件
    #[arg(required = true)]
    pub directories: Vec<PathBuf>,
}

impl SubCommandExtend for BuildCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let db = IMDBBuilder::new(opts.conf_dir.clone()).dimension(opts.dimension).open();
        let indexer = Indexer::new(SidecarFeatures, SidecarOcr);

        let stats = block_in_place(|| -> Result<_> {
            let paths = scan_directories(&self.directories, &self.scan)?;
            indexer.run(&db, &paths)
        })?;

        info!("构建索引成功");
        println!("{}", serde_json::to_string_pretty(&stats)?);
        Ok(())
    }
}
