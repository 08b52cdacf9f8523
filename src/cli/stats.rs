use anyhow::Result;
use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::{IMDBBuilder, Opts};

#[derive(Parser, Debug, Clone)]
pub struct StatsCommand {}

impl SubCommandExtend for StatsCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let db = IMDBBuilder::new(opts.conf_dir.clone()).dimension(opts.dimension).open();
        println!("{}", serde_json::to_string_pretty(&db.statistics())?);
        Ok(())
    }
}
