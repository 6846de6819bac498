use anyhow::Result;
use clap::Parser;
use log::info;

use crate::Opts;
use crate::cli::SubCommandExtend;
use crate::store::CachePolicy;

#[derive(Parser, Debug, Clone)]
pub struct CleanCommand {}

impl SubCommandExtend for CleanCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        info!("清理缓存: {}", opts.cache_dir.path().display());
        opts.cache_dir.store(CachePolicy::Exists).clear()?;
        info!("清理完成");
        Ok(())
    }
}
