use anyhow::Result;
use clap::Parser;
use indicatif::ProgressBar;
use log::info;
use tokio::task::block_in_place;

use crate::Opts;
use crate::cli::SubCommandExtend;
use crate::config::{CorpusOptions, ModelOptions};
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct BuildCommand {
    #[command(flatten)]
    pub model: ModelOptions,
    #[command(flatten)]
    pub corpus: CorpusOptions,
    /// 即使缓存已存在也重新提取所有特征
    #[arg(short, long)]
    pub force: bool,
}

impl SubCommandExtend for BuildCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let embedder = self.model.create_embedder(&opts.cache_dir)?;
        let store = opts.cache_dir.store(self.corpus.policy());
        let pb = ProgressBar::no_length().with_style(pb_style());

        let record = block_in_place(|| {
            if self.force {
                info!("清理旧缓存");
                store.clear()?;
            }
            store.load_or_build(&self.corpus.corpus, &*embedder, &pb)
        })?;

        info!("缓存就绪: {} 张图片，{} 维，位于 {}", record.len(), record.dim(), opts.cache_dir.path().display());
        Ok(())
    }
}
