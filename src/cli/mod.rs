mod build;
mod clean;
mod list;
mod search;
pub mod server;

pub use build::*;
pub use clean::*;
pub use list::*;
pub use search::*;
pub use server::*;

use indicatif::ProgressBar;
use tokio::task::block_in_place;

use crate::config::{CorpusOptions, ModelOptions, Opts};
use crate::searcher::Searcher;
use crate::utils::pb_style;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 创建特征提取器并加载缓存，缓存不可用时会完整重建
fn open_searcher(
    opts: &Opts,
    model: &ModelOptions,
    corpus: &CorpusOptions,
) -> anyhow::Result<Searcher> {
    let embedder = model.create_embedder(&opts.cache_dir)?;
    let store = opts.cache_dir.store(corpus.policy());
    let pb = ProgressBar::no_length().with_style(pb_style());
    let record = block_in_place(|| store.load_or_build(&corpus.corpus, &*embedder, &pb))?;
    Ok(Searcher::new(record, embedder))
}
