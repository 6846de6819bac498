use anyhow::Result;
use clap::Parser;

use crate::Opts;
use crate::cli::SubCommandExtend;
use crate::config::CorpusOptions;
use crate::ranker::display_name;
use crate::scanner::scan;

#[derive(Parser, Debug, Clone)]
pub struct ListCommand {
    #[command(flatten)]
    pub corpus: CorpusOptions,
    /// 输出完整路径而不是文件名
    #[arg(short, long)]
    pub full_path: bool,
}

impl SubCommandExtend for ListCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        // 有缓存时以缓存为准，这样列出的名称与搜索时一致
        let store = opts.cache_dir.store(self.corpus.policy());
        let filenames = if store.exists() {
            store.load()?.filenames().to_vec()
        } else {
            scan(&self.corpus.corpus)?
        };

        for path in filenames {
            if self.full_path {
                println!("{}", path.display());
            } else {
                println!("{}", display_name(&path));
            }
        }
        Ok(())
    }
}
