use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tokio::task::block_in_place;

use crate::cli::{SubCommandExtend, open_searcher};
use crate::config::{CorpusOptions, ModelOptions, Opts, SearchOptions};
use crate::ranker::SimilarityHit;
use crate::searcher::Query;

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub model: ModelOptions,
    #[command(flatten)]
    pub corpus: CorpusOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 被搜索的图片路径
    #[arg(required_unless_present = "name", conflicts_with = "name")]
    pub image: Option<PathBuf>,
    /// 使用图片库中的图片作为查询，以文件名指定
    #[arg(short, long, value_name = "NAME")]
    pub name: Option<String>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let searcher = open_searcher(opts, &self.model, &self.corpus)?;

        let query = match (&self.name, &self.image) {
            (Some(name), _) => Query::Name(name.clone()),
            (None, Some(image)) => Query::Path(image.clone()),
            (None, None) => unreachable!("clap ensures one of image and name"),
        };

        let result = block_in_place(|| searcher.search(&query, self.search.count))?;
        print_result(&result, self)
    }
}

fn print_result(result: &[SimilarityHit], opts: &SearchCommand) -> Result<()> {
    match opts.output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for hit in result {
                println!("{:.1}%\t{}", hit.score * 100., hit.path.display());
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}
