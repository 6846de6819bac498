use clap::Parser;
use imsim::Opts;
use imsim::cli::SubCommandExtend;
use imsim::config::SubCommand;
use log::debug;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();

    rayon::ThreadPoolBuilder::new().num_threads(opts.threads).build_global()?;
    debug!("特征提取线程数: {}", opts.threads);

    match &opts.subcmd {
        SubCommand::Build(cmd) => cmd.run(&opts).await,
        SubCommand::Search(cmd) => cmd.run(&opts).await,
        SubCommand::List(cmd) => cmd.run(&opts).await,
        SubCommand::Clean(cmd) => cmd.run(&opts).await,
        SubCommand::Server(cmd) => cmd.run(&opts).await,
    }
}
