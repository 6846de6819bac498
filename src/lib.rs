pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
mod metrics;
pub mod ranker;
pub mod scanner;
pub mod searcher;
mod server;
pub mod store;
pub mod utils;

pub use config::Opts;
pub use embedding::Embedder;
pub use error::{Result, SearchError};
pub use ranker::{SimilarityHit, rank};
pub use scanner::scan;
pub use searcher::{Query, Searcher};
pub use store::{CachePolicy, CacheRecord, FeatureStore};
