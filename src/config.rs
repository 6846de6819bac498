use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;
use log::info;

use crate::cli::*;
use crate::embedding::{ColorHistogram, Embedder};
use crate::store::{CachePaths, CachePolicy, FeatureStore};

static CACHE_DIR: LazyLock<String> = LazyLock::new(|| {
    let proj_dirs = ProjectDirs::from("", "imsim", "imsim").expect("failed to get project dir");
    proj_dirs.cache_dir().to_string_lossy().into_owned()
});

fn default_cache_dir() -> &'static str {
    CACHE_DIR.as_str()
}

#[derive(Parser, Debug, Clone)]
pub struct ModelOptions {
    /// 特征提取模型
    #[arg(short, long, value_enum, default_value_t = ModelKind::Histogram)]
    pub model: ModelKind,
    /// 颜色直方图每个通道的分档数量，特征维数为其立方
    #[arg(long, value_name = "N", default_value_t = 8, value_parser = clap::value_parser!(u32).range(1..=64))]
    pub bins: u32,
    /// 颜色直方图的输入图片尺寸，图片会被缩放为 SIZExSIZE
    #[arg(long, value_name = "SIZE", default_value_t = 224, value_parser = clap::value_parser!(u32).range(1..))]
    pub image_size: u32,
    /// 预训练模型的下载目录，默认为缓存目录下的 models
    #[arg(long, value_name = "DIR")]
    pub model_cache: Option<PathBuf>,
}

impl ModelOptions {
    /// 创建特征提取器，整个进程只应调用一次
    #[cfg_attr(not(feature = "fastembed"), allow(unused_variables))]
    pub fn create_embedder(&self, cache_dir: &CacheDir) -> crate::Result<Arc<dyn Embedder>> {
        let embedder: Arc<dyn Embedder> = match self.model {
            ModelKind::Histogram => Arc::new(ColorHistogram::new(self.bins, self.image_size)),
            #[cfg(feature = "fastembed")]
            kind => {
                let dir = self.model_cache.clone().unwrap_or_else(|| cache_dir.models());
                Arc::new(crate::embedding::FastEmbedder::new(kind.fastembed_model(), dir)?)
            }
        };
        info!("特征提取模型: {} ({} 维)", embedder.name(), embedder.dim());
        Ok(embedder)
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// RGB 颜色直方图，无需下载模型
    Histogram,
    /// CLIP ViT-B/32，512 维
    #[cfg(feature = "fastembed")]
    ClipVitB32,
    /// ResNet-50，2048 维
    #[cfg(feature = "fastembed")]
    Resnet50,
    /// Unicom ViT-B/16，768 维
    #[cfg(feature = "fastembed")]
    UnicomVitB16,
    /// Unicom ViT-B/32，512 维
    #[cfg(feature = "fastembed")]
    UnicomVitB32,
    /// Nomic Embed Vision v1.5，768 维
    #[cfg(feature = "fastembed")]
    NomicEmbedVisionV15,
}

#[cfg(feature = "fastembed")]
impl ModelKind {
    fn fastembed_model(self) -> fastembed::ImageEmbeddingModel {
        use fastembed::ImageEmbeddingModel as M;
        match self {
            ModelKind::Histogram => unreachable!(),
            ModelKind::ClipVitB32 => M::ClipVitB32,
            ModelKind::Resnet50 => M::Resnet50,
            ModelKind::UnicomVitB16 => M::UnicomVitB16,
            ModelKind::UnicomVitB32 => M::UnicomVitB32,
            ModelKind::NomicEmbedVisionV15 => M::NomicEmbedVisionV15,
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct CorpusOptions {
    /// 图片库目录
    #[arg(long, value_name = "DIR", default_value = "images")]
    pub corpus: PathBuf,
    /// 记录并比对图片库指纹（路径与文件大小），图片库变化时自动重建缓存
    #[arg(long)]
    pub verify_corpus: bool,
}

impl CorpusOptions {
    pub fn policy(&self) -> CachePolicy {
        if self.verify_corpus { CachePolicy::Fingerprint } else { CachePolicy::Exists }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 显示的结果数量
    #[arg(long, value_name = "COUNT", default_value_t = 5, value_parser = parse_count)]
    pub count: usize,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "imsim", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 特征缓存目录
    #[arg(short, long, default_value = default_cache_dir())]
    pub cache_dir: CacheDir,
    /// 提取特征时使用的线程数
    #[arg(short = 'j', long, value_name = "N", default_value_t = num_cpus::get())]
    pub threads: usize,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 提取图片库特征并写入缓存
    Build(BuildCommand),
    /// 从图片库中搜索相似图片
    Search(SearchCommand),
    /// 列出图片库中的所有图片
    List(ListCommand),
    /// 删除缓存，下次运行时将重新提取特征
    Clean(CleanCommand),
    /// 启动 HTTP 搜索服务
    Server(ServerCommand),
}

#[derive(Debug, Clone)]
pub struct CacheDir {
    path: PathBuf,
}

impl CacheDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回特征矩阵文件的路径
    pub fn features(&self) -> PathBuf {
        self.path.join("features.npy")
    }

    /// 返回文件名列表的路径
    pub fn filenames(&self) -> PathBuf {
        self.path.join("filenames.json")
    }

    /// 返回图片库指纹文件的路径
    pub fn fingerprint(&self) -> PathBuf {
        self.path.join("corpus.blake3")
    }

    /// 返回预训练模型的默认下载目录
    pub fn models(&self) -> PathBuf {
        self.path.join("models")
    }

    pub fn store(&self, policy: CachePolicy) -> FeatureStore {
        let paths = CachePaths {
            features: self.features(),
            filenames: self.filenames(),
            fingerprint: self.fingerprint(),
        };
        FeatureStore::new(paths, policy)
    }
}

impl FromStr for CacheDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

fn parse_count(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("结果数量至少为 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(format!("无效的数量: {e}")),
    }
}
