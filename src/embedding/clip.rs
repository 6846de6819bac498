use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ::fastembed::{ImageEmbedding, ImageEmbeddingModel, ImageInitOptions};
use log::info;

use super::{Embedder, open_image};
use crate::error::{Result, SearchError};

/// 基于 fastembed (ONNX Runtime) 的预训练视觉模型
pub struct FastEmbedder {
    // fastembed 的 embed 需要 &mut self
    model: Mutex<ImageEmbedding>,
    name: String,
    dim: usize,
}

impl FastEmbedder {
    /// 加载模型，首次使用时会下载模型文件到 `cache_dir`
    pub fn new(model: ImageEmbeddingModel, cache_dir: PathBuf) -> Result<Self> {
        let name = format!("{model:?}");
        let dim = model_dim(&model)?;
        info!("加载模型 {name}，缓存目录: {}", cache_dir.display());

        std::fs::create_dir_all(&cache_dir)?;
        let options = ImageInitOptions::new(model)
            .with_cache_dir(cache_dir)
            .with_show_download_progress(true);
        let model = ImageEmbedding::try_new(options).map_err(|e| SearchError::Model(e.to_string()))?;

        Ok(Self { model: Mutex::new(model), name, dim })
    }
}

impl Embedder for FastEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_file(&self, path: &Path) -> Result<Vec<f32>> {
        // 先自行解码一次，这样坏图能被归类为解码错误，而不是混在模型错误里
        open_image(path)?;

        let mut model = self.model.lock().map_err(|e| SearchError::Model(e.to_string()))?;
        model
            .embed(vec![path], None)
            .map_err(|e| SearchError::Model(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| SearchError::Model("模型没有返回任何向量".to_string()))
    }
}

fn model_dim(model: &ImageEmbeddingModel) -> Result<usize> {
    match model {
        ImageEmbeddingModel::ClipVitB32 => Ok(512),
        ImageEmbeddingModel::Resnet50 => Ok(2048),
        ImageEmbeddingModel::UnicomVitB16 => Ok(768),
        ImageEmbeddingModel::UnicomVitB32 => Ok(512),
        ImageEmbeddingModel::NomicEmbedVisionV15 => Ok(768),
        #[allow(unreachable_patterns)]
        _ => Err(SearchError::Model(format!("不支持的模型: {model:?}"))),
    }
}
