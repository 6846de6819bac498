use std::path::{Path, PathBuf};

use thiserror::Error;

pub type Result<T, E = SearchError> = std::result::Result<T, E>;

/// 检索流程中的错误
#[derive(Debug, Error)]
pub enum SearchError {
    /// 图片库中没有任何可用图片，本次会话无法继续搜索
    #[error("在 {} 中没有找到任何图片", .0.display())]
    EmptyCorpus(PathBuf),
    /// 图片无法读取或解码，仅影响当前查询
    #[error("无法解码图片 {}: {reason}", .path.display())]
    ImageDecode { path: PathBuf, reason: String },
    /// 缓存文件不可信，需要完整重建
    #[error("缓存已损坏: {0}")]
    CacheCorrupt(String),
    /// 查询向量维数与缓存不一致，通常意味着缓存由其他模型生成
    #[error("特征维数不匹配: 缓存为 {expected}，查询为 {found}")]
    DimensionMismatch { expected: usize, found: usize },
    /// 图片库中不存在该名称的图片
    #[error("图片库中没有名为 {0} 的图片")]
    UnknownImage(String),
    /// 请求的结果数量为 0
    #[error("结果数量至少为 1，收到 {0}")]
    InvalidCount(usize),
    /// 特征全为 0，无法归一化
    #[error("图片 {} 的特征为零向量", .0.display())]
    DegenerateEmbedding(PathBuf),
    /// 特征提取模型内部错误
    #[error("特征提取失败: {0}")]
    Model(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    WriteNpy(#[from] ndarray_npy::WriteNpyError),
}

impl SearchError {
    pub fn decode(path: impl AsRef<Path>, reason: impl ToString) -> Self {
        Self::ImageDecode { path: path.as_ref().to_path_buf(), reason: reason.to_string() }
    }
}
