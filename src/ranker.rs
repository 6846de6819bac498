use std::path::{Path, PathBuf};

use ndarray::{ArrayView1, ArrayView2, Axis};
use serde::Serialize;

use crate::error::{Result, SearchError};

/// 一条搜索结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityHit {
    /// 在图片库扫描顺序中的下标
    pub index: usize,
    /// 图片路径，非 UTF-8 字符在输出时被替换
    #[serde(serialize_with = "serialize_lossy")]
    pub path: PathBuf,
    /// 余弦相似度，范围 [-1, 1]
    pub score: f32,
}

impl SimilarityHit {
    /// 用于展示的名称，即文件名
    pub fn display_name(&self) -> String {
        display_name(&self.path)
    }
}

fn serialize_lossy<S: serde::Serializer>(path: &Path, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&path.to_string_lossy())
}

/// 路径的展示名称
pub fn display_name(path: &Path) -> String {
    path.file_name().unwrap_or(path.as_os_str()).to_string_lossy().into_owned()
}

/// 计算 query 与 features 每一行的余弦相似度
///
/// 任一方范数为 0 时相似度记为 0
pub fn cosine_similarity(query: ArrayView1<f32>, features: ArrayView2<f32>) -> Result<Vec<f32>> {
    if query.len() != features.ncols() {
        return Err(SearchError::DimensionMismatch {
            expected: features.ncols(),
            found: query.len(),
        });
    }

    let qnorm = query.dot(&query).sqrt();
    let dots = features.dot(&query);
    let scores = features
        .axis_iter(Axis(0))
        .zip(dots.iter())
        .map(|(row, &dot)| {
            let denom = qnorm * row.dot(&row).sqrt();
            if denom > 0.0 { dot / denom } else { 0.0 }
        })
        .collect();
    Ok(scores)
}

/// 按余弦相似度返回最相似的 `top_n` 张图片
///
/// 结果按分数降序排列；分数完全相同时保留扫描顺序，下标小的在前。
/// 图片库不足 `top_n` 张时返回全部，不视为错误。
///
/// 查询图片本身若在图片库中，也会正常出现在结果里（通常排第一）。
pub fn rank(
    query: ArrayView1<f32>,
    features: ArrayView2<f32>,
    filenames: &[PathBuf],
    top_n: usize,
) -> Result<Vec<SimilarityHit>> {
    if top_n == 0 {
        return Err(SearchError::InvalidCount(top_n));
    }
    if features.nrows() != filenames.len() {
        return Err(SearchError::CacheCorrupt(format!(
            "{} 个文件名对应 {} 行特征",
            filenames.len(),
            features.nrows()
        )));
    }

    let scores = cosine_similarity(query, features)?;

    let mut order = (0..scores.len()).collect::<Vec<_>>();
    // NOTE: 必须是稳定排序，否则相同分数的结果顺序不可复现
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order.truncate(top_n);

    Ok(order
        .into_iter()
        .map(|i| SimilarityHit { index: i, path: filenames[i].clone(), score: scores[i] })
        .collect())
}
