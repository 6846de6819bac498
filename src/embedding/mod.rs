//! 图片特征提取
//!
//! 特征提取模型被视为一个纯函数：图片 -> 定长向量。模型通常初始化代价较高，
//! 因此调用方应当只创建一次，并以 `Arc<dyn Embedder>` 的形式在整个进程中共享。

#[cfg(feature = "fastembed")]
mod clip;
mod histogram;

use std::path::Path;

#[cfg(feature = "fastembed")]
pub use clip::*;
pub use histogram::*;
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};

use crate::error::{Result, SearchError};

/// 图片特征提取器
pub trait Embedder: Send + Sync {
    /// 模型名称，仅用于日志
    fn name(&self) -> &str;

    /// 输出向量的维数
    fn dim(&self) -> usize;

    /// 读取图片文件并计算特征，返回的向量**未经**归一化
    ///
    /// 图片无法读取或解码时返回 `SearchError::ImageDecode`
    fn embed_file(&self, path: &Path) -> Result<Vec<f32>>;
}

/// 计算特征并做 L2 归一化，同时检查维数
pub fn embed_normalized(embedder: &dyn Embedder, path: &Path) -> Result<Vec<f32>> {
    let mut v = embedder.embed_file(path)?;
    if v.len() != embedder.dim() {
        return Err(SearchError::DimensionMismatch { expected: embedder.dim(), found: v.len() });
    }
    if !normalize_l2(&mut v) {
        return Err(SearchError::DegenerateEmbedding(path.to_path_buf()));
    }
    Ok(v)
}

/// 原地做 L2 归一化，向量范数为 0 或非有限值时返回 false 且不修改向量
pub fn normalize_l2(v: &mut [f32]) -> bool {
    let norm = l2_norm(v);
    if !norm.is_finite() || norm <= 0.0 {
        return false;
    }
    v.iter_mut().for_each(|x| *x /= norm);
    true
}

/// 向量的欧几里得范数
pub fn l2_norm(v: &[f32]) -> f32 {
    // 用 f64 累加，避免高维时的精度损失
    v.iter().map(|&x| x as f64 * x as f64).sum::<f64>().sqrt() as f32
}

/// 读取图片并解码
pub fn open_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).map_err(|e| SearchError::decode(path, e))
}

/// 模型输入预处理：转为 RGB 并缩放到 size x size
pub fn preprocess(image: &DynamicImage, size: u32) -> RgbImage {
    image.resize_exact(size, size, FilterType::Triangle).to_rgb8()
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;

    #[test]
    fn test_normalize_l2() {
        let mut v = vec![3.0, 4.0];
        assert!(normalize_l2(&mut v));
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert!((l2_norm(&v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_normalize_zero_vector() {
        let mut v = vec![0.0; 4];
        assert!(!normalize_l2(&mut v));
        assert_eq!(v, vec![0.0; 4]);
    }

    #[test]
    fn test_normalize_high_dim() {
        let mut v = (0..1280).map(|i| (i % 7) as f32 + 0.5).collect::<Vec<_>>();
        assert!(normalize_l2(&mut v));
        assert!((l2_norm(&v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_preprocess_shape() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 10, Rgb([1, 2, 3])));
        let out = preprocess(&img, 16);
        assert_eq!(out.dimensions(), (16, 16));
        assert_eq!(out.get_pixel(3, 3), &Rgb([1, 2, 3]));
    }
}
