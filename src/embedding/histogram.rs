use std::path::Path;

use image::DynamicImage;

use super::{Embedder, open_image, preprocess};
use crate::error::Result;

/// RGB 联合颜色直方图
///
/// 不依赖任何预训练模型，适合离线环境和测试。每个通道量化为 `bins` 档，
/// 输出维数为 `bins³`，取值为像素占比的平方根（Hellinger 核），
/// 这样归一化后的点积即为 Bhattacharyya 系数。
pub struct ColorHistogram {
    bins: u32,
    size: u32,
    name: String,
}

impl ColorHistogram {
    pub fn new(bins: u32, size: u32) -> Self {
        assert!((1..=256).contains(&bins), "bins must be in 1..=256");
        assert!(size > 0, "size must be positive");
        Self { bins, size, name: format!("histogram{bins}@{size}") }
    }

    /// 对已解码的图片计算直方图
    pub fn embed_image(&self, image: &DynamicImage) -> Vec<f32> {
        let rgb = preprocess(image, self.size);
        let bins = self.bins as usize;
        let mut hist = vec![0u32; self.dim()];

        let quantize = |c: u8| c as usize * bins / 256;
        for pixel in rgb.pixels() {
            let [r, g, b] = pixel.0;
            hist[(quantize(r) * bins + quantize(g)) * bins + quantize(b)] += 1;
        }

        let total = (rgb.width() * rgb.height()) as f32;
        hist.into_iter().map(|n| (n as f32 / total).sqrt()).collect()
    }
}

impl Embedder for ColorHistogram {
    fn name(&self) -> &str {
        &self.name
    }

    fn dim(&self) -> usize {
        (self.bins as usize).pow(3)
    }

    fn embed_file(&self, path: &Path) -> Result<Vec<f32>> {
        let image = open_image(path)?;
        Ok(self.embed_image(&image))
    }
}
