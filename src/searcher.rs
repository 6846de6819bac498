use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use image::{DynamicImage, ImageFormat};
use log::debug;
use ndarray::ArrayView1;
use tempfile::NamedTempFile;

use crate::embedding::{Embedder, embed_normalized};
use crate::error::{Result, SearchError};
use crate::metrics;
use crate::ranker::{SimilarityHit, rank};
use crate::store::CacheRecord;

/// 查询图片的来源
#[derive(Debug, Clone)]
pub enum Query {
    /// 图片库中的图片，以展示名称指定
    Name(String),
    /// 本地任意图片文件
    Path(PathBuf),
    /// 上传的原始图片数据
    Bytes(Vec<u8>),
}

impl Query {
    fn kind(&self) -> &'static str {
        match self {
            Query::Name(_) => "corpus",
            Query::Path(_) => "path",
            Query::Bytes(_) => "upload",
        }
    }
}

/// 在已加载的缓存上执行相似图片查询
///
/// 除了缓存本身之外不保存任何状态，可以反复调用而无需重新计算图片库特征。
pub struct Searcher {
    record: CacheRecord,
    embedder: Arc<dyn Embedder>,
}

impl Searcher {
    pub fn new(record: CacheRecord, embedder: Arc<dyn Embedder>) -> Self {
        metrics::set_corpus_size(record.len());
        Self { record, embedder }
    }

    pub fn record(&self) -> &CacheRecord {
        &self.record
    }

    pub fn embedder(&self) -> &dyn Embedder {
        &*self.embedder
    }

    /// 搜索与查询图片最相似的 `top_n` 张图片
    pub fn search(&self, query: &Query, top_n: usize) -> Result<Vec<SimilarityHit>> {
        let start = Instant::now();

        let result = match query {
            Query::Name(name) => {
                let path = self
                    .record
                    .find_by_name(name)
                    .ok_or_else(|| SearchError::UnknownImage(name.clone()))?;
                self.search_file(path, top_n)?
            }
            Query::Path(path) => self.search_file(path, top_n)?,
            Query::Bytes(data) => {
                // 临时文件在离开作用域时删除，无论搜索是否成功
                let file = materialize(data)?;
                self.search_file(file.path(), top_n)?
            }
        };

        let elapsed = start.elapsed().as_secs_f32();
        debug!("搜索耗时: {:.2}ms", elapsed * 1000.);
        metrics::inc_image_count(query.kind());
        metrics::inc_search_duration(query.kind(), elapsed);
        if let Some(best) = result.first() {
            metrics::inc_search_max_score(query.kind(), best.score);
        }

        Ok(result)
    }

    fn search_file(&self, path: &Path, top_n: usize) -> Result<Vec<SimilarityHit>> {
        let query = embed_normalized(&*self.embedder, path)?;
        rank(
            ArrayView1::from(&query),
            self.record.features(),
            self.record.filenames(),
            top_n,
        )
    }
}

/// 将上传的图片解码并以 RGB PNG 格式写入临时文件
pub fn materialize(data: &[u8]) -> Result<NamedTempFile> {
    let image = image::load_from_memory(data).map_err(|e| SearchError::decode("<upload>", e))?;
    let file = tempfile::Builder::new().prefix("imsim-query-").suffix(".png").tempfile()?;
    DynamicImage::ImageRgb8(image.to_rgb8())
        .save_with_format(file.path(), ImageFormat::Png)
        .map_err(|e| SearchError::decode(file.path(), e))?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Mutex;

    use image::{Rgb, RgbImage};
    use ndarray::array;

    use super::*;

    /// 返回固定向量，并记录被调用的路径
    struct StubEmbedder {
        vector: Vec<f32>,
        fail: bool,
        seen: Mutex<Vec<PathBuf>>,
    }

    impl StubEmbedder {
        fn new(vector: Vec<f32>, fail: bool) -> Arc<Self> {
            Arc::new(Self { vector, fail, seen: Mutex::new(vec![]) })
        }
    }

    impl Embedder for StubEmbedder {
        fn name(&self) -> &str {
            "stub"
        }

        fn dim(&self) -> usize {
            self.vector.len()
        }

        fn embed_file(&self, path: &Path) -> Result<Vec<f32>> {
            self.seen.lock().unwrap().push(path.to_path_buf());
            if self.fail {
                return Err(SearchError::Model("stub failure".into()));
            }
            Ok(self.vector.clone())
        }
    }

    fn record() -> CacheRecord {
        CacheRecord::new(
            vec!["/c/a.png".into(), "/c/b.png".into(), "/c/sub/a.png".into()],
            array![[1.0f32, 0.0], [0.0, 1.0], [0.6, 0.8]],
        )
        .unwrap()
    }

    fn png_bytes() -> Vec<u8> {
        let mut buf = Cursor::new(vec![]);
        DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([10, 20, 30])))
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_search_by_name() {
        let embedder = StubEmbedder::new(vec![3.0, 0.0], false);
        let searcher = Searcher::new(record(), embedder.clone());

        let hits = searcher.search(&Query::Name("a.png".into()), 2).unwrap();
        // 同名时取扫描顺序中的第一张
        assert_eq!(embedder.seen.lock().unwrap()[0], PathBuf::from("/c/a.png"));
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].index, 0);
        assert_eq!(hits[0].score, 1.0);
        assert_eq!(hits[1].index, 2);
    }

    #[test]
    fn test_search_unknown_name() {
        let searcher = Searcher::new(record(), StubEmbedder::new(vec![1.0, 0.0], false));
        let err = searcher.search(&Query::Name("missing.png".into()), 3).unwrap_err();
        assert!(matches!(err, SearchError::UnknownImage(_)));
    }

    #[test]
    fn test_search_dimension_mismatch() {
        let searcher = Searcher::new(record(), StubEmbedder::new(vec![1.0, 0.0, 0.0], false));
        let err = searcher.search(&Query::Path("/tmp/q.png".into()), 3).unwrap_err();
        assert!(matches!(err, SearchError::DimensionMismatch { expected: 2, found: 3 }));
    }

    #[test]
    fn test_search_zero_count() {
        let embedder = StubEmbedder::new(vec![1.0, 0.0], false);
        let searcher = Searcher::new(record(), embedder.clone());
        let err = searcher.search(&Query::Name("b.png".into()), 0).unwrap_err();
        assert!(matches!(err, SearchError::InvalidCount(0)));
    }

    #[test]
    fn test_search_is_repeatable() {
        let searcher = Searcher::new(record(), StubEmbedder::new(vec![0.0, 2.0], false));
        let a = searcher.search(&Query::Path("/tmp/q.png".into()), 3).unwrap();
        let b = searcher.search(&Query::Path("/tmp/q.png".into()), 3).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].index, 1);
    }

    #[test]
    fn test_upload_tempfile_removed() {
        let embedder = StubEmbedder::new(vec![0.0, 1.0], false);
        let searcher = Searcher::new(record(), embedder.clone());

        let hits = searcher.search(&Query::Bytes(png_bytes()), 1).unwrap();
        assert_eq!(hits[0].index, 1);

        let seen = embedder.seen.lock().unwrap()[0].clone();
        assert_eq!(seen.extension().unwrap(), "png");
        assert!(!seen.exists());
    }

    #[test]
    fn test_upload_tempfile_removed_on_failure() {
        let embedder = StubEmbedder::new(vec![0.0, 1.0], true);
        let searcher = Searcher::new(record(), embedder.clone());

        assert!(searcher.search(&Query::Bytes(png_bytes()), 1).is_err());
        let seen = embedder.seen.lock().unwrap()[0].clone();
        assert!(!seen.exists());
    }

    #[test]
    fn test_upload_garbage() {
        let embedder = StubEmbedder::new(vec![0.0, 1.0], false);
        let searcher = Searcher::new(record(), embedder.clone());

        let err = searcher.search(&Query::Bytes(b"garbage".to_vec()), 1).unwrap_err();
        assert!(matches!(err, SearchError::ImageDecode { .. }));
        assert!(embedder.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_materialize_is_rgb_png() {
        let file = materialize(&png_bytes()).unwrap();
        let image = image::open(file.path()).unwrap();
        assert_eq!(image.color(), image::ColorType::Rgb8);
    }
}
