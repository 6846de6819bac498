use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use indicatif::ProgressBar;
use log::{debug, info, warn};
use ndarray::{Array2, ArrayView1, ArrayView2};
use ndarray_npy::{read_npy, write_npy};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::embedding::{Embedder, embed_normalized};
use crate::error::{Result, SearchError};
use crate::ranker::display_name;
use crate::scanner::scan;

/// 特征缓存，文件名与特征矩阵逐行对应
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    filenames: Vec<PathBuf>,
    features: Array2<f32>,
}

impl CacheRecord {
    /// 创建缓存记录，文件名数量与特征行数不一致时返回 `CacheCorrupt`
    pub fn new(filenames: Vec<PathBuf>, features: Array2<f32>) -> Result<Self> {
        if filenames.len() != features.nrows() {
            return Err(SearchError::CacheCorrupt(format!(
                "{} 个文件名对应 {} 行特征",
                filenames.len(),
                features.nrows()
            )));
        }
        Ok(Self { filenames, features })
    }

    pub fn len(&self) -> usize {
        self.filenames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filenames.is_empty()
    }

    /// 特征维数
    pub fn dim(&self) -> usize {
        self.features.ncols()
    }

    pub fn filenames(&self) -> &[PathBuf] {
        &self.filenames
    }

    pub fn features(&self) -> ArrayView2<'_, f32> {
        self.features.view()
    }

    pub fn row(&self, i: usize) -> ArrayView1<'_, f32> {
        self.features.row(i)
    }

    /// 所有图片的展示名称，与扫描顺序一致
    pub fn display_names(&self) -> Vec<String> {
        self.filenames.iter().map(|p| display_name(p)).collect()
    }

    /// 按展示名称查找图片，重名时返回扫描顺序中的第一张
    pub fn find_by_name(&self, name: &str) -> Option<&Path> {
        self.filenames.iter().find(|p| display_name(p) == name).map(PathBuf::as_path)
    }
}

/// 缓存有效性策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CachePolicy {
    /// 两个缓存文件都存在即视为有效，图片库变化时需要手动清理缓存
    #[default]
    Exists,
    /// 额外比对图片库指纹（路径 + 文件大小），不一致时自动重建
    Fingerprint,
}

/// 缓存文件路径
#[derive(Debug, Clone)]
pub struct CachePaths {
    /// 特征矩阵，npy 格式
    pub features: PathBuf,
    /// 文件名列表，json 格式
    pub filenames: PathBuf,
    /// 图片库指纹
    pub fingerprint: PathBuf,
}

/// 构建缓存时的进度回调，只用于展示，不影响结果
pub trait ProgressSink: Sync {
    /// 已处理 `done` 张，共 `total` 张
    fn on_progress(&self, done: usize, total: usize);

    fn on_finish(&self) {}
}

/// 不输出任何进度
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _done: usize, _total: usize) {}
}

impl ProgressSink for ProgressBar {
    fn on_progress(&self, done: usize, total: usize) {
        self.set_length(total as u64);
        self.set_position(done as u64);
    }

    fn on_finish(&self) {
        self.finish_with_message("特征提取完成");
    }
}

/// 特征缓存的持久化存储
pub struct FeatureStore {
    paths: CachePaths,
    policy: CachePolicy,
}

impl FeatureStore {
    pub fn new(paths: CachePaths, policy: CachePolicy) -> Self {
        Self { paths, policy }
    }

    pub fn paths(&self) -> &CachePaths {
        &self.paths
    }

    /// 缓存文件是否都存在
    pub fn exists(&self) -> bool {
        self.paths.features.exists() && self.paths.filenames.exists()
    }

    /// 读取缓存，任何解析失败都视为缓存损坏
    pub fn load(&self) -> Result<CacheRecord> {
        debug!("读取缓存: {}", self.paths.filenames.display());
        let file = File::open(&self.paths.filenames)?;
        let stored: Vec<StoredPath> = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| SearchError::CacheCorrupt(format!("文件名列表无法解析: {e}")))?;
        let filenames = stored.into_iter().map(StoredPath::into_path).collect::<Result<Vec<_>>>()?;

        debug!("读取缓存: {}", self.paths.features.display());
        let features: Array2<f32> = read_npy(&self.paths.features)
            .map_err(|e| SearchError::CacheCorrupt(format!("特征矩阵无法解析: {e}")))?;

        CacheRecord::new(filenames, features)
    }

    /// 原子地写入缓存
    ///
    /// 所有文件先写入临时文件，然后删除旧的文件名列表，再依次替换特征、指纹，
    /// 最后替换文件名列表。有效性以两个文件同时存在为准，因此中途崩溃只会导致缓存缺失，
    /// 而不会出现新旧混合的缓存。
    pub fn save(&self, record: &CacheRecord, fingerprint: Option<&str>) -> Result<()> {
        let result = self.write_pair(record, fingerprint);
        if result.is_err() {
            // 失败时清理残留的临时文件，已替换的正式文件保持原样
            for path in [&self.paths.features, &self.paths.filenames, &self.paths.fingerprint] {
                let _ = remove_if_exists(&tmp_path(path));
            }
        }
        result
    }

    fn write_pair(&self, record: &CacheRecord, fingerprint: Option<&str>) -> Result<()> {
        let features_tmp = tmp_path(&self.paths.features);
        let filenames_tmp = tmp_path(&self.paths.filenames);
        let fingerprint_tmp = tmp_path(&self.paths.fingerprint);

        for path in [&self.paths.features, &self.paths.filenames, &self.paths.fingerprint] {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }

        let stored = record.filenames.iter().map(|p| StoredPath::from_path(p)).collect::<Result<Vec<_>>>()?;

        write_npy(&features_tmp, &record.features)?;
        File::open(&features_tmp)?.sync_all()?;

        let file = File::create(&filenames_tmp)?;
        let mut writer = BufWriter::new(&file);
        serde_json::to_writer(&mut writer, &stored)?;
        writer.flush()?;
        drop(writer);
        file.sync_all()?;

        if let Some(fingerprint) = fingerprint {
            fs::write(&fingerprint_tmp, fingerprint)?;
            File::open(&fingerprint_tmp)?.sync_all()?;
        }

        remove_if_exists(&self.paths.filenames)?;
        fs::rename(&features_tmp, &self.paths.features)?;
        match fingerprint {
            Some(_) => fs::rename(&fingerprint_tmp, &self.paths.fingerprint)?,
            None => remove_if_exists(&self.paths.fingerprint)?,
        }
        fs::rename(&filenames_tmp, &self.paths.filenames)?;

        info!("缓存已保存: {} 张图片，{} 维", record.len(), record.dim());
        Ok(())
    }

    /// 删除所有缓存文件
    pub fn clear(&self) -> Result<()> {
        // 文件名列表最先删除，保证中途失败时缓存即失效
        remove_if_exists(&self.paths.filenames)?;
        remove_if_exists(&self.paths.features)?;
        remove_if_exists(&self.paths.fingerprint)?;
        for path in [&self.paths.features, &self.paths.filenames, &self.paths.fingerprint] {
            remove_if_exists(&tmp_path(path))?;
        }
        Ok(())
    }

    /// 扫描图片库并完整重新计算所有特征
    pub fn build(
        &self,
        root: &Path,
        embedder: &dyn Embedder,
        progress: &dyn ProgressSink,
    ) -> Result<CacheRecord> {
        let filenames = scan(root)?;
        let total = filenames.len();
        info!("使用 {} 提取 {} 张图片的特征", embedder.name(), total);

        let done = AtomicUsize::new(0);
        // NOTE: rayon 的 collect 保持输入顺序，因此行号与扫描顺序一致
        let rows = filenames
            .par_iter()
            .map(|path| {
                let v = embed_normalized(embedder, path)?;
                progress.on_progress(done.fetch_add(1, Ordering::Relaxed) + 1, total);
                Ok(v)
            })
            .collect::<Result<Vec<_>>>()?;
        progress.on_finish();

        let dim = embedder.dim();
        let features = Array2::from_shape_vec((total, dim), rows.concat())
            .map_err(|e| SearchError::Model(e.to_string()))?;
        let record = CacheRecord::new(filenames, features)?;

        let fingerprint = match self.policy {
            CachePolicy::Exists => None,
            CachePolicy::Fingerprint => Some(fingerprint(record.filenames())?),
        };
        self.save(&record, fingerprint.as_deref())?;
        Ok(record)
    }

    /// 读取缓存，缓存不存在、已损坏或已过期时完整重建
    pub fn load_or_build(
        &self,
        root: &Path,
        embedder: &dyn Embedder,
        progress: &dyn ProgressSink,
    ) -> Result<CacheRecord> {
        if !self.exists() {
            info!("缓存不存在，开始构建");
            return self.build(root, embedder, progress);
        }

        match self.load() {
            Ok(record) => {
                if self.is_stale(root, &record)? {
                    warn!("图片库已变化，重建缓存");
                    return self.build(root, embedder, progress);
                }
                if record.dim() != embedder.dim() {
                    warn!(
                        "缓存维数为 {}，而模型 {} 输出 {} 维，请清理缓存后重建",
                        record.dim(),
                        embedder.name(),
                        embedder.dim()
                    );
                }
                info!("已加载缓存: {} 张图片", record.len());
                Ok(record)
            }
            Err(SearchError::CacheCorrupt(reason)) => {
                warn!("缓存已损坏（{reason}），重建缓存");
                self.build(root, embedder, progress)
            }
            Err(e) => Err(e),
        }
    }

    fn is_stale(&self, root: &Path, record: &CacheRecord) -> Result<bool> {
        if self.policy == CachePolicy::Exists {
            return Ok(false);
        }
        let stored = match fs::read_to_string(&self.paths.fingerprint) {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };
        let current = match scan(root) {
            Ok(files) => fingerprint(&files)?,
            // 图片库被清空时，旧缓存已经没有意义，交给重建去报告 EmptyCorpus
            Err(SearchError::EmptyCorpus(_)) => return Ok(true),
            Err(e) => return Err(e),
        };
        debug!("图片库指纹: 缓存 {} / 当前 {} ({} 张)", stored.trim(), current, record.len());
        Ok(stored.trim() != current)
    }
}

/// 计算图片库指纹：按顺序对路径与文件大小做 blake3
pub fn fingerprint(filenames: &[PathBuf]) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    for path in filenames {
        hasher.update(path.as_os_str().as_encoded_bytes());
        hasher.update(&[0]);
        hasher.update(&fs::metadata(path)?.len().to_le_bytes());
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// 文件名列表中的一项
///
/// 能以 UTF-8 表示的路径保存为字符串，其余保存为原始字节，保证读回的路径与写入时完全一致
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredPath {
    Utf8(String),
    Bytes(Vec<u8>),
}

impl StoredPath {
    fn from_path(path: &Path) -> Result<Self> {
        if let Some(s) = path.to_str() {
            return Ok(Self::Utf8(s.to_owned()));
        }
        path_to_bytes(path).map(Self::Bytes).ok_or_else(|| {
            std::io::Error::new(
                ErrorKind::InvalidData,
                format!("无法保存非 UTF-8 路径: {}", path.display()),
            )
            .into()
        })
    }

    fn into_path(self) -> Result<PathBuf> {
        match self {
            Self::Utf8(s) => Ok(PathBuf::from(s)),
            Self::Bytes(bytes) => path_from_bytes(bytes)
                .ok_or_else(|| SearchError::CacheCorrupt("文件名无法还原为路径".to_string())),
        }
    }
}

#[cfg(unix)]
fn path_to_bytes(path: &Path) -> Option<Vec<u8>> {
    use std::os::unix::ffi::OsStrExt;
    Some(path.as_os_str().as_bytes().to_vec())
}

#[cfg(not(unix))]
fn path_to_bytes(_path: &Path) -> Option<Vec<u8>> {
    None
}

#[cfg(unix)]
fn path_from_bytes(bytes: Vec<u8>) -> Option<PathBuf> {
    use std::os::unix::ffi::OsStringExt;
    Some(PathBuf::from(OsString::from_vec(bytes)))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: Vec<u8>) -> Option<PathBuf> {
    String::from_utf8(bytes).ok().map(PathBuf::from)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut s = OsString::from(path.as_os_str());
    s.push(".tmp");
    PathBuf::from(s)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use tempfile::TempDir;

    use super::*;

    fn paths(dir: &Path) -> CachePaths {
        CachePaths {
            features: dir.join("features.npy"),
            filenames: dir.join("filenames.json"),
            fingerprint: dir.join("corpus.blake3"),
        }
    }

    #[test]
    fn test_record_length_mismatch() {
        let filenames = (0..5).map(|i| PathBuf::from(format!("{i}.png"))).collect();
        let err = CacheRecord::new(filenames, Array2::zeros((4, 3))).unwrap_err();
        assert!(matches!(err, SearchError::CacheCorrupt(_)));
    }

    #[test]
    fn test_find_by_name_first_wins() {
        let record = CacheRecord::new(
            vec!["/a/x.png".into(), "/b/x.png".into(), "/b/y.png".into()],
            Array2::zeros((3, 2)),
        )
        .unwrap();
        assert_eq!(record.find_by_name("x.png"), Some(Path::new("/a/x.png")));
        assert_eq!(record.find_by_name("z.png"), None);
        assert_eq!(record.display_names(), vec!["x.png", "x.png", "y.png"]);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FeatureStore::new(paths(dir.path()), CachePolicy::Exists);
        let record = CacheRecord::new(
            vec!["/corpus/a.png".into(), "/corpus/b c.jpg".into()],
            array![[0.6f32, 0.8, 0.0], [1.0 / 3f32.sqrt(), 1.0 / 3f32.sqrt(), 1.0 / 3f32.sqrt()]],
        )
        .unwrap();

        assert!(!store.exists());
        store.save(&record, None).unwrap();
        assert!(store.exists());
        assert_eq!(store.load().unwrap(), record);

        // 不应残留临时文件
        assert!(!tmp_path(&store.paths().features).exists());
        assert!(!tmp_path(&store.paths().filenames).exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_save_load_non_utf8_path() {
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new().unwrap();
        let store = FeatureStore::new(paths(dir.path()), CachePolicy::Exists);
        let odd = PathBuf::from(std::ffi::OsStr::from_bytes(b"/corpus/caf\xe9.png"));
        let record =
            CacheRecord::new(vec!["/corpus/a.png".into(), odd.clone()], array![[1.0f32, 0.0], [0.0, 1.0]])
                .unwrap();

        store.save(&record, None).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, record);
        assert_eq!(loaded.filenames()[1], odd);
    }

    #[test]
    fn test_load_plain_string_list() {
        let dir = TempDir::new().unwrap();
        let p = paths(dir.path());
        fs::write(&p.filenames, r#"["/corpus/a.png","/corpus/b.png"]"#).unwrap();
        write_npy(&p.features, &Array2::<f32>::zeros((2, 3))).unwrap();

        let record = FeatureStore::new(p, CachePolicy::Exists).load().unwrap();
        assert_eq!(record.filenames(), &[PathBuf::from("/corpus/a.png"), PathBuf::from("/corpus/b.png")]);
    }

    #[test]
    fn test_failed_save_leaves_no_tmp() {
        let dir = TempDir::new().unwrap();
        let store = FeatureStore::new(paths(dir.path()), CachePolicy::Fingerprint);
        // 指纹位置被目录占用，替换指纹时失败
        fs::create_dir(&store.paths().fingerprint).unwrap();
        let record = CacheRecord::new(vec!["a.png".into()], array![[1.0f32]]).unwrap();

        assert!(store.save(&record, Some("abc")).is_err());
        assert!(!store.exists());
        for path in [&store.paths().features, &store.paths().filenames, &store.paths().fingerprint] {
            assert!(!tmp_path(path).exists());
        }
    }

    #[test]
    fn test_load_detects_mismatch() {
        let dir = TempDir::new().unwrap();
        let p = paths(dir.path());
        let filenames = (0..5).map(|i| format!("/corpus/{i}.png")).collect::<Vec<_>>();
        fs::write(&p.filenames, serde_json::to_string(&filenames).unwrap()).unwrap();
        write_npy(&p.features, &Array2::<f32>::zeros((4, 8))).unwrap();

        let store = FeatureStore::new(p, CachePolicy::Exists);
        assert!(matches!(store.load(), Err(SearchError::CacheCorrupt(_))));
    }

    #[test]
    fn test_load_garbage_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let p = paths(dir.path());
        fs::write(&p.filenames, "[").unwrap();
        fs::write(&p.features, "nope").unwrap();

        let store = FeatureStore::new(p, CachePolicy::Exists);
        assert!(matches!(store.load(), Err(SearchError::CacheCorrupt(_))));
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let store = FeatureStore::new(paths(dir.path()), CachePolicy::Exists);
        let record = CacheRecord::new(vec!["a.png".into()], array![[1.0f32]]).unwrap();
        store.save(&record, Some("abc")).unwrap();
        assert!(store.paths().fingerprint.exists());

        store.clear().unwrap();
        assert!(!store.exists());
        assert!(!store.paths().fingerprint.exists());
        // 重复清理不报错
        store.clear().unwrap();
    }

    #[test]
    fn test_fingerprint_tracks_size() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.png");
        fs::write(&a, b"1234").unwrap();
        let before = fingerprint(&[a.clone()]).unwrap();
        assert_eq!(before, fingerprint(&[a.clone()]).unwrap());

        fs::write(&a, b"123456").unwrap();
        assert_ne!(before, fingerprint(&[a]).unwrap());
    }
}
