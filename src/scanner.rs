use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use log::info;
use regex::Regex;
use walkdir::WalkDir;

use crate::error::{Result, SearchError};

/// 允许的图片后缀名，不区分大小写
pub const IMAGE_SUFFIXES: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff"];

static RE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("(?i)^({})$", IMAGE_SUFFIXES.join("|"))).expect("failed to build regex")
});

/// 判断路径的后缀名是否为支持的图片格式
pub fn is_image_path(path: &Path) -> bool {
    path.extension().is_some_and(|ext| RE_SUFFIX.is_match(&ext.to_string_lossy()))
}

/// 递归扫描目录下的所有图片
///
/// 返回的路径以根目录的绝对路径为前缀，并按完整路径的字节序排序，
/// 保证重复扫描同一目录时顺序完全一致。
pub fn scan(root: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let root = root.as_ref().canonicalize()?;
    info!("开始扫描目录: {}", root.display());

    // 数据集常以软链接组织，需要跟随链接
    let mut files = WalkDir::new(&root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && is_image_path(entry.path()))
        .map(|entry| entry.into_path())
        .collect::<Vec<_>>();

    // NOTE: 不能直接用 PathBuf 的 Ord，它按路径组件比较，与字符串序不同
    files.sort_by(|a, b| a.as_os_str().cmp(b.as_os_str()));

    info!("扫描完成，共 {} 张图片", files.len());

    if files.is_empty() {
        return Err(SearchError::EmptyCorpus(root));
    }
    Ok(files)
}
