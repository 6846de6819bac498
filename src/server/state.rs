use std::sync::Arc;

use crate::config::SearchOptions;
use crate::searcher::Searcher;

/// 应用状态，启动后只读
pub struct AppState {
    /// 已加载缓存的查询器
    pub searcher: Searcher,
    /// 搜索配置选项
    pub search: SearchOptions,
    /// 鉴权 token
    pub token: String,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(searcher: Searcher, search: SearchOptions, token: String) -> Arc<Self> {
        Arc::new(AppState { searcher, search, token })
    }
}
