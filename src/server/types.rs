use axum::body::Bytes;
use axum_typed_multipart::{FieldData, TryFromMultipart};
use serde::Serialize;
use utoipa::ToSchema;

use crate::ranker::SimilarityHit;

/// 搜索请求参数，`file` 与 `name` 二选一
#[derive(TryFromMultipart)]
pub struct SearchRequest {
    pub file: Option<FieldData<Bytes>>,
    pub name: Option<String>,
    pub count: Option<usize>,
}

/// 搜索表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SearchForm {
    /// 上传的图片文件
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: Option<String>,
    /// 图片库中的图片名称，未上传文件时使用
    pub name: Option<String>,
    /// 返回的结果数量
    pub count: Option<usize>,
}

/// 搜索响应
#[derive(Debug, Serialize, ToSchema)]
pub struct SearchResponse {
    /// 搜索耗时，单位为毫秒
    pub time: u64,
    /// 按相似度降序排列的结果
    pub result: Vec<HitResponse>,
}

/// 单条搜索结果
#[derive(Debug, Serialize, ToSchema)]
pub struct HitResponse {
    /// 展示名称
    pub name: String,
    /// 图片路径
    pub path: String,
    /// 余弦相似度
    pub score: f32,
}

impl From<SimilarityHit> for HitResponse {
    fn from(hit: SimilarityHit) -> Self {
        Self {
            name: hit.display_name(),
            path: hit.path.to_string_lossy().into_owned(),
            score: hit.score,
        }
    }
}
