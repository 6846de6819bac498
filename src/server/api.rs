use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum_auth::AuthBearer;
use axum_typed_multipart::TypedMultipart;
use log::info;
use tokio::task::block_in_place;

use super::error::{AppError, Result};
use super::state::AppState;
use super::types::*;
use crate::metrics;
use crate::searcher::Query;

/// 搜索相似图片
#[utoipa::path(
    post,
    path = "/search",
    request_body(content = SearchForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = SearchResponse),
    )
)]
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
    TypedMultipart(data): TypedMultipart<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    if token != state.token {
        return Err(AppError::Unauthorized);
    }

    let count = data.count.unwrap_or(state.search.count);
    if count == 0 {
        return Err(AppError::BadRequest("count 至少为 1".to_string()));
    }

    let query = match (data.file, data.name) {
        (Some(file), _) => {
            info!("正在搜索上传图片: {:?}", file.metadata.file_name);
            Query::Bytes(file.contents.to_vec())
        }
        (None, Some(name)) => {
            info!("正在搜索图片库中的图片: {name}");
            Query::Name(name)
        }
        (None, None) => return Err(AppError::BadRequest("需要提供 file 或 name".to_string())),
    };

    let start = Instant::now();
    let result = block_in_place(|| state.searcher.search(&query, count))?;

    Ok(Json(SearchResponse {
        time: start.elapsed().as_millis() as u64,
        result: result.into_iter().map(HitResponse::from).collect(),
    }))
}

/// 列出图片库中所有图片的名称
#[utoipa::path(
    get,
    path = "/images",
    responses(
        (status = 200, body = Vec<String>),
    )
)]
pub async fn images_handler(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.searcher.record().display_names())
}

/// Prometheus 指标
pub async fn metrics_handler() -> String {
    metrics::gather_text()
}
