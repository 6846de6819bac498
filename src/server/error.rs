use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::SearchError;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// API错误类型
pub enum AppError {
    /// token 缺失或错误
    Unauthorized,
    /// 请求参数错误
    BadRequest(String),
    Internal(anyhow::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(e) => match e.downcast_ref::<SearchError>() {
                Some(SearchError::EmptyCorpus(_)) => StatusCode::SERVICE_UNAVAILABLE,
                Some(SearchError::ImageDecode { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
                Some(SearchError::DimensionMismatch { .. }) => StatusCode::CONFLICT,
                Some(SearchError::UnknownImage(_)) => StatusCode::NOT_FOUND,
                Some(SearchError::InvalidCount(_)) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Unauthorized => "token 无效".to_string(),
            AppError::BadRequest(msg) => msg.clone(),
            AppError::Internal(e) => match e.downcast_ref::<SearchError>() {
                Some(SearchError::CacheCorrupt(_)) => format!("{e}，请重建缓存"),
                Some(SearchError::DimensionMismatch { .. }) => format!("{e}，请清理缓存后重建"),
                Some(_) => e.to_string(),
                None => format!("Something went wrong: {e}"),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status(), self.message()).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Internal(err.into())
    }
}
