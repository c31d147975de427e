//! 请求体提取器
//!
//! 与 `axum::Json` 相同，但解析失败时返回带错误码的 `INVALID_ARGUMENT`，
//! 响应中不回显请求内容

use axum::{
    Json,
    extract::{FromRequest, Request},
};
use serde::de::DeserializeOwned;

use super::error::AdminServiceError;

pub struct ValidJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AdminServiceError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ValidJson(value)),
            Err(rejection) => {
                tracing::debug!("请求体解析失败: {}", rejection.body_text());
                Err(AdminServiceError::InvalidArgument("请求格式错误".to_string()))
            }
        }
    }
}
