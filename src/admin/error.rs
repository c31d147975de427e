//! Admin API 错误类型
//!
//! 每个变体对应一个稳定的错误码和 HTTP 状态码，
//! 响应体格式：`{"detail": {"error": "<消息>", "code": "<错误码>"}}`

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use super::api_keys::ApiKeyError;
use super::types::AdminErrorResponse;
use crate::grok::TokenError;

/// Admin 服务错误
#[derive(Debug, thiserror::Error)]
pub enum AdminServiceError {
    /// 会话缺失、无效或已过期（对外不区分）
    #[error("未授权访问")]
    Unauthorized,

    /// Token 类型不是 "sso" / "ssoSuper"
    #[error("无效的Token类型")]
    InvalidTokenType,

    #[error("{0}")]
    InvalidArgument(String),

    #[error("Token 不存在")]
    TokenNotFound,

    #[error("API Key 不存在")]
    ApiKeyNotFound,

    /// 登录失败次数超过上限
    #[error("登录失败次数过多，请稍后再试")]
    TooManyAttempts,

    /// 额度探测无法发起或上游不可达
    #[error("上游服务不可用: {0}")]
    UpstreamUnavailable(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl AdminServiceError {
    /// 获取对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            AdminServiceError::Unauthorized => StatusCode::UNAUTHORIZED,
            AdminServiceError::InvalidTokenType | AdminServiceError::InvalidArgument(_) => {
                StatusCode::BAD_REQUEST
            }
            AdminServiceError::TokenNotFound | AdminServiceError::ApiKeyNotFound => {
                StatusCode::NOT_FOUND
            }
            AdminServiceError::TooManyAttempts => StatusCode::TOO_MANY_REQUESTS,
            AdminServiceError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AdminServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 稳定的机器可读错误码
    pub fn code(&self) -> &'static str {
        match self {
            AdminServiceError::Unauthorized => "UNAUTHORIZED",
            AdminServiceError::InvalidTokenType => "INVALID_TYPE",
            AdminServiceError::InvalidArgument(_) => "INVALID_ARGUMENT",
            AdminServiceError::TokenNotFound => "TOKEN_NOT_FOUND",
            AdminServiceError::ApiKeyNotFound => "API_KEY_NOT_FOUND",
            AdminServiceError::TooManyAttempts => "TOO_MANY_ATTEMPTS",
            AdminServiceError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            AdminServiceError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 转换为 JSON 错误响应
    pub fn to_error_response(&self) -> AdminErrorResponse {
        AdminErrorResponse::new(self.to_string(), self.code())
    }
}

impl IntoResponse for AdminServiceError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.to_error_response())).into_response()
    }
}

impl From<TokenError> for AdminServiceError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::NotFound { .. } => AdminServiceError::TokenNotFound,
            TokenError::InvalidArgument(msg) => AdminServiceError::InvalidArgument(msg),
            TokenError::ProbeUnavailable(msg) => AdminServiceError::UpstreamUnavailable(msg),
            TokenError::Persist(msg) => AdminServiceError::Internal(msg),
        }
    }
}

impl From<ApiKeyError> for AdminServiceError {
    fn from(e: ApiKeyError) -> Self {
        AdminServiceError::Internal(e.to_string())
    }
}
