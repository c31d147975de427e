//! Admin API HTTP 处理器
//!
//! 提供登录 / 登出和 Token 管理相关的 HTTP 处理器

use axum::{
    Json,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
};

use super::{
    extract::ValidJson,
    middleware::AdminState,
    types::{
        AddTokensRequest, DataResponse, DeleteTokensRequest, LoginRequest, TestTokenRequest,
        UpdateTokenNoteRequest, UpdateTokenProxyRequest, UpdateTokenTagsRequest,
    },
};
use crate::common::auth;

/// POST /api/login
/// 管理员登录
pub async fn login(
    State(state): State<AdminState>,
    ValidJson(payload): ValidJson<LoginRequest>,
) -> impl IntoResponse {
    match state.service.login(&payload) {
        Ok(response) => Json(response).into_response(),
        Err(e) => (e.status_code(), Json(e.to_error_response())).into_response(),
    }
}

/// POST /api/logout
/// 管理员登出（会话无效时返回 success: false）
pub async fn logout(State(state): State<AdminState>, headers: HeaderMap) -> impl IntoResponse {
    let session_id = auth::extract_bearer_token(&headers);
    Json(state.service.logout(session_id.as_deref()))
}

/// GET /api/tokens
/// 获取 Token 列表
pub async fn list_tokens(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.service.list_tokens())
}

/// POST /api/tokens/add
/// 批量添加 Token
pub async fn add_tokens(
    State(state): State<AdminState>,
    ValidJson(payload): ValidJson<AddTokensRequest>,
) -> impl IntoResponse {
    match state.service.add_tokens(payload) {
        Ok(response) => Json(response).into_response(),
        Err(e) => (e.status_code(), Json(e.to_error_response())).into_response(),
    }
}

/// POST /api/tokens/delete
/// 批量删除 Token
pub async fn delete_tokens(
    State(state): State<AdminState>,
    ValidJson(payload): ValidJson<DeleteTokensRequest>,
) -> impl IntoResponse {
    match state.service.delete_tokens(payload) {
        Ok(response) => Json(response).into_response(),
        Err(e) => (e.status_code(), Json(e.to_error_response())).into_response(),
    }
}

/// POST /api/tokens/tags
/// 更新 Token 标签
pub async fn update_tags(
    State(state): State<AdminState>,
    ValidJson(payload): ValidJson<UpdateTokenTagsRequest>,
) -> impl IntoResponse {
    match state.service.update_tags(payload) {
        Ok(response) => Json(response).into_response(),
        Err(e) => (e.status_code(), Json(e.to_error_response())).into_response(),
    }
}

/// GET /api/tokens/tags/all
/// 获取所有标签
pub async fn all_tags(State(state): State<AdminState>) -> impl IntoResponse {
    Json(DataResponse::new(state.service.all_tags()))
}

/// POST /api/tokens/note
/// 更新 Token 备注
pub async fn update_note(
    State(state): State<AdminState>,
    ValidJson(payload): ValidJson<UpdateTokenNoteRequest>,
) -> impl IntoResponse {
    match state.service.update_note(payload) {
        Ok(response) => Json(response).into_response(),
        Err(e) => (e.status_code(), Json(e.to_error_response())).into_response(),
    }
}

/// POST /api/tokens/proxy
/// 更新 Token 代理配置
pub async fn update_proxy(
    State(state): State<AdminState>,
    ValidJson(payload): ValidJson<UpdateTokenProxyRequest>,
) -> impl IntoResponse {
    match state.service.update_proxy(payload) {
        Ok(response) => Json(response).into_response(),
        Err(e) => (e.status_code(), Json(e.to_error_response())).into_response(),
    }
}

/// POST /api/tokens/test
/// 测试 Token 可用性
pub async fn test_token(
    State(state): State<AdminState>,
    ValidJson(payload): ValidJson<TestTokenRequest>,
) -> impl IntoResponse {
    match state.service.test_token(payload).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => (e.status_code(), Json(e.to_error_response())).into_response(),
    }
}

/// GET /api/stats
/// 获取统计信息
pub async fn stats(State(state): State<AdminState>) -> impl IntoResponse {
    Json(DataResponse::new(state.service.stats()))
}

/// GET /api/storage/mode
/// 获取存储模式
pub async fn storage_mode(State(state): State<AdminState>) -> impl IntoResponse {
    Json(DataResponse::new(state.service.storage_mode()))
}
