//! API Key 管理 HTTP 处理器
//!
//! 提供 API Key 的 CRUD 操作功能

use axum::{Json, extract::State, response::IntoResponse};

use super::{
    extract::ValidJson,
    middleware::AdminState,
    types::{
        CreateApiKeyRequest, DataResponse, DeleteApiKeyRequest, SuccessResponse,
        UpdateApiKeyRequest,
    },
};

/// GET /api/api-keys
/// 获取所有 API Keys（脱敏）
pub async fn get_api_keys(State(state): State<AdminState>) -> impl IntoResponse {
    let keys = state.service.list_api_keys();
    let total = keys.len();
    Json(DataResponse::new(keys).with_total(total))
}

/// POST /api/api-keys/create
/// 创建新 API Key，明文只在这里返回一次
pub async fn create_api_key(
    State(state): State<AdminState>,
    ValidJson(payload): ValidJson<CreateApiKeyRequest>,
) -> impl IntoResponse {
    match state.service.create_api_key(payload) {
        Ok(key) => Json(DataResponse::new(key).with_message("API Key 创建成功")).into_response(),
        Err(e) => (e.status_code(), Json(e.to_error_response())).into_response(),
    }
}

/// PUT /api/api-keys/update
/// 更新 API Key
pub async fn update_api_key(
    State(state): State<AdminState>,
    ValidJson(payload): ValidJson<UpdateApiKeyRequest>,
) -> impl IntoResponse {
    match state.service.update_api_key(payload) {
        Ok(()) => Json(SuccessResponse::new("API Key 更新成功")).into_response(),
        Err(e) => (e.status_code(), Json(e.to_error_response())).into_response(),
    }
}

/// DELETE /api/api-keys/delete
/// 删除 API Key
pub async fn delete_api_key(
    State(state): State<AdminState>,
    ValidJson(payload): ValidJson<DeleteApiKeyRequest>,
) -> impl IntoResponse {
    match state.service.delete_api_key(payload) {
        Ok(()) => Json(SuccessResponse::new("API Key 删除成功")).into_response(),
        Err(e) => (e.status_code(), Json(e.to_error_response())).into_response(),
    }
}

/// GET /api/api-keys/stats
/// 获取 API Key 统计
pub async fn get_api_key_stats(State(state): State<AdminState>) -> impl IntoResponse {
    Json(DataResponse::new(state.service.api_key_stats()))
}
