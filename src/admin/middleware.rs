//! Admin API 中间件

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::service::AdminService;
use crate::common::auth;

/// Admin API 共享状态
#[derive(Clone)]
pub struct AdminState {
    /// Admin 服务
    pub service: Arc<AdminService>,
}

impl AdminState {
    pub fn new(service: AdminService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

/// 会话认证中间件
///
/// 会话缺失、伪造、过期统一返回 401 UNAUTHORIZED
pub async fn admin_auth_middleware(
    State(state): State<AdminState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let session_id = auth::extract_bearer_token(request.headers());

    match state.service.authenticate(session_id.as_deref()) {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

/// CORS 中间件层
///
/// 管理前端可能与服务不同源部署，允许任何来源、方法和请求头
pub fn cors_layer() -> tower_http::cors::CorsLayer {
    use tower_http::cors::{Any, CorsLayer};

    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}
