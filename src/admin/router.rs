//! Admin API 路由配置

use axum::{
    Router, middleware,
    routing::{delete, get, post, put},
};

use super::{
    api_key_handlers::{
        create_api_key, delete_api_key, get_api_key_stats, get_api_keys, update_api_key,
    },
    handlers::{
        add_tokens, all_tags, delete_tokens, list_tokens, login, logout, stats, storage_mode,
        test_token, update_note, update_proxy, update_tags,
    },
    middleware::{AdminState, admin_auth_middleware, cors_layer},
};

/// 创建 Admin API 路由
///
/// # 端点
///
/// ## 会话
/// - `POST /api/login` - 登录（无需认证）
/// - `POST /api/logout` - 登出（会话无效时返回 success: false）
///
/// ## Token 管理
/// - `GET /api/tokens` - 获取 Token 列表
/// - `POST /api/tokens/add` - 批量添加
/// - `POST /api/tokens/delete` - 批量删除
/// - `POST /api/tokens/tags` - 更新标签
/// - `GET /api/tokens/tags/all` - 获取所有标签
/// - `POST /api/tokens/note` - 更新备注
/// - `POST /api/tokens/proxy` - 更新代理配置
/// - `POST /api/tokens/test` - 测试可用性
/// - `GET /api/stats` - 统计信息
/// - `GET /api/storage/mode` - 存储模式
///
/// ## API Key 管理
/// - `GET /api/api-keys` - 获取所有 API Keys（脱敏）
/// - `POST /api/api-keys/create` - 创建
/// - `PUT /api/api-keys/update` - 更新
/// - `DELETE /api/api-keys/delete` - 删除
/// - `GET /api/api-keys/stats` - 统计
///
/// # 认证
/// 除登录 / 登出外都需要 `Authorization: Bearer <session>` 头
pub fn create_admin_router(state: AdminState) -> Router {
    let protected_routes = Router::new()
        // Token 管理
        .route("/api/tokens", get(list_tokens))
        .route("/api/tokens/add", post(add_tokens))
        .route("/api/tokens/delete", post(delete_tokens))
        .route("/api/tokens/tags", post(update_tags))
        .route("/api/tokens/tags/all", get(all_tags))
        .route("/api/tokens/note", post(update_note))
        .route("/api/tokens/proxy", post(update_proxy))
        .route("/api/tokens/test", post(test_token))
        .route("/api/stats", get(stats))
        .route("/api/storage/mode", get(storage_mode))
        // API Key 管理
        .route("/api/api-keys", get(get_api_keys))
        .route("/api/api-keys/create", post(create_api_key))
        .route("/api/api-keys/update", put(update_api_key))
        .route("/api/api-keys/delete", delete(delete_api_key))
        .route("/api/api-keys/stats", get(get_api_key_stats))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ));

    let public_routes = Router::new()
        .route("/api/login", post(login))
        .route("/api/logout", post(logout));

    Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .layer(cors_layer())
        .with_state(state)
}
