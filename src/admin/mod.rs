//! Admin API 模块
//!
//! 提供管理员会话、Token 池管理和 API Key 管理功能的 HTTP API
//!
//! # 功能
//! - 管理员登录 / 登出（会话 24 小时有效，惰性过期）
//! - Token 批量添加 / 删除，标签、备注、代理配置修改
//! - Token 可用性测试与统计
//! - API Key 管理（签发、修改、吊销、统计）
//!
//! # 使用
//! ```ignore
//! let admin_service = AdminService::new(sessions, token_manager, api_keys, credentials, mode);
//! let admin_router = create_admin_router(AdminState::new(admin_service));
//! ```

pub mod api_keys;
mod api_key_handlers;
pub mod error;
mod extract;
mod handlers;
mod middleware;
mod router;
pub mod service;
pub mod session;
pub mod types;

pub use api_keys::ApiKeyManager;
pub use error::AdminServiceError;
pub use middleware::AdminState;
pub use router::create_admin_router;
pub use service::{AdminCredentials, AdminService};
pub use session::SessionStore;
