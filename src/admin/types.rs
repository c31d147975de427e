//! Admin API 类型定义
//!
//! 字段名沿用 snake_case，与现有管理前端保持兼容

use serde::{Deserialize, Deserializer, Serialize};

use crate::grok::model::token::{TokenEntry, TokenStats, TokenStatus, quota_sentinel};
use crate::grok::token_manager::ProbeFailure;

// ============ 登录 ============

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl LoginResponse {
    pub fn ok(token: String) -> Self {
        Self {
            success: true,
            token: Some(token),
            message: "登录成功".to_string(),
            code: None,
        }
    }

    pub fn invalid_credentials() -> Self {
        Self {
            success: false,
            token: None,
            message: "用户名或密码错误".to_string(),
            code: Some("INVALID_CREDENTIALS".to_string()),
        }
    }
}

// ============ Token 管理 ============

#[derive(Debug, Deserialize)]
pub struct AddTokensRequest {
    pub tokens: Vec<String>,
    pub token_type: String,
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub cache_proxy_url: Option<String>,
    #[serde(default)]
    pub cf_clearance: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteTokensRequest {
    pub tokens: Vec<String>,
    pub token_type: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTokenTagsRequest {
    pub token: String,
    pub token_type: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTokenNoteRequest {
    pub token: String,
    pub token_type: String,
    pub note: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTokenProxyRequest {
    pub token: String,
    pub token_type: String,
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub cache_proxy_url: Option<String>,
    #[serde(default)]
    pub cf_clearance: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TestTokenRequest {
    pub token: String,
    pub token_type: String,
}

/// 单个 Token 信息
#[derive(Debug, Serialize)]
pub struct TokenInfo {
    pub token: String,
    pub token_type: &'static str,
    pub created_time: Option<i64>,
    /// -1 表示从未使用
    #[serde(with = "quota_sentinel")]
    pub remaining_queries: Option<u64>,
    #[serde(with = "quota_sentinel")]
    pub heavy_remaining_queries: Option<u64>,
    pub status: TokenStatus,
    pub tags: Vec<String>,
    pub note: String,
    pub proxy_url: String,
    pub cache_proxy_url: String,
    pub cf_clearance: String,
}

impl From<&TokenEntry> for TokenInfo {
    fn from(entry: &TokenEntry) -> Self {
        Self {
            token: entry.token.clone(),
            token_type: entry.token_type.as_wire(),
            created_time: entry.created_time,
            remaining_queries: entry.remaining_queries,
            heavy_remaining_queries: entry.heavy_remaining_queries,
            status: entry.status(),
            tags: entry.tags.iter().cloned().collect(),
            note: entry.note.clone(),
            proxy_url: entry.routing.proxy_url.clone().unwrap_or_default(),
            cache_proxy_url: entry.routing.cache_proxy_url.clone().unwrap_or_default(),
            cf_clearance: entry.routing.cf_clearance.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TokenListResponse {
    pub success: bool,
    pub data: Vec<TokenInfo>,
    pub total: usize,
}

/// 批量添加 / 删除响应
#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub success: bool,
    pub message: String,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct TagsResponse {
    pub success: bool,
    pub message: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct NoteResponse {
    pub success: bool,
    pub message: String,
    pub note: String,
}

#[derive(Debug, Serialize)]
pub struct ProxyResponse {
    pub success: bool,
    pub message: String,
    pub proxy_url: String,
    pub cache_proxy_url: String,
    pub cf_clearance: String,
}

/// Token 测试结果
#[derive(Debug, Serialize)]
pub struct TestTokenData {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_queries: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ProbeFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct TestTokenResponse {
    pub success: bool,
    pub message: String,
    pub data: TestTokenData,
}

/// 两个分区的统计
#[derive(Debug, Serialize)]
pub struct StatsData {
    pub normal: TokenStats,
    #[serde(rename = "super")]
    pub super_tokens: TokenStats,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct StorageModeData {
    pub mode: &'static str,
}

// ============ API Key 管理 ============

#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
    #[serde(default)]
    pub note: String,
    /// 过期时间（Unix 秒）
    #[serde(default)]
    pub expire_time: Option<i64>,
    #[serde(default)]
    pub ip_whitelist: Option<Vec<String>>,
}

/// 可以修改的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyStatusUpdate {
    Active,
    Disabled,
}

#[derive(Debug, Deserialize)]
pub struct UpdateApiKeyRequest {
    /// 完整 Key 或指纹
    pub key: String,
    #[serde(default)]
    pub note: Option<String>,
    /// - 不传此字段：不修改
    /// - 传 null：清除（永不过期）
    /// - 传数字：设置
    #[serde(default, deserialize_with = "deserialize_optional_nullable")]
    pub expire_time: Option<Option<i64>>,
    #[serde(default, deserialize_with = "deserialize_optional_nullable")]
    pub ip_whitelist: Option<Option<Vec<String>>>,
    #[serde(default)]
    pub status: Option<ApiKeyStatusUpdate>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteApiKeyRequest {
    /// 完整 Key 或指纹
    pub key: String,
}

/// 自定义反序列化器，用于区分 "字段不存在" 和 "字段为 null"
/// - 字段不存在 -> None（不修改）
/// - 字段为 null -> Some(None)（清除）
/// - 字段有值 -> Some(Some(value))（设置）
fn deserialize_optional_nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let value: Option<T> = Option::deserialize(deserializer)?;
    Ok(Some(value))
}

// ============ 通用响应 ============

/// 带数据的成功响应
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
}

impl<T: Serialize> DataResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data,
            total: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_total(mut self, total: usize) -> Self {
        self.total = Some(total);
        self
    }
}

/// 操作结果响应
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

impl SuccessResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// 软失败（HTTP 200，success = false）
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// 错误响应
#[derive(Debug, Serialize)]
pub struct AdminErrorResponse {
    pub detail: AdminError,
}

#[derive(Debug, Serialize)]
pub struct AdminError {
    pub error: String,
    pub code: &'static str,
}

impl AdminErrorResponse {
    pub fn new(error: impl Into<String>, code: &'static str) -> Self {
        Self {
            detail: AdminError {
                error: error.into(),
                code,
            },
        }
    }
}
