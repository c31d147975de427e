//! Admin API 业务逻辑服务
//!
//! 登录 / 登出 / 会话校验，以及对 Token 池和 API Key 的增删改查

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use moka::sync::Cache;

use super::api_keys::{ApiKeyCreated, ApiKeyManager, ApiKeyMasked, ApiKeyStats, ApiKeyUpdate};
use super::error::AdminServiceError;
use super::session::{SessionState, SessionStore};
use super::types::{
    AddTokensRequest, ApiKeyStatusUpdate, BatchResponse, CreateApiKeyRequest, DeleteApiKeyRequest,
    DeleteTokensRequest, LoginRequest, LoginResponse, NoteResponse, ProxyResponse, StatsData,
    StorageModeData, SuccessResponse, TagsResponse, TestTokenData, TestTokenRequest,
    TestTokenResponse, TokenInfo, TokenListResponse, UpdateApiKeyRequest, UpdateTokenNoteRequest,
    UpdateTokenProxyRequest, UpdateTokenTagsRequest,
};
use crate::common::auth::{constant_time_eq, mask_secret};
use crate::grok::TokenManager;
use crate::grok::model::token::{RoutingOverrides, TokenType};
use crate::grok::token_manager::ProbeOutcome;
use crate::storage::StorageMode;

/// 登录失败计数的最大缓存条目数
const LOGIN_FAILURE_CACHE_CAPACITY: u64 = 10_000;

/// 管理员凭据与登录限制
#[derive(Debug, Clone)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
    /// 窗口期内允许的最大连续失败次数
    pub max_login_failures: u32,
    /// 失败计数窗口（从第一次失败开始计算）
    pub lockout: Duration,
}

/// 解析请求中的 Token 类型
fn parse_token_type(value: &str) -> Result<TokenType, AdminServiceError> {
    TokenType::from_wire(value).ok_or(AdminServiceError::InvalidTokenType)
}

/// Admin 服务
pub struct AdminService {
    sessions: Arc<SessionStore>,
    token_manager: Arc<TokenManager>,
    api_keys: Arc<ApiKeyManager>,
    credentials: AdminCredentials,
    storage_mode: StorageMode,
    /// 用户名 -> 连续失败次数（TTL 到期自动清零）
    login_failures: Cache<String, Arc<AtomicU32>>,
}

impl AdminService {
    pub fn new(
        sessions: Arc<SessionStore>,
        token_manager: Arc<TokenManager>,
        api_keys: Arc<ApiKeyManager>,
        credentials: AdminCredentials,
        storage_mode: StorageMode,
    ) -> Self {
        let login_failures = Cache::builder()
            .max_capacity(LOGIN_FAILURE_CACHE_CAPACITY)
            .time_to_live(credentials.lockout)
            .build();

        Self {
            sessions,
            token_manager,
            api_keys,
            credentials,
            storage_mode,
            login_failures,
        }
    }

    // ========================================================================
    // 会话
    // ========================================================================

    /// 管理员登录
    ///
    /// 用户名和密码都做常量时间比较，失败时不区分哪一项错误
    pub fn login(&self, req: &LoginRequest) -> Result<LoginResponse, AdminServiceError> {
        tracing::debug!("登录尝试: {}", req.username);

        let failures = self.login_failures.get(&req.username);
        if let Some(count) = &failures {
            if count.load(Ordering::SeqCst) >= self.credentials.max_login_failures {
                tracing::warn!("登录被锁定: {}", req.username);
                return Err(AdminServiceError::TooManyAttempts);
            }
        }

        // 两项都比较，避免短路泄露时序信息
        let user_ok = constant_time_eq(&req.username, &self.credentials.username);
        let pass_ok = constant_time_eq(&req.password, &self.credentials.password);
        let configured = !self.credentials.password.trim().is_empty();

        if !(user_ok & pass_ok & configured) {
            let counter = self
                .login_failures
                .get_with(req.username.clone(), || Arc::new(AtomicU32::new(0)));
            let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::warn!("登录失败: {} (连续 {} 次)", req.username, count);
            return Ok(LoginResponse::invalid_credentials());
        }

        self.login_failures.invalidate(&req.username);
        let session_id = self.sessions.create();
        tracing::info!("管理员登录成功: {}", req.username);
        Ok(LoginResponse::ok(session_id))
    }

    /// 校验会话（除登录外的所有接口）
    pub fn authenticate(&self, session_id: Option<&str>) -> Result<(), AdminServiceError> {
        let Some(id) = session_id else {
            return Err(AdminServiceError::Unauthorized);
        };
        match self.sessions.check(id) {
            SessionState::Valid => Ok(()),
            state => {
                tracing::debug!("会话校验失败: {:?}", state);
                Err(AdminServiceError::Unauthorized)
            }
        }
    }

    /// 管理员登出（会话已无效时返回软失败）
    pub fn logout(&self, session_id: Option<&str>) -> SuccessResponse {
        match session_id {
            Some(id) if self.sessions.revoke(id) => {
                tracing::debug!("登出成功");
                SuccessResponse::new("登出成功")
            }
            _ => {
                tracing::warn!("登出失败: 无效会话");
                SuccessResponse::failure("无效的会话")
            }
        }
    }

    // ========================================================================
    // Token 管理
    // ========================================================================

    /// 获取所有 Token（普通在前，Super 在后）
    pub fn list_tokens(&self) -> TokenListResponse {
        let snapshot = self.token_manager.list();
        let data: Vec<TokenInfo> = snapshot
            .normal
            .iter()
            .chain(snapshot.super_tokens.iter())
            .map(TokenInfo::from)
            .collect();

        tracing::debug!("Token 列表获取成功: {} 个", data.len());
        TokenListResponse {
            success: true,
            total: data.len(),
            data,
        }
    }

    pub fn add_tokens(&self, req: AddTokensRequest) -> Result<BatchResponse, AdminServiceError> {
        let token_type = parse_token_type(&req.token_type)?;
        let routing = RoutingOverrides::new(req.proxy_url, req.cache_proxy_url, req.cf_clearance);
        let count = self.token_manager.add(token_type, &req.tokens, routing)?;

        Ok(BatchResponse {
            success: true,
            message: format!("成功添加 {} 个Token", count),
            count,
        })
    }

    pub fn delete_tokens(&self, req: DeleteTokensRequest) -> Result<BatchResponse, AdminServiceError> {
        let token_type = parse_token_type(&req.token_type)?;
        let count = self.token_manager.remove(token_type, &req.tokens)?;

        Ok(BatchResponse {
            success: true,
            message: format!("成功删除 {} 个Token", count),
            count,
        })
    }

    pub fn update_tags(&self, req: UpdateTokenTagsRequest) -> Result<TagsResponse, AdminServiceError> {
        let token_type = parse_token_type(&req.token_type)?;
        let tags = self.token_manager.update_tags(token_type, &req.token, &req.tags)?;
        tracing::debug!("Token 标签更新成功: {}", mask_secret(&req.token));

        Ok(TagsResponse {
            success: true,
            message: "标签更新成功".to_string(),
            tags,
        })
    }

    pub fn all_tags(&self) -> Vec<String> {
        self.token_manager.all_tags()
    }

    pub fn update_note(&self, req: UpdateTokenNoteRequest) -> Result<NoteResponse, AdminServiceError> {
        let token_type = parse_token_type(&req.token_type)?;
        self.token_manager.update_note(token_type, &req.token, &req.note)?;
        tracing::debug!("Token 备注更新成功: {}", mask_secret(&req.token));

        Ok(NoteResponse {
            success: true,
            message: "备注更新成功".to_string(),
            note: req.note,
        })
    }

    pub fn update_proxy(&self, req: UpdateTokenProxyRequest) -> Result<ProxyResponse, AdminServiceError> {
        let token_type = parse_token_type(&req.token_type)?;
        let routing = RoutingOverrides::new(req.proxy_url, req.cache_proxy_url, req.cf_clearance);
        self.token_manager
            .update_routing(token_type, &req.token, routing.clone())?;
        tracing::debug!("Token 代理配置更新成功: {}", mask_secret(&req.token));

        Ok(ProxyResponse {
            success: true,
            message: "代理配置更新成功".to_string(),
            proxy_url: routing.proxy_url.unwrap_or_default(),
            cache_proxy_url: routing.cache_proxy_url.unwrap_or_default(),
            cf_clearance: routing.cf_clearance.unwrap_or_default(),
        })
    }

    /// 测试 Token 可用性
    pub async fn test_token(&self, req: TestTokenRequest) -> Result<TestTokenResponse, AdminServiceError> {
        let token_type = parse_token_type(&req.token_type)?;
        let outcome = self.token_manager.probe(token_type, &req.token).await?;

        let to_wire = |v: Option<u64>| v.and_then(|v| i64::try_from(v).ok()).unwrap_or(-1);

        let response = match outcome {
            ProbeOutcome::Valid(report) => TestTokenResponse {
                success: true,
                message: "Token有效".to_string(),
                data: TestTokenData {
                    valid: true,
                    remaining_queries: Some(to_wire(report.remaining)),
                    limit: Some(to_wire(report.limit)),
                    error_type: None,
                    error_code: None,
                },
            },
            ProbeOutcome::Invalid(failure) | ProbeOutcome::Indeterminate(failure) => {
                TestTokenResponse {
                    success: false,
                    message: failure.message().to_string(),
                    data: TestTokenData {
                        valid: false,
                        remaining_queries: None,
                        limit: None,
                        error_type: Some(failure),
                        error_code: Some(failure.error_code()),
                    },
                }
            }
        };
        Ok(response)
    }

    /// 两个分区的统计
    pub fn stats(&self) -> StatsData {
        let normal = self.token_manager.statistics(TokenType::Normal);
        let super_tokens = self.token_manager.statistics(TokenType::Super);
        tracing::debug!(
            "统计信息 - 普通Token: {}, Super Token: {}",
            normal.total,
            super_tokens.total
        );

        StatsData {
            total: normal.total + super_tokens.total,
            normal,
            super_tokens,
        }
    }

    pub fn storage_mode(&self) -> StorageModeData {
        StorageModeData {
            mode: self.storage_mode.as_upper_str(),
        }
    }

    // ========================================================================
    // API Key 管理
    // ========================================================================

    pub fn list_api_keys(&self) -> Vec<ApiKeyMasked> {
        self.api_keys.list()
    }

    pub fn create_api_key(&self, req: CreateApiKeyRequest) -> Result<ApiKeyCreated, AdminServiceError> {
        Ok(self.api_keys.issue(req.note, req.expire_time, req.ip_whitelist)?)
    }

    pub fn update_api_key(&self, req: UpdateApiKeyRequest) -> Result<(), AdminServiceError> {
        let update = ApiKeyUpdate {
            note: req.note,
            expire_time: req.expire_time,
            ip_whitelist: req.ip_whitelist,
            disabled: req.status.map(|s| s == ApiKeyStatusUpdate::Disabled),
        };

        if self.api_keys.update(&req.key, update)? {
            Ok(())
        } else {
            Err(AdminServiceError::ApiKeyNotFound)
        }
    }

    pub fn delete_api_key(&self, req: DeleteApiKeyRequest) -> Result<(), AdminServiceError> {
        if self.api_keys.revoke(&req.key)? {
            Ok(())
        } else {
            Err(AdminServiceError::ApiKeyNotFound)
        }
    }

    pub fn api_key_stats(&self) -> ApiKeyStats {
        self.api_keys.statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grok::probe::{ProbeError, ProbeRequest, QuotaProbe, QuotaReport};
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;

    struct RejectingProbe;

    #[async_trait]
    impl QuotaProbe for RejectingProbe {
        async fn check_limits(&self, _request: &ProbeRequest) -> Result<QuotaReport, ProbeError> {
            Err(ProbeError::Rejected { status: 403 })
        }
    }

    fn admin_service(max_failures: u32) -> AdminService {
        let storage = Arc::new(MemoryStorage::new());
        let token_manager = TokenManager::load(
            storage.clone(),
            Arc::new(RejectingProbe),
            RoutingOverrides::default(),
            "grok-4-fast",
        )
        .unwrap();
        let api_keys = ApiKeyManager::load(storage).unwrap();

        AdminService::new(
            Arc::new(SessionStore::with_ttl_hours(24)),
            Arc::new(token_manager),
            Arc::new(api_keys),
            AdminCredentials {
                username: "admin".to_string(),
                password: "secret".to_string(),
                max_login_failures: max_failures,
                lockout: Duration::from_secs(900),
            },
            StorageMode::Memory,
        )
    }

    fn login(service: &AdminService, username: &str, password: &str) -> Result<LoginResponse, AdminServiceError> {
        service.login(&LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    #[test]
    fn test_login_logout_flow() {
        let service = admin_service(5);

        let resp = login(&service, "admin", "secret").unwrap();
        assert!(resp.success);
        let token = resp.token.unwrap();
        assert!(service.authenticate(Some(&token)).is_ok());

        let resp = service.logout(Some(&token));
        assert!(resp.success);
        assert!(matches!(
            service.authenticate(Some(&token)),
            Err(AdminServiceError::Unauthorized)
        ));

        // 再次登出是软失败
        let resp = service.logout(Some(&token));
        assert!(!resp.success);
        assert_eq!(resp.message, "无效的会话");
    }

    #[test]
    fn test_login_failure_does_not_reveal_field() {
        let service = admin_service(5);
        let wrong_user = login(&service, "root", "secret").unwrap();
        let wrong_pass = login(&service, "admin", "nope").unwrap();

        assert!(!wrong_user.success);
        assert!(wrong_user.token.is_none());
        assert_eq!(wrong_user.message, wrong_pass.message);
        assert_eq!(wrong_user.code, wrong_pass.code);
    }

    #[test]
    fn test_login_lockout_and_reset() {
        let service = admin_service(2);

        assert!(!login(&service, "admin", "x").unwrap().success);
        assert!(!login(&service, "admin", "y").unwrap().success);

        // 锁定后正确密码也被拒绝
        assert!(matches!(
            login(&service, "admin", "secret"),
            Err(AdminServiceError::TooManyAttempts)
        ));

        // 其他用户名不受影响
        assert!(!login(&service, "other", "x").unwrap().success);

        // 成功登录会清零计数
        let service = admin_service(2);
        assert!(!login(&service, "admin", "x").unwrap().success);
        assert!(login(&service, "admin", "secret").unwrap().success);
        assert!(!login(&service, "admin", "x").unwrap().success);
        assert!(!login(&service, "admin", "y").unwrap().success);
        assert!(matches!(
            login(&service, "admin", "z"),
            Err(AdminServiceError::TooManyAttempts)
        ));
    }

    #[test]
    fn test_empty_password_never_logs_in() {
        let mut service = admin_service(5);
        service.credentials.password = String::new();
        assert!(!login(&service, "admin", "").unwrap().success);
    }

    #[test]
    fn test_whitespace_password_never_logs_in() {
        let mut service = admin_service(5);
        service.credentials.password = "   ".to_string();
        let resp = login(&service, "admin", "   ").unwrap();
        assert!(!resp.success);
        assert!(resp.token.is_none());
    }

    #[test]
    fn test_missing_session_is_unauthorized() {
        let service = admin_service(5);
        assert!(matches!(
            service.authenticate(None),
            Err(AdminServiceError::Unauthorized)
        ));
        assert!(matches!(
            service.authenticate(Some("forged")),
            Err(AdminServiceError::Unauthorized)
        ));
    }

    #[test]
    fn test_invalid_token_type_rejected_before_mutation() {
        let service = admin_service(5);
        let err = service
            .add_tokens(AddTokensRequest {
                tokens: vec!["a".to_string()],
                token_type: "sso_heavy".to_string(),
                proxy_url: None,
                cache_proxy_url: None,
                cf_clearance: None,
            })
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_TYPE");
        assert_eq!(service.stats().total, 0);
    }

    #[tokio::test]
    async fn test_token_flow() {
        let service = admin_service(5);
        let resp = service
            .add_tokens(AddTokensRequest {
                tokens: vec!["a".to_string(), "b".to_string(), "a".to_string()],
                token_type: "ssoSuper".to_string(),
                proxy_url: Some("http://p:1".to_string()),
                cache_proxy_url: None,
                cf_clearance: None,
            })
            .unwrap();
        assert_eq!(resp.count, 2);

        let list = service.list_tokens();
        assert_eq!(list.total, 2);
        assert!(list.data.iter().all(|t| t.proxy_url == "http://p:1"));

        let resp = service
            .test_token(TestTokenRequest {
                token: "a".to_string(),
                token_type: "ssoSuper".to_string(),
            })
            .await
            .unwrap();
        assert!(!resp.success);
        assert_eq!(resp.data.error_code, Some(serde_json::json!(403)));

        let err = service
            .update_note(UpdateTokenNoteRequest {
                token: "a".to_string(),
                token_type: "sso".to_string(),
                note: "x".to_string(),
            })
            .unwrap_err();
        assert_eq!(err.code(), "TOKEN_NOT_FOUND");

        let stats = service.stats();
        assert_eq!(stats.super_tokens.unused, 2);
        assert_eq!(stats.total, 2);
        assert_eq!(service.storage_mode().mode, "MEMORY");
    }

    #[test]
    fn test_api_key_flow() {
        let service = admin_service(5);
        let created = service
            .create_api_key(CreateApiKeyRequest {
                note: "client".to_string(),
                expire_time: None,
                ip_whitelist: None,
            })
            .unwrap();

        service
            .update_api_key(UpdateApiKeyRequest {
                key: created.fingerprint.clone(),
                note: None,
                expire_time: None,
                ip_whitelist: None,
                status: Some(ApiKeyStatusUpdate::Disabled),
            })
            .unwrap();
        assert_eq!(service.api_key_stats().disabled, 1);

        service
            .delete_api_key(DeleteApiKeyRequest { key: created.key.clone() })
            .unwrap();
        let err = service
            .delete_api_key(DeleteApiKeyRequest { key: created.key })
            .unwrap_err();
        assert_eq!(err.code(), "API_KEY_NOT_FOUND");
        assert!(service.list_api_keys().is_empty());
    }
}
