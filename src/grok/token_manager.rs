//! Token 池管理模块
//!
//! 管理普通 / Super 两个分区的 SSO Token：
//! - 批量添加 / 删除（批次内原子，按分区去重）
//! - 标签、备注、代理配置的定点修改
//! - 额度探测（探测期间不持有分区锁，只在回写时短暂加写锁）
//! - 按派生状态统计
//!
//! 每个分区一把读写锁，读者看到的要么是修改前、要么是修改后的完整条目

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::Mutex as TokioMutex;

use super::error::TokenError;
use super::model::token::{
    RoutingOverrides, StoredToken, TokenEntry, TokenFile, TokenStats, TokenType,
};
use super::probe::{ProbeError, ProbeRequest, QuotaProbe, QuotaReport};
use crate::common::auth::mask_secret;
use crate::model::config::is_valid_proxy_url;
use crate::storage::{Storage, load_typed, save_typed};

/// 持久化使用的 key
const TOKEN_STORAGE_KEY: &str = "token";

/// 探测失败的归类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeFailure {
    /// 本地已标记失效
    Expired,
    /// 本地记录的额度为 0
    Limited,
    /// 本地状态无法解释（被 block 或网络错误，需人工判断）
    Blocked,
    /// 探测期间 Token 已被删除
    Unknown,
}

impl ProbeFailure {
    pub fn message(&self) -> &'static str {
        match self {
            ProbeFailure::Expired => "Token已失效",
            ProbeFailure::Limited => "Token已被限流",
            ProbeFailure::Blocked => "服务器被block或网络错误",
            ProbeFailure::Unknown => "Token数据异常",
        }
    }

    /// 与旧版前端兼容的错误码
    pub fn error_code(&self) -> serde_json::Value {
        match self {
            ProbeFailure::Expired => serde_json::json!(401),
            ProbeFailure::Limited => serde_json::json!("other"),
            ProbeFailure::Blocked => serde_json::json!(403),
            ProbeFailure::Unknown => serde_json::json!("data_error"),
        }
    }
}

/// 探测结果（三态）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// 上游确认可用，额度已回写
    Valid(QuotaReport),
    /// 不可用，本地状态给出了原因
    Invalid(ProbeFailure),
    /// 不可用，原因不明
    Indeterminate(ProbeFailure),
}

/// 用探测前已存储的状态解释探测失败
///
/// 探测失败从不自动把 Token 标记为失效
pub fn classify_probe_failure(entry: Option<&TokenEntry>) -> ProbeOutcome {
    match entry {
        Some(e) if e.expired => ProbeOutcome::Invalid(ProbeFailure::Expired),
        Some(e) if e.has_exhausted_counter() => ProbeOutcome::Invalid(ProbeFailure::Limited),
        Some(_) => ProbeOutcome::Indeterminate(ProbeFailure::Blocked),
        None => ProbeOutcome::Indeterminate(ProbeFailure::Unknown),
    }
}

fn stored_map(entries: &[TokenEntry]) -> BTreeMap<String, StoredToken> {
    entries
        .iter()
        .map(|e| (e.token.clone(), StoredToken::from_entry(e)))
        .collect()
}

/// 两个分区的快照
#[derive(Debug, Clone, Default)]
pub struct TokenSnapshot {
    pub normal: Vec<TokenEntry>,
    pub super_tokens: Vec<TokenEntry>,
}

/// Token 池管理器
pub struct TokenManager {
    normal: RwLock<Vec<TokenEntry>>,
    super_tokens: RwLock<Vec<TokenEntry>>,
    storage: Arc<dyn Storage>,
    probe: Arc<dyn QuotaProbe>,
    /// 全局路由配置（凭据级未配置时回退）
    defaults: RoutingOverrides,
    /// 探测使用的模型
    probe_model: String,
    /// 探测锁（按 Token 分组），同一 Token 同一时间只有一个探测
    probe_locks: DashMap<(TokenType, String), Arc<TokioMutex<()>>>,
    /// 持久化锁，保证后写入的快照不会比先写入的旧
    persist_lock: Mutex<()>,
}

impl TokenManager {
    /// 从存储加载 Token 池（不存在时为空池）
    pub fn load(
        storage: Arc<dyn Storage>,
        probe: Arc<dyn QuotaProbe>,
        defaults: RoutingOverrides,
        probe_model: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let file: TokenFile = load_typed(storage.as_ref(), TOKEN_STORAGE_KEY)?.unwrap_or_default();

        let normal: Vec<TokenEntry> = file
            .normal
            .into_iter()
            .map(|(token, data)| data.into_entry(token, TokenType::Normal))
            .collect();
        let super_tokens: Vec<TokenEntry> = file
            .super_tokens
            .into_iter()
            .map(|(token, data)| data.into_entry(token, TokenType::Super))
            .collect();

        tracing::info!(
            "已加载 Token: 普通 {} 个, Super {} 个",
            normal.len(),
            super_tokens.len()
        );

        Ok(Self {
            normal: RwLock::new(normal),
            super_tokens: RwLock::new(super_tokens),
            storage,
            probe,
            defaults,
            probe_model: probe_model.into(),
            probe_locks: DashMap::new(),
            persist_lock: Mutex::new(()),
        })
    }

    fn partition(&self, token_type: TokenType) -> &RwLock<Vec<TokenEntry>> {
        match token_type {
            TokenType::Normal => &self.normal,
            TokenType::Super => &self.super_tokens,
        }
    }

    /// 在分区副本上修改，写盘成功后再整体替换内存中的分区
    ///
    /// 写盘失败时内存状态保持不变；内容没有变化时不写盘。
    /// 持久化锁串行化所有写者，后写入的快照不会比先写入的旧
    fn commit<R>(
        &self,
        token_type: TokenType,
        f: impl FnOnce(&mut Vec<TokenEntry>) -> Result<R, TokenError>,
    ) -> Result<R, TokenError> {
        let _guard = self.persist_lock.lock();
        let partition = self.partition(token_type);

        let mut next = partition.read().clone();
        let result = f(&mut next)?;
        if *partition.read() == next {
            return Ok(result);
        }

        let file = {
            let other_type = match token_type {
                TokenType::Normal => TokenType::Super,
                TokenType::Super => TokenType::Normal,
            };
            let other = self.partition(other_type).read();
            let (normal, super_tokens) = match token_type {
                TokenType::Normal => (next.as_slice(), other.as_slice()),
                TokenType::Super => (other.as_slice(), next.as_slice()),
            };
            TokenFile {
                normal: stored_map(normal),
                super_tokens: stored_map(super_tokens),
            }
        };

        save_typed(self.storage.as_ref(), TOKEN_STORAGE_KEY, &file).map_err(|e| {
            tracing::warn!("Token 持久化失败: {}", e);
            TokenError::Persist(e.to_string())
        })?;

        *partition.write() = next;
        Ok(result)
    }

    fn validate_routing(routing: &RoutingOverrides) -> Result<(), TokenError> {
        for (name, value) in [
            ("proxy_url", &routing.proxy_url),
            ("cache_proxy_url", &routing.cache_proxy_url),
        ] {
            if let Some(url) = value {
                if !is_valid_proxy_url(url) {
                    return Err(TokenError::InvalidArgument(format!(
                        "{} 格式不正确，应以 http://、https:// 或 socks5:// 开头",
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    /// 对单个 Token 做定点修改
    fn modify_entry<R>(
        &self,
        token_type: TokenType,
        token: &str,
        f: impl FnOnce(&mut TokenEntry) -> R,
    ) -> Result<R, TokenError> {
        self.commit(token_type, |entries| {
            let entry = entries
                .iter_mut()
                .find(|e| e.token == token)
                .ok_or_else(|| TokenError::NotFound {
                    token_type,
                    token: mask_secret(token),
                })?;
            Ok(f(entry))
        })
    }

    // ========================================================================
    // 读取
    // ========================================================================

    /// 获取两个分区的快照
    pub fn list(&self) -> TokenSnapshot {
        TokenSnapshot {
            normal: self.normal.read().clone(),
            super_tokens: self.super_tokens.read().clone(),
        }
    }

    /// 获取单个 Token
    pub fn get(&self, token_type: TokenType, token: &str) -> Option<TokenEntry> {
        self.partition(token_type)
            .read()
            .iter()
            .find(|e| e.token == token)
            .cloned()
    }

    /// 按派生状态统计指定分区（每次实时计算）
    pub fn statistics(&self, token_type: TokenType) -> TokenStats {
        TokenStats::from_entries(self.partition(token_type).read().iter())
    }

    /// 所有分区中出现过的标签（排序去重）
    pub fn all_tags(&self) -> Vec<String> {
        let mut tags = BTreeSet::new();
        for token_type in [TokenType::Normal, TokenType::Super] {
            for entry in self.partition(token_type).read().iter() {
                tags.extend(entry.tags.iter().cloned());
            }
        }
        tags.into_iter().collect()
    }

    // ========================================================================
    // 批量操作
    // ========================================================================

    /// 批量添加 Token
    ///
    /// 同一分区内已存在或批次内重复的 Token 会被跳过，返回真正新增的数量。
    /// 批次中任一项无效时整批拒绝。
    pub fn add(
        &self,
        token_type: TokenType,
        tokens: &[String],
        routing: RoutingOverrides,
    ) -> Result<usize, TokenError> {
        if tokens.is_empty() {
            return Err(TokenError::InvalidArgument("Token 列表不能为空".to_string()));
        }
        let tokens: Vec<&str> = tokens.iter().map(|t| t.trim()).collect();
        if tokens.iter().any(|t| t.is_empty()) {
            return Err(TokenError::InvalidArgument("Token 不能为空字符串".to_string()));
        }
        Self::validate_routing(&routing)?;

        let now = chrono::Utc::now().timestamp();
        let added = self.commit(token_type, |entries| {
            let mut added = 0;
            for token in tokens {
                if entries.iter().any(|e| e.token == token) {
                    continue;
                }
                entries.push(TokenEntry::new(token, token_type, now, routing.clone()));
                added += 1;
            }
            Ok(added)
        })?;

        tracing::info!("添加 Token: {:?}, 新增 {} 个", token_type, added);
        Ok(added)
    }

    /// 批量删除 Token
    ///
    /// 不存在的 Token 不报错，也不计数
    pub fn remove(&self, token_type: TokenType, tokens: &[String]) -> Result<usize, TokenError> {
        if tokens.is_empty() {
            return Err(TokenError::InvalidArgument("Token 列表不能为空".to_string()));
        }
        let targets: BTreeSet<&str> = tokens.iter().map(|t| t.trim()).collect();

        let removed = self.commit(token_type, |entries| {
            let before = entries.len();
            entries.retain(|e| !targets.contains(e.token.as_str()));
            Ok(before - entries.len())
        })?;

        for token in &targets {
            self.probe_locks.remove(&(token_type, token.to_string()));
        }

        tracing::info!("删除 Token: {:?}, 删除 {} 个", token_type, removed);
        Ok(removed)
    }

    // ========================================================================
    // 定点修改
    // ========================================================================

    /// 更新标签（去空白、去重），返回更新后的标签
    pub fn update_tags(
        &self,
        token_type: TokenType,
        token: &str,
        tags: &[String],
    ) -> Result<Vec<String>, TokenError> {
        let tags: BTreeSet<String> = tags
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        self.modify_entry(token_type, token, |entry| {
            entry.tags = tags;
            entry.tags.iter().cloned().collect()
        })
    }

    /// 更新备注
    pub fn update_note(&self, token_type: TokenType, token: &str, note: &str) -> Result<(), TokenError> {
        self.modify_entry(token_type, token, |entry| {
            entry.note = note.to_string();
        })
    }

    /// 整体替换凭据级路由配置（未提供的字段回退到全局配置）
    pub fn update_routing(
        &self,
        token_type: TokenType,
        token: &str,
        routing: RoutingOverrides,
    ) -> Result<(), TokenError> {
        Self::validate_routing(&routing)?;
        self.modify_entry(token_type, token, |entry| {
            entry.routing = routing;
        })
    }

    /// 标记 Token 失效（上游明确拒绝时由请求路径调用）
    ///
    /// 失效是粘性的，之后的额度变化不会恢复状态
    pub fn mark_expired(&self, token_type: TokenType, token: &str) -> Result<(), TokenError> {
        self.modify_entry(token_type, token, |entry| {
            entry.expired = true;
        })?;
        tracing::warn!("Token 已标记失效: {}", mask_secret(token));
        Ok(())
    }

    /// 回写额度计数（None 表示该计数不变）
    pub fn update_quota(
        &self,
        token_type: TokenType,
        token: &str,
        remaining: Option<u64>,
        heavy_remaining: Option<u64>,
    ) -> Result<(), TokenError> {
        self.modify_entry(token_type, token, |entry| {
            if let Some(v) = remaining {
                entry.remaining_queries = Some(v);
            }
            if let Some(v) = heavy_remaining {
                entry.heavy_remaining_queries = Some(v);
            }
        })
    }

    // ========================================================================
    // 额度探测
    // ========================================================================

    /// 探测 Token 可用性
    ///
    /// 网络往返期间不持有任何分区锁；成功时回写剩余额度，
    /// 失败时只根据已存储的状态归类，不会把 Token 标记为失效
    pub async fn probe(&self, token_type: TokenType, token: &str) -> Result<ProbeOutcome, TokenError> {
        let entry = self.get(token_type, token).ok_or_else(|| TokenError::NotFound {
            token_type,
            token: mask_secret(token),
        })?;

        // 获取或创建该 Token 的探测锁（细粒度锁）
        let lock = self
            .probe_locks
            .entry((token_type, entry.token.clone()))
            .or_insert_with(|| Arc::new(TokioMutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let routing = entry.routing.resolve(&self.defaults);
        let request = ProbeRequest {
            auth_token: ProbeRequest::format_auth_token(&entry.token, routing.cf_clearance.as_deref()),
            model: self.probe_model.clone(),
            proxy_url: routing.proxy_url,
        };

        match self.probe.check_limits(&request).await {
            Ok(report) => {
                let updated = match report.remaining {
                    Some(remaining) => self.update_quota(token_type, token, Some(remaining), None),
                    None => Ok(()),
                };
                match updated {
                    Ok(()) => {
                        tracing::debug!("Token 测试成功: {}", mask_secret(token));
                        Ok(ProbeOutcome::Valid(report))
                    }
                    Err(e) if e.is_not_found() => {
                        Ok(ProbeOutcome::Indeterminate(ProbeFailure::Unknown))
                    }
                    Err(e) => Err(e),
                }
            }
            Err(ProbeError::Unavailable(reason)) => {
                tracing::warn!("Token 测试无法发起: {}, {}", mask_secret(token), reason);
                Err(TokenError::ProbeUnavailable(reason))
            }
            Err(e) => {
                tracing::warn!("Token 测试失败: {}, {}", mask_secret(token), e);
                let current = self.get(token_type, token);
                Ok(classify_probe_failure(current.as_ref()))
            }
        }
    }
}
