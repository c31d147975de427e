//! API Key 管理模块
//!
//! 下游调用方使用的 API Key：签发、修改、吊销、鉴权。
//! 状态（active / disabled / expired）每次读取时计算，不落盘。

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::common::auth::mask_secret;
use crate::storage::{Storage, load_typed, save_typed};

/// 持久化使用的 key
const API_KEYS_STORAGE_KEY: &str = "api_keys";

/// Key 前缀
const KEY_PREFIX: &str = "sk-";

/// 随机部分长度
const KEY_RANDOM_LEN: usize = 48;

/// 生成碰撞时的最大重试次数
const MAX_GENERATE_ATTEMPTS: usize = 5;

/// API Key 操作错误
#[derive(Debug, Error)]
pub enum ApiKeyError {
    /// 多次生成都与已有 Key 重复
    #[error("生成 API Key 失败：多次重试仍然冲突")]
    GenerationExhausted,

    #[error("保存失败: {0}")]
    Persist(String),
}

/// API Key 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyStatus {
    Active,
    Disabled,
    Expired,
}

/// 根据过期时间和禁用标记派生状态（过期优先于禁用）
pub fn derive_api_key_status(expire_time: Option<i64>, disabled: bool, now: i64) -> ApiKeyStatus {
    match expire_time {
        Some(t) if now > t => ApiKeyStatus::Expired,
        _ if disabled => ApiKeyStatus::Disabled,
        _ => ApiKeyStatus::Active,
    }
}

/// API Key 条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    pub key: String,
    #[serde(default)]
    pub note: String,
    /// 过期时间（Unix 秒，None = 永不过期）
    #[serde(default)]
    pub expire_time: Option<i64>,
    /// 来源 IP 白名单（空 = 不限制）
    #[serde(default)]
    pub ip_whitelist: Vec<String>,
    pub created_time: i64,
    #[serde(default)]
    pub last_used_time: Option<i64>,
    #[serde(default)]
    pub disabled: bool,
}

impl ApiKey {
    pub fn status_at(&self, now: i64) -> ApiKeyStatus {
        derive_api_key_status(self.expire_time, self.disabled, now)
    }

    pub fn status(&self) -> ApiKeyStatus {
        self.status_at(chrono::Utc::now().timestamp())
    }

    /// Key 的稳定指纹（SHA-256 前 16 个十六进制字符）
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.key)
    }

    fn matches(&self, ident: &str) -> bool {
        self.key == ident || fingerprint(&self.key) == ident
    }
}

/// 计算 Key 指纹
pub fn fingerprint(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(&digest[..8])
}

/// API Key 脱敏显示（列表接口使用，不包含明文）
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyMasked {
    /// 脱敏后的 Key（只显示前缀和 8 位随机字符）
    pub key: String,
    pub fingerprint: String,
    pub note: String,
    pub expire_time: Option<i64>,
    pub ip_whitelist: Vec<String>,
    pub created_time: i64,
    pub last_used_time: Option<i64>,
    pub status: ApiKeyStatus,
}

impl From<&ApiKey> for ApiKeyMasked {
    fn from(key: &ApiKey) -> Self {
        let visible = KEY_PREFIX.len() + 8;
        let masked_key = match key.key.get(..visible) {
            Some(head) if key.key.len() > visible => format!("{}***", head),
            _ => "***".to_string(),
        };

        Self {
            key: masked_key,
            fingerprint: key.fingerprint(),
            note: key.note.clone(),
            expire_time: key.expire_time,
            ip_whitelist: key.ip_whitelist.clone(),
            created_time: key.created_time,
            last_used_time: key.last_used_time,
            status: key.status(),
        }
    }
}

/// 新签发的 API Key（包含明文，仅在创建时返回一次）
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyCreated {
    pub key: String,
    pub fingerprint: String,
    pub note: String,
    pub expire_time: Option<i64>,
    pub ip_whitelist: Vec<String>,
    pub created_time: i64,
    pub status: ApiKeyStatus,
}

impl From<&ApiKey> for ApiKeyCreated {
    fn from(key: &ApiKey) -> Self {
        Self {
            key: key.key.clone(),
            fingerprint: key.fingerprint(),
            note: key.note.clone(),
            expire_time: key.expire_time,
            ip_whitelist: key.ip_whitelist.clone(),
            created_time: key.created_time,
            status: key.status(),
        }
    }
}

/// 局部更新
///
/// 外层 None 表示不修改；`expire_time` / `ip_whitelist` 的 `Some(None)` 表示清除
#[derive(Debug, Clone, Default)]
pub struct ApiKeyUpdate {
    pub note: Option<String>,
    pub expire_time: Option<Option<i64>>,
    pub ip_whitelist: Option<Option<Vec<String>>>,
    pub disabled: Option<bool>,
}

/// API Key 统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApiKeyStats {
    pub total: usize,
    pub active: usize,
    pub disabled: usize,
    pub expired: usize,
}

/// 鉴权失败原因（仅用于日志）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthorizeDenial {
    #[error("API Key 不存在")]
    Unknown,
    #[error("API Key 已过期")]
    Expired,
    #[error("API Key 已禁用")]
    Disabled,
    #[error("来源不在白名单中")]
    OriginNotAllowed,
}

/// 白名单规范化：去空白、去空串、保序去重
fn normalize_whitelist(list: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    list.into_iter()
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty() && seen.insert(ip.clone()))
        .collect()
}

/// 生成随机 API Key（使用密码学安全随机数）
pub fn generate_key() -> String {
    use rand::distributions::Alphanumeric;
    use rand::{Rng, rngs::OsRng};

    let mut key = String::with_capacity(KEY_PREFIX.len() + KEY_RANDOM_LEN);
    key.push_str(KEY_PREFIX);

    let chars: String = OsRng
        .sample_iter(&Alphanumeric)
        .take(KEY_RANDOM_LEN)
        .map(char::from)
        .collect();

    key.push_str(&chars);
    key
}

/// API Key 管理器
pub struct ApiKeyManager {
    keys: RwLock<Vec<ApiKey>>,
    /// 鉴权成功时间（Key -> Unix 秒），鉴权路径只需要读锁
    last_used: DashMap<String, i64>,
    storage: Arc<dyn Storage>,
    /// Key 生成器（测试时可替换）
    generator: fn() -> String,
    /// 持久化锁，串行化所有写者
    persist_lock: Mutex<()>,
}

impl ApiKeyManager {
    /// 从存储加载 API Keys（不存在时为空列表）
    pub fn load(storage: Arc<dyn Storage>) -> anyhow::Result<Self> {
        let keys: Vec<ApiKey> = load_typed(storage.as_ref(), API_KEYS_STORAGE_KEY)?.unwrap_or_default();
        tracing::info!("已加载 {} 个 API Key", keys.len());

        let last_used = keys
            .iter()
            .filter_map(|k| k.last_used_time.map(|t| (k.key.clone(), t)))
            .collect();

        Ok(Self {
            keys: RwLock::new(keys),
            last_used,
            storage,
            generator: generate_key,
            persist_lock: Mutex::new(()),
        })
    }

    /// 替换 Key 生成器
    pub fn with_generator(mut self, generator: fn() -> String) -> Self {
        self.generator = generator;
        self
    }

    /// 合并内存中的最近使用时间
    fn with_last_used(&self, key: &ApiKey) -> ApiKey {
        let mut key = key.clone();
        if let Some(t) = self.last_used.get(&key.key) {
            key.last_used_time = Some(*t);
        }
        key
    }

    /// 在副本上修改，写盘成功后再替换内存状态
    ///
    /// 写盘失败时内存状态保持不变；内容没有变化时不写盘
    fn commit<R>(
        &self,
        f: impl FnOnce(&mut Vec<ApiKey>) -> Result<R, ApiKeyError>,
    ) -> Result<R, ApiKeyError> {
        let _guard = self.persist_lock.lock();

        let mut next = self.keys.read().clone();
        let result = f(&mut next)?;
        if *self.keys.read() == next {
            return Ok(result);
        }

        let snapshot: Vec<ApiKey> = next.iter().map(|k| self.with_last_used(k)).collect();
        save_typed(self.storage.as_ref(), API_KEYS_STORAGE_KEY, &snapshot).map_err(|e| {
            tracing::warn!("API Key 持久化失败: {}", e);
            ApiKeyError::Persist(e.to_string())
        })?;

        *self.keys.write() = next;
        Ok(result)
    }

    /// 获取所有 API Keys（脱敏）
    pub fn list(&self) -> Vec<ApiKeyMasked> {
        self.keys
            .read()
            .iter()
            .map(|k| ApiKeyMasked::from(&self.with_last_used(k)))
            .collect()
    }

    /// 签发新的 API Key（返回完整 Key，仅在创建时使用）
    pub fn issue(
        &self,
        note: impl Into<String>,
        expire_time: Option<i64>,
        ip_whitelist: Option<Vec<String>>,
    ) -> Result<ApiKeyCreated, ApiKeyError> {
        let now = chrono::Utc::now().timestamp();

        let created = self.commit(|keys| {
            let mut key_value = None;
            for _ in 0..MAX_GENERATE_ATTEMPTS {
                let candidate = (self.generator)();
                if keys.iter().any(|k| k.key == candidate) {
                    tracing::warn!("生成的 API Key 与已有 Key 冲突，重试");
                    continue;
                }
                key_value = Some(candidate);
                break;
            }
            let key = key_value.ok_or(ApiKeyError::GenerationExhausted)?;

            let api_key = ApiKey {
                key,
                note: note.into(),
                expire_time,
                ip_whitelist: normalize_whitelist(ip_whitelist.unwrap_or_default()),
                created_time: now,
                last_used_time: None,
                disabled: false,
            };
            let created = ApiKeyCreated::from(&api_key);
            keys.push(api_key);
            Ok(created)
        })?;

        tracing::info!("创建 API Key: {}", mask_secret(&created.key));
        Ok(created)
    }

    /// 更新 API Key（按完整 Key 或指纹定位）
    ///
    /// Key 不存在时返回 false
    pub fn update(&self, ident: &str, update: ApiKeyUpdate) -> Result<bool, ApiKeyError> {
        let found = self.commit(|keys| {
            let Some(key) = keys.iter_mut().find(|k| k.matches(ident)) else {
                return Ok(false);
            };

            if let Some(note) = update.note {
                key.note = note;
            }
            if let Some(expire_time) = update.expire_time {
                key.expire_time = expire_time;
            }
            if let Some(ip_whitelist) = update.ip_whitelist {
                key.ip_whitelist = normalize_whitelist(ip_whitelist.unwrap_or_default());
            }
            if let Some(disabled) = update.disabled {
                key.disabled = disabled;
            }
            Ok(true)
        })?;

        if found {
            tracing::info!("更新 API Key: {}", mask_secret(ident));
        }
        Ok(found)
    }

    /// 吊销（删除）API Key
    ///
    /// Key 不存在时返回 false
    pub fn revoke(&self, ident: &str) -> Result<bool, ApiKeyError> {
        let removed: Vec<String> = self.commit(|keys| {
            let (removed, kept): (Vec<ApiKey>, Vec<ApiKey>) =
                keys.drain(..).partition(|k| k.matches(ident));
            *keys = kept;
            Ok(removed.into_iter().map(|k| k.key).collect())
        })?;

        for key in &removed {
            self.last_used.remove(key);
        }
        if !removed.is_empty() {
            tracing::info!("删除 API Key: {}", mask_secret(ident));
        }
        Ok(!removed.is_empty())
    }

    /// 按派生状态统计
    pub fn statistics(&self) -> ApiKeyStats {
        let now = chrono::Utc::now().timestamp();
        let mut stats = ApiKeyStats::default();
        for key in self.keys.read().iter() {
            stats.total += 1;
            match key.status_at(now) {
                ApiKeyStatus::Active => stats.active += 1,
                ApiKeyStatus::Disabled => stats.disabled += 1,
                ApiKeyStatus::Expired => stats.expired += 1,
            }
        }
        stats
    }

    /// 请求路径鉴权：Key 存在、状态为 active、来源在白名单内（白名单为空不限制）
    ///
    /// 只持有读锁；成功时记录 last_used_time（仅内存，随下一次修改一起落盘）
    pub fn authorize(&self, key: &str, origin: Option<&str>) -> Result<(), AuthorizeDenial> {
        let now = chrono::Utc::now().timestamp();
        let keys = self.keys.read();
        let entry = keys
            .iter()
            .find(|k| k.key == key)
            .ok_or(AuthorizeDenial::Unknown)?;

        match entry.status_at(now) {
            ApiKeyStatus::Expired => return Err(AuthorizeDenial::Expired),
            ApiKeyStatus::Disabled => return Err(AuthorizeDenial::Disabled),
            ApiKeyStatus::Active => {}
        }

        if !entry.ip_whitelist.is_empty()
            && !origin.is_some_and(|o| entry.ip_whitelist.iter().any(|ip| ip == o))
        {
            return Err(AuthorizeDenial::OriginNotAllowed);
        }

        match self.last_used.get_mut(key) {
            Some(mut t) => *t = now,
            None => {
                self.last_used.insert(entry.key.clone(), now);
            }
        }
        Ok(())
    }

    /// 获取 API Key 数量
    pub fn count(&self) -> usize {
        self.keys.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FailingStorage, FileStorage, MemoryStorage};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn manager() -> ApiKeyManager {
        ApiKeyManager::load(Arc::new(MemoryStorage::new())).unwrap()
    }

    #[test]
    fn test_generate_key() {
        let key = generate_key();
        assert!(key.starts_with("sk-"));
        assert_eq!(key.len(), 51); // "sk-" + 48 chars
        assert!(key[3..].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_status_derivation() {
        assert_eq!(derive_api_key_status(None, false, 100), ApiKeyStatus::Active);
        assert_eq!(derive_api_key_status(None, true, 100), ApiKeyStatus::Disabled);
        assert_eq!(derive_api_key_status(Some(100), false, 100), ApiKeyStatus::Active);
        assert_eq!(derive_api_key_status(Some(99), false, 100), ApiKeyStatus::Expired);
        // 过期优先于禁用
        assert_eq!(derive_api_key_status(Some(99), true, 100), ApiKeyStatus::Expired);
    }

    #[test]
    fn test_issue_with_past_expiry_is_expired() {
        let manager = manager();
        let created = manager.issue("old", Some(1_000), None).unwrap();
        assert_eq!(created.status, ApiKeyStatus::Expired);
        assert_eq!(
            manager.authorize(&created.key, None),
            Err(AuthorizeDenial::Expired)
        );
        assert_eq!(manager.statistics().expired, 1);
    }

    #[test]
    fn test_issue_unique_keys() {
        let manager = manager();
        let keys: HashSet<String> = (0..50)
            .map(|_| manager.issue("", None, None).unwrap().key)
            .collect();
        assert_eq!(keys.len(), 50);
    }

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn colliding_generator() -> String {
        // 前两次返回相同的值，之后递增
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        format!("sk-fixed-{}", n.saturating_sub(1))
    }

    fn constant_generator() -> String {
        "sk-always-the-same".to_string()
    }

    #[test]
    fn test_collision_is_retried() {
        let manager = manager().with_generator(colliding_generator);
        let a = manager.issue("a", None, None).unwrap();
        let b = manager.issue("b", None, None).unwrap();
        assert_ne!(a.key, b.key);
        assert_eq!(manager.count(), 2);
    }

    #[test]
    fn test_collision_exhausted_is_internal_error() {
        let manager = manager().with_generator(constant_generator);
        manager.issue("first", None, None).unwrap();
        let err = manager.issue("second", None, None).unwrap_err();
        assert!(matches!(err, ApiKeyError::GenerationExhausted));
        assert_eq!(manager.count(), 1);
    }

    #[test]
    fn test_list_is_masked() {
        let manager = manager();
        let created = manager.issue("note", None, None).unwrap();

        let list = manager.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].key, format!("{}***", &created.key[..11]));
        assert_eq!(list[0].fingerprint, created.fingerprint);
        assert_eq!(list[0].fingerprint.len(), 16);
        assert_ne!(list[0].key, created.key);
    }

    #[test]
    fn test_partial_update_by_key_and_fingerprint() {
        let manager = manager();
        let created = manager
            .issue("n", Some(i64::MAX), Some(vec!["1.1.1.1".to_string()]))
            .unwrap();

        // 只改备注，其他字段不变
        let found = manager
            .update(
                &created.key,
                ApiKeyUpdate {
                    note: Some("renamed".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(found);
        let listed = &manager.list()[0];
        assert_eq!(listed.note, "renamed");
        assert_eq!(listed.expire_time, Some(i64::MAX));
        assert_eq!(listed.ip_whitelist, vec!["1.1.1.1".to_string()]);

        // 通过指纹清除过期时间和白名单，并禁用
        let found = manager
            .update(
                &created.fingerprint,
                ApiKeyUpdate {
                    expire_time: Some(None),
                    ip_whitelist: Some(None),
                    disabled: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(found);
        let listed = &manager.list()[0];
        assert_eq!(listed.expire_time, None);
        assert!(listed.ip_whitelist.is_empty());
        assert_eq!(listed.status, ApiKeyStatus::Disabled);

        assert!(!manager.update("sk-missing", ApiKeyUpdate::default()).unwrap());
    }

    #[test]
    fn test_revoke() {
        let manager = manager();
        let created = manager.issue("", None, None).unwrap();
        assert!(manager.authorize(&created.key, None).is_ok());

        assert!(manager.revoke(&created.key).unwrap());
        assert!(!manager.revoke(&created.key).unwrap());
        assert_eq!(
            manager.authorize(&created.key, None),
            Err(AuthorizeDenial::Unknown)
        );
    }

    #[test]
    fn test_authorize_whitelist_and_last_used() {
        let manager = manager();
        let created = manager
            .issue(
                "",
                None,
                Some(vec![" 10.0.0.1 ".into(), "10.0.0.2".into(), "10.0.0.1".into(), "".into()]),
            )
            .unwrap();
        assert_eq!(created.ip_whitelist, vec!["10.0.0.1", "10.0.0.2"]);

        assert_eq!(
            manager.authorize(&created.key, Some("10.0.0.3")),
            Err(AuthorizeDenial::OriginNotAllowed)
        );
        assert_eq!(
            manager.authorize(&created.key, None),
            Err(AuthorizeDenial::OriginNotAllowed)
        );
        assert!(manager.list()[0].last_used_time.is_none());

        assert!(manager.authorize(&created.key, Some("10.0.0.2")).is_ok());
        assert!(manager.list()[0].last_used_time.is_some());
    }

    #[test]
    fn test_statistics() {
        let manager = manager();
        manager.issue("a", None, None).unwrap();
        manager.issue("b", Some(1), None).unwrap();
        let c = manager.issue("c", None, None).unwrap();
        manager
            .update(&c.key, ApiKeyUpdate { disabled: Some(true), ..Default::default() })
            .unwrap();

        assert_eq!(
            manager.statistics(),
            ApiKeyStats { total: 3, active: 1, disabled: 1, expired: 1 }
        );
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = tempdir().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path()).unwrap());

        let key = {
            let manager = ApiKeyManager::load(storage.clone()).unwrap();
            manager.issue("persisted", None, None).unwrap().key
        };

        let raw = std::fs::read_to_string(dir.path().join("api_keys.json")).unwrap();
        assert!(raw.trim_start().starts_with('['));

        let manager = ApiKeyManager::load(storage).unwrap();
        assert_eq!(manager.count(), 1);
        assert!(manager.authorize(&key, None).is_ok());
    }

    #[test]
    fn test_failed_save_leaves_keys_unchanged() {
        let storage = Arc::new(FailingStorage::default());
        let manager = ApiKeyManager::load(storage.clone()).unwrap();
        let kept = manager.issue("kept", None, None).unwrap();

        storage.set_failing(true);

        // 明文没有交给调用方的 Key 不能生效
        assert!(matches!(
            manager.issue("lost", None, None),
            Err(ApiKeyError::Persist(_))
        ));
        assert_eq!(manager.count(), 1);
        assert_eq!(manager.statistics().total, 1);

        assert!(manager
            .update(&kept.key, ApiKeyUpdate { disabled: Some(true), ..Default::default() })
            .is_err());
        assert_eq!(manager.list()[0].status, ApiKeyStatus::Active);

        assert!(manager.revoke(&kept.key).is_err());
        assert!(manager.authorize(&kept.key, None).is_ok());

        storage.set_failing(false);
        assert!(manager.revoke(&kept.key).unwrap());
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn test_authorize_alongside_readers() {
        let manager = manager();
        let created = manager.issue("", None, None).unwrap();

        // 其他读者持有读锁时鉴权不会被阻塞
        let reader = manager.keys.read();
        assert!(manager.authorize(&created.key, None).is_ok());
        drop(reader);

        assert!(manager.list()[0].last_used_time.is_some());
    }

    #[test]
    fn test_last_used_persisted_with_next_mutation() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let manager = ApiKeyManager::load(storage.clone()).unwrap();
        let used = manager.issue("used", None, None).unwrap();
        assert!(manager.authorize(&used.key, None).is_ok());

        manager.issue("other", None, None).unwrap();

        let reloaded = ApiKeyManager::load(storage).unwrap();
        let listed = reloaded
            .list()
            .into_iter()
            .find(|k| k.fingerprint == used.fingerprint)
            .unwrap();
        assert!(listed.last_used_time.is_some());
    }
}
