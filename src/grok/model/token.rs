//! Grok SSO Token 数据模型
//!
//! 包含 Token 类型（普通 / Super）、额度计数、派生状态以及持久化格式

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Token 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenType {
    /// 普通 Token（只有标准额度）
    #[serde(rename = "sso")]
    Normal,
    /// Super Token（额外的 heavy 额度）
    #[serde(rename = "ssoSuper")]
    Super,
}

impl TokenType {
    /// 解析请求中的类型标识（"sso" / "ssoSuper"）
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "sso" => Some(TokenType::Normal),
            "ssoSuper" => Some(TokenType::Super),
            _ => None,
        }
    }

    /// 请求/响应中使用的类型标识
    pub fn as_wire(&self) -> &'static str {
        match self {
            TokenType::Normal => "sso",
            TokenType::Super => "ssoSuper",
        }
    }
}

/// Token 派生状态（每次读取时计算，从不持久化）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    /// 从未被使用过（额度未知）
    Unused,
    /// 额度耗尽，限流中
    Limited,
    /// 有剩余额度
    Active,
    /// 被上游明确拒绝（粘性）
    Expired,
}

/// 根据原始字段派生 Token 状态
///
/// `None` 表示计数从未被写入过。Super Token 取两个计数中较大者，
/// 因为 `None < Some(0)`，两者都未使用时才是 Unused。
pub fn derive_status(
    token_type: TokenType,
    remaining: Option<u64>,
    heavy_remaining: Option<u64>,
    expired: bool,
) -> TokenStatus {
    if expired {
        return TokenStatus::Expired;
    }

    let relevant = match token_type {
        TokenType::Normal => remaining,
        TokenType::Super => remaining.max(heavy_remaining),
    };

    match relevant {
        None => TokenStatus::Unused,
        Some(0) => TokenStatus::Limited,
        Some(_) => TokenStatus::Active,
    }
}

/// 凭据级路由覆盖
///
/// 字段为 None 时回退到全局配置
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingOverrides {
    pub proxy_url: Option<String>,
    pub cache_proxy_url: Option<String>,
    pub cf_clearance: Option<String>,
}

impl RoutingOverrides {
    /// 构造覆盖配置，空字符串视为未配置
    pub fn new(
        proxy_url: Option<String>,
        cache_proxy_url: Option<String>,
        cf_clearance: Option<String>,
    ) -> Self {
        Self {
            proxy_url: non_empty(proxy_url),
            cache_proxy_url: non_empty(cache_proxy_url),
            cf_clearance: non_empty(cf_clearance),
        }
    }

    /// 按 “凭据级 > 全局” 解析实际生效的路由
    pub fn resolve(&self, defaults: &RoutingOverrides) -> RoutingOverrides {
        RoutingOverrides {
            proxy_url: self.proxy_url.clone().or_else(|| defaults.proxy_url.clone()),
            cache_proxy_url: self
                .cache_proxy_url
                .clone()
                .or_else(|| defaults.cache_proxy_url.clone()),
            cf_clearance: self
                .cf_clearance
                .clone()
                .or_else(|| defaults.cf_clearance.clone()),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// 单个 Token 条目（内存表示）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEntry {
    pub token: String,
    pub token_type: TokenType,
    /// 创建时间（Unix 秒）
    pub created_time: Option<i64>,
    /// 剩余普通额度（None = 从未使用）
    pub remaining_queries: Option<u64>,
    /// 剩余 heavy 额度（仅 Super Token 有意义）
    pub heavy_remaining_queries: Option<u64>,
    /// 被上游明确判定失效
    pub expired: bool,
    pub tags: BTreeSet<String>,
    pub note: String,
    pub routing: RoutingOverrides,
}

impl TokenEntry {
    /// 新添加的 Token：计数未使用，未失效
    pub fn new(
        token: impl Into<String>,
        token_type: TokenType,
        created_time: i64,
        routing: RoutingOverrides,
    ) -> Self {
        Self {
            token: token.into(),
            token_type,
            created_time: Some(created_time),
            remaining_queries: None,
            heavy_remaining_queries: None,
            expired: false,
            tags: BTreeSet::new(),
            note: String::new(),
            routing,
        }
    }

    pub fn status(&self) -> TokenStatus {
        derive_status(
            self.token_type,
            self.remaining_queries,
            self.heavy_remaining_queries,
            self.expired,
        )
    }

    /// 任一额度计数恰好为 0
    pub fn has_exhausted_counter(&self) -> bool {
        self.remaining_queries == Some(0) || self.heavy_remaining_queries == Some(0)
    }
}

/// Token 统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenStats {
    pub total: usize,
    pub unused: usize,
    pub limited: usize,
    pub active: usize,
    pub expired: usize,
}

impl TokenStats {
    /// 按派生状态聚合
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a TokenEntry>) -> Self {
        let mut stats = TokenStats::default();
        for entry in entries {
            stats.total += 1;
            match entry.status() {
                TokenStatus::Unused => stats.unused += 1,
                TokenStatus::Limited => stats.limited += 1,
                TokenStatus::Active => stats.active += 1,
                TokenStatus::Expired => stats.expired += 1,
            }
        }
        stats
    }
}

// ============ 持久化格式 ============

/// 持久化文件：`{"ssoNormal": {token: data}, "ssoSuper": {...}}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenFile {
    #[serde(rename = "ssoNormal", default)]
    pub normal: BTreeMap<String, StoredToken>,
    #[serde(rename = "ssoSuper", default)]
    pub super_tokens: BTreeMap<String, StoredToken>,
}

/// 持久化的单个 Token 数据
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredToken {
    #[serde(rename = "createdTime", default, deserialize_with = "deserialize_created_time")]
    pub created_time: Option<i64>,
    #[serde(rename = "remainingQueries", default, with = "quota_sentinel")]
    pub remaining_queries: Option<u64>,
    #[serde(rename = "heavyremainingQueries", default, with = "quota_sentinel")]
    pub heavy_remaining_queries: Option<u64>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub proxy_url: String,
    #[serde(default)]
    pub cache_proxy_url: String,
    #[serde(default)]
    pub cf_clearance: String,
}

const STATUS_EXPIRED: &str = "expired";
const STATUS_ACTIVE: &str = "active";

impl StoredToken {
    pub fn from_entry(entry: &TokenEntry) -> Self {
        Self {
            created_time: entry.created_time,
            remaining_queries: entry.remaining_queries,
            heavy_remaining_queries: entry.heavy_remaining_queries,
            status: if entry.expired { STATUS_EXPIRED } else { STATUS_ACTIVE }.to_string(),
            tags: entry.tags.iter().cloned().collect(),
            note: entry.note.clone(),
            proxy_url: entry.routing.proxy_url.clone().unwrap_or_default(),
            cache_proxy_url: entry.routing.cache_proxy_url.clone().unwrap_or_default(),
            cf_clearance: entry.routing.cf_clearance.clone().unwrap_or_default(),
        }
    }

    pub fn into_entry(self, token: String, token_type: TokenType) -> TokenEntry {
        TokenEntry {
            token,
            token_type,
            created_time: self.created_time,
            remaining_queries: self.remaining_queries,
            heavy_remaining_queries: self.heavy_remaining_queries,
            expired: self.status == STATUS_EXPIRED,
            tags: self.tags.into_iter().collect(),
            note: self.note,
            routing: RoutingOverrides::new(
                Some(self.proxy_url),
                Some(self.cache_proxy_url),
                Some(self.cf_clearance),
            ),
        }
    }
}

/// createdTime 历史上既可能是数字也可能是字符串
fn deserialize_created_time<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Str(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Int(v)) => Ok(Some(v)),
        Some(Raw::Str(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Str(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

/// 额度计数在线上/磁盘上以 -1 表示“从未使用”
pub mod quota_sentinel {
    use super::*;

    pub fn serialize<S>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(v) => serializer.serialize_i64(*v as i64),
            None => serializer.serialize_i64(-1),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<i64>::deserialize(deserializer)?;
        Ok(raw.and_then(|v| u64::try_from(v).ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(token_type: TokenType, remaining: Option<u64>, heavy: Option<u64>) -> TokenEntry {
        let mut e = TokenEntry::new("tok", token_type, 0, RoutingOverrides::default());
        e.remaining_queries = remaining;
        e.heavy_remaining_queries = heavy;
        e
    }

    #[test]
    fn test_normal_status_three_way() {
        assert_eq!(entry(TokenType::Normal, None, None).status(), TokenStatus::Unused);
        assert_eq!(entry(TokenType::Normal, Some(0), None).status(), TokenStatus::Limited);
        assert_eq!(entry(TokenType::Normal, Some(5), None).status(), TokenStatus::Active);
        // 普通 Token 忽略 heavy 计数
        assert_eq!(entry(TokenType::Normal, Some(0), Some(9)).status(), TokenStatus::Limited);
    }

    #[test]
    fn test_super_status_uses_larger_counter() {
        assert_eq!(entry(TokenType::Super, Some(0), Some(3)).status(), TokenStatus::Active);
        assert_eq!(entry(TokenType::Super, Some(4), Some(0)).status(), TokenStatus::Active);
        assert_eq!(entry(TokenType::Super, Some(0), Some(0)).status(), TokenStatus::Limited);
        assert_eq!(entry(TokenType::Super, None, None).status(), TokenStatus::Unused);
        assert_eq!(entry(TokenType::Super, None, Some(0)).status(), TokenStatus::Limited);
    }

    #[test]
    fn test_expired_overrides_counters() {
        for (remaining, heavy) in [(None, None), (Some(0), None), (Some(100), Some(100))] {
            for token_type in [TokenType::Normal, TokenType::Super] {
                assert_eq!(
                    derive_status(token_type, remaining, heavy, true),
                    TokenStatus::Expired
                );
            }
        }
    }

    #[test]
    fn test_routing_resolve_prefers_credential() {
        let defaults = RoutingOverrides::new(
            Some("http://global:1".to_string()),
            Some("http://global-cache:1".to_string()),
            Some("global-cf".to_string()),
        );
        let own = RoutingOverrides::new(Some("socks5://own:2".to_string()), Some("".to_string()), None);

        let resolved = own.resolve(&defaults);
        assert_eq!(resolved.proxy_url.as_deref(), Some("socks5://own:2"));
        assert_eq!(resolved.cache_proxy_url.as_deref(), Some("http://global-cache:1"));
        assert_eq!(resolved.cf_clearance.as_deref(), Some("global-cf"));
    }

    #[test]
    fn test_stored_token_legacy_format() {
        let raw = r#"{
            "ssoNormal": {
                "tok-a": {"createdTime": "1700000000", "remainingQueries": -1, "heavyremainingQueries": -1, "status": "active"}
            },
            "ssoSuper": {
                "tok-b": {"createdTime": 1700000001, "remainingQueries": 0, "heavyremainingQueries": 12, "status": "expired", "tags": ["vip"], "note": "n", "proxy_url": "http://p:1"}
            }
        }"#;
        let file: TokenFile = serde_json::from_str(raw).unwrap();

        let a = file.normal["tok-a"].clone().into_entry("tok-a".into(), TokenType::Normal);
        assert_eq!(a.created_time, Some(1_700_000_000));
        assert_eq!(a.remaining_queries, None);
        assert_eq!(a.routing, RoutingOverrides::default());
        assert_eq!(a.status(), TokenStatus::Unused);

        let b = file.super_tokens["tok-b"].clone().into_entry("tok-b".into(), TokenType::Super);
        assert!(b.expired);
        assert_eq!(b.heavy_remaining_queries, Some(12));
        assert_eq!(b.routing.proxy_url.as_deref(), Some("http://p:1"));
        assert_eq!(b.status(), TokenStatus::Expired);

        let stored = serde_json::to_value(StoredToken::from_entry(&a)).unwrap();
        assert_eq!(stored["remainingQueries"], -1);
        assert_eq!(stored["status"], "active");
        assert_eq!(stored["proxy_url"], "");
    }

    #[test]
    fn test_stats_sum_to_total() {
        let mut expired = entry(TokenType::Normal, Some(5), None);
        expired.expired = true;
        let entries = vec![
            entry(TokenType::Normal, None, None),
            entry(TokenType::Normal, Some(0), None),
            entry(TokenType::Normal, Some(5), None),
            expired,
        ];
        let stats = TokenStats::from_entries(&entries);
        assert_eq!(
            stats,
            TokenStats { total: 4, unused: 1, limited: 1, active: 1, expired: 1 }
        );
    }
}
