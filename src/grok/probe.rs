//! 额度探测
//!
//! `QuotaProbe` 是对上游额度查询接口的抽象，TokenManager 只依赖该 trait。
//! `HttpQuotaProbe` 是基于 reqwest 的默认实现。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::http_client::build_client;

/// 一次额度探测请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    /// 上游认证串（Cookie 格式）
    pub auth_token: String,
    /// 探测使用的模型
    pub model: String,
    /// 实际生效的代理（凭据级 > 全局）
    pub proxy_url: Option<String>,
}

impl ProbeRequest {
    /// 由 Token 构造上游认证串：`sso-rw=<t>;sso=<t>[;cf_clearance=<c>]`
    pub fn format_auth_token(token: &str, cf_clearance: Option<&str>) -> String {
        match cf_clearance {
            Some(cf) => format!("sso-rw={};sso={};cf_clearance={}", token, token, cf),
            None => format!("sso-rw={};sso={}", token, token),
        }
    }
}

/// 探测成功时上游返回的额度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuotaReport {
    /// 剩余次数（上游未返回时为 None）
    pub remaining: Option<u64>,
    /// 额度上限（上游未返回时为 None）
    pub limit: Option<u64>,
}

/// 探测失败
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// 上游返回非成功状态码
    #[error("上游拒绝请求: HTTP {status}")]
    Rejected { status: u16 },

    /// 网络错误或超时
    #[error("网络错误: {0}")]
    Network(String),

    /// 本地无法发起请求（如代理配置无效）
    #[error("无法构建上游请求: {0}")]
    Unavailable(String),
}

/// 额度探测接口
#[async_trait]
pub trait QuotaProbe: Send + Sync {
    async fn check_limits(&self, request: &ProbeRequest) -> Result<QuotaReport, ProbeError>;
}

// ============ HTTP 实现 ============

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitsRequest<'a> {
    request_kind: &'a str,
    model_name: &'a str,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RateLimitsResponse {
    #[serde(default)]
    remaining_tokens: Option<i64>,
    #[serde(default)]
    remaining_queries: Option<i64>,
    #[serde(default)]
    total_tokens: Option<i64>,
    #[serde(default)]
    total_queries: Option<i64>,
}

impl RateLimitsResponse {
    fn into_report(self) -> QuotaReport {
        let to_u64 = |v: Option<i64>| v.and_then(|v| u64::try_from(v).ok());
        QuotaReport {
            remaining: to_u64(self.remaining_tokens).or(to_u64(self.remaining_queries)),
            limit: to_u64(self.total_tokens).or(to_u64(self.total_queries)),
        }
    }
}

/// 基于 `POST /rest/rate-limits` 的额度探测
pub struct HttpQuotaProbe {
    base_url: String,
    timeout_secs: u64,
}

impl HttpQuotaProbe {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout_secs,
        }
    }
}

#[async_trait]
impl QuotaProbe for HttpQuotaProbe {
    async fn check_limits(&self, request: &ProbeRequest) -> Result<QuotaReport, ProbeError> {
        let client = build_client(request.proxy_url.as_deref(), self.timeout_secs)
            .map_err(|e| ProbeError::Unavailable(e.to_string()))?;

        let url = format!("{}/rest/rate-limits", self.base_url);
        let body = RateLimitsRequest {
            request_kind: "DEFAULT",
            model_name: &request.model,
        };

        let response = client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Accept", "*/*")
            .header("Cookie", &request.auth_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProbeError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!("额度查询失败: HTTP {}", status);
            return Err(ProbeError::Rejected {
                status: status.as_u16(),
            });
        }

        let data: RateLimitsResponse = response
            .json()
            .await
            .map_err(|e| ProbeError::Network(e.to_string()))?;
        Ok(data.into_report())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_auth_token() {
        assert_eq!(
            ProbeRequest::format_auth_token("abc", None),
            "sso-rw=abc;sso=abc"
        );
        assert_eq!(
            ProbeRequest::format_auth_token("abc", Some("cf1")),
            "sso-rw=abc;sso=abc;cf_clearance=cf1"
        );
    }

    #[test]
    fn test_rate_limits_response_prefers_tokens() {
        let raw = r#"{"remainingTokens": 7, "remainingQueries": 3, "totalQueries": 20}"#;
        let report = serde_json::from_str::<RateLimitsResponse>(raw)
            .unwrap()
            .into_report();
        assert_eq!(report, QuotaReport { remaining: Some(7), limit: Some(20) });
    }

    #[test]
    fn test_rate_limits_response_negative_is_unknown() {
        let raw = r#"{"remainingQueries": -1}"#;
        let report = serde_json::from_str::<RateLimitsResponse>(raw)
            .unwrap()
            .into_report();
        assert_eq!(report, QuotaReport::default());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let probe = HttpQuotaProbe::new("https://grok.com/", 10);
        assert_eq!(probe.base_url, "https://grok.com");
    }
}
