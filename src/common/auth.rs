//! 认证相关的通用函数

use http::{HeaderMap, header};
use subtle::ConstantTimeEq;

/// 从 `Authorization: Bearer <token>` 头中提取 token
///
/// 头不存在、格式不对或 token 为空时返回 None
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// 常量时间字符串比较（防止时序攻击）
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// 脱敏显示密钥（只保留前 10 个字符）
pub fn mask_secret(secret: &str) -> String {
    match secret.char_indices().nth(10) {
        Some((idx, _)) => format!("{}...", &secret[..idx]),
        None => "***".to_string(),
    }
}
