//! Token 池错误类型定义

use super::model::token::TokenType;

/// Token 池操作错误
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// (类型, Token) 不存在
    #[error("Token 不存在: {token_type:?} {token}")]
    NotFound {
        token_type: TokenType,
        /// 脱敏后的 Token
        token: String,
    },

    /// 参数无效（空批次、空 Token、代理格式错误等）
    #[error("参数无效: {0}")]
    InvalidArgument(String),

    /// 无法发起额度探测
    #[error("额度探测不可用: {0}")]
    ProbeUnavailable(String),

    /// 持久化失败（内存中的修改已生效）
    #[error("持久化失败: {0}")]
    Persist(String),
}

impl TokenError {
    /// 检查是否为"不存在"错误
    pub fn is_not_found(&self) -> bool {
        matches!(self, TokenError::NotFound { .. })
    }
}
