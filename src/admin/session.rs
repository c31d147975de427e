//! 管理员会话模块
//!
//! 会话 ID -> 过期时间。过期会话在下一次访问时惰性删除，没有后台清理任务

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;

/// 会话检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Valid,
    /// 不存在（从未创建或已登出）
    Missing,
    /// 已过期（本次检查时已删除）
    Expired,
}

/// 会话存储
pub struct SessionStore {
    /// 会话 ID -> 过期时间
    sessions: RwLock<HashMap<String, DateTime<Utc>>>,
    /// 会话有效期
    ttl: Duration,
}

impl SessionStore {
    /// 创建会话存储
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// 有效期以小时为单位
    pub fn with_ttl_hours(hours: i64) -> Self {
        Self::new(Duration::hours(hours))
    }

    /// 创建新会话
    ///
    /// 返回 32 字节随机数的十六进制字符串（64 字符）
    pub fn create(&self) -> String {
        self.create_at(Utc::now())
    }

    fn create_at(&self, now: DateTime<Utc>) -> String {
        let mut rng = rand::thread_rng();
        let id_bytes: [u8; 32] = rng.r#gen();
        let id = hex::encode(id_bytes);

        self.sessions.write().insert(id.clone(), now + self.ttl);
        id
    }

    /// 检查会话状态，过期会话在此删除
    pub fn check(&self, id: &str) -> SessionState {
        self.check_at(id, Utc::now())
    }

    fn check_at(&self, id: &str, now: DateTime<Utc>) -> SessionState {
        // 快速路径：读锁
        match self.sessions.read().get(id) {
            None => return SessionState::Missing,
            Some(expires_at) if now <= *expires_at => return SessionState::Valid,
            Some(_) => {}
        }

        let mut sessions = self.sessions.write();
        match sessions.get(id) {
            None => SessionState::Missing,
            Some(expires_at) if now <= *expires_at => SessionState::Valid,
            Some(_) => {
                sessions.remove(id);
                tracing::debug!("会话已过期并删除");
                SessionState::Expired
            }
        }
    }

    /// 会话是否有效
    pub fn validate(&self, id: &str) -> bool {
        self.check(id) == SessionState::Valid
    }

    /// 删除会话（幂等）
    ///
    /// 返回删除前该会话是否有效
    pub fn revoke(&self, id: &str) -> bool {
        let now = Utc::now();
        match self.sessions.write().remove(id) {
            Some(expires_at) => now <= expires_at,
            None => false,
        }
    }

    /// 当前会话数量（包含尚未被访问到的过期会话）
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
