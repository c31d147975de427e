use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::storage::StorageMode;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// 管理员用户名
    #[serde(default = "default_admin_username")]
    pub admin_username: String,

    /// 管理员密码（为空时 Admin API 不启用）
    #[serde(default)]
    pub admin_password: String,

    /// 全局代理地址（可选，凭据级配置优先）
    /// 支持格式: http://host:port, https://host:port, socks5://host:port
    #[serde(default)]
    pub proxy_url: Option<String>,

    /// 全局缓存代理地址（可选，凭据级配置优先）
    #[serde(default)]
    pub cache_proxy_url: Option<String>,

    /// 全局 cf_clearance（可选，凭据级配置优先）
    #[serde(default)]
    pub cf_clearance: Option<String>,

    /// 管理员会话有效期（小时，默认 24）
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,

    /// 存储模式（file / memory）
    #[serde(default)]
    pub storage_mode: StorageMode,

    /// 数据目录（file 模式下存放 token.json / api_keys.json）
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// 测试 Token 时使用的模型
    #[serde(default = "default_probe_model")]
    pub probe_model: String,

    /// 测试 Token 请求超时（秒）
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// 额度查询接口地址
    #[serde(default = "default_probe_base_url")]
    pub probe_base_url: String,

    /// 登录连续失败上限（达到后锁定）
    #[serde(default = "default_max_login_failures")]
    pub max_login_failures: u32,

    /// 登录锁定时长（秒）
    #[serde(default = "default_login_lockout_secs")]
    pub login_lockout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_admin_username() -> String {
    "admin".to_string()
}

fn default_session_ttl_hours() -> i64 {
    24
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_probe_model() -> String {
    "grok-4-fast".to_string()
}

fn default_probe_timeout_secs() -> u64 {
    30
}

fn default_probe_base_url() -> String {
    "https://grok.com".to_string()
}

fn default_max_login_failures() -> u32 {
    5
}

fn default_login_lockout_secs() -> u64 {
    900 // 15 分钟
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            admin_username: default_admin_username(),
            admin_password: String::new(),
            proxy_url: None,
            cache_proxy_url: None,
            cf_clearance: None,
            session_ttl_hours: default_session_ttl_hours(),
            storage_mode: StorageMode::default(),
            data_dir: default_data_dir(),
            probe_model: default_probe_model(),
            probe_timeout_secs: default_probe_timeout_secs(),
            probe_base_url: default_probe_base_url(),
            max_login_failures: default_max_login_failures(),
            login_lockout_secs: default_login_lockout_secs(),
        }
    }
}

/// 检查代理 URL 格式（空字符串视为未配置）
pub fn is_valid_proxy_url(url: &str) -> bool {
    url.is_empty()
        || url.starts_with("http://")
        || url.starts_with("https://")
        || url.starts_with("socks5://")
        || url.starts_with("socks5h://")
}

impl Config {
    /// 获取默认配置文件路径
    pub fn default_config_path() -> &'static str {
        "config/config.json"
    }

    /// 从文件加载配置
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            // 配置文件不存在，返回默认配置
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 是否启用 Admin API（密码为空视为未配置，防止空密码绕过认证）
    pub fn admin_enabled(&self) -> bool {
        !self.admin_username.trim().is_empty() && !self.admin_password.trim().is_empty()
    }

    /// 验证配置有效性
    ///
    /// 一次性返回所有错误，便于启动时集中输出
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.host.trim().is_empty() {
            errors.push("host 不能为空".to_string());
        }

        if self.port == 0 {
            errors.push("port 不能为 0".to_string());
        }

        for (name, value) in [
            ("proxyUrl", &self.proxy_url),
            ("cacheProxyUrl", &self.cache_proxy_url),
        ] {
            if let Some(url) = value {
                if !is_valid_proxy_url(url) {
                    errors.push(format!(
                        "{} 格式不正确: {}，应以 http://、https:// 或 socks5:// 开头",
                        name, url
                    ));
                }
            }
        }

        if self.session_ttl_hours <= 0 {
            errors.push("sessionTtlHours 必须大于 0".to_string());
        }

        if self.data_dir.trim().is_empty() && self.storage_mode == StorageMode::File {
            errors.push("dataDir 不能为空".to_string());
        }

        if self.probe_model.trim().is_empty() {
            errors.push("probeModel 不能为空".to_string());
        }

        if self.probe_timeout_secs == 0 {
            errors.push("probeTimeoutSecs 不能为 0".to_string());
        }

        if !self.probe_base_url.starts_with("http://") && !self.probe_base_url.starts_with("https://")
        {
            errors.push(format!("probeBaseUrl 格式不正确: {}", self.probe_base_url));
        }

        if self.max_login_failures == 0 {
            errors.push("maxLoginFailures 不能为 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
