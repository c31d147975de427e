use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use grok_rs::admin::{
    self, AdminCredentials, AdminService, AdminState, ApiKeyManager, SessionStore,
};
use grok_rs::common::auth::mask_secret;
use grok_rs::grok::TokenManager;
use grok_rs::grok::model::token::RoutingOverrides;
use grok_rs::grok::probe::HttpQuotaProbe;
use grok_rs::model::arg::Args;
use grok_rs::model::config::Config;
use grok_rs::storage::{FileStorage, MemoryStorage, Storage, StorageMode};

#[tokio::main]
async fn main() {
    // 解析命令行参数
    let args = Args::parse();

    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // 加载配置
    let config_path = args
        .config
        .unwrap_or_else(|| Config::default_config_path().to_string());
    let mut config = Config::load(&config_path).unwrap_or_else(|e| {
        tracing::error!("加载配置失败: {}", e);
        std::process::exit(1);
    });

    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    // 验证配置
    if let Err(errors) = config.validate() {
        tracing::error!("配置验证失败:");
        for error in &errors {
            tracing::error!("  - {}", error);
        }
        std::process::exit(1);
    }

    if !config.admin_enabled() {
        tracing::warn!("adminPassword 未配置，管理员登录将始终失败");
    }

    // 创建存储
    let storage: Arc<dyn Storage> = match config.storage_mode {
        StorageMode::File => {
            let storage = FileStorage::new(&config.data_dir).unwrap_or_else(|e| {
                tracing::error!("创建数据目录失败: {}", e);
                std::process::exit(1);
            });
            tracing::info!("存储模式: FILE ({})", config.data_dir);
            Arc::new(storage)
        }
        StorageMode::Memory => {
            tracing::warn!("存储模式: MEMORY（重启后数据丢失）");
            Arc::new(MemoryStorage::new())
        }
    };

    // 全局路由配置
    let defaults = RoutingOverrides::new(
        config.proxy_url.clone(),
        config.cache_proxy_url.clone(),
        config.cf_clearance.clone(),
    );
    if let Some(proxy) = &defaults.proxy_url {
        tracing::info!("已配置全局代理: {}", mask_secret(proxy));
    }

    // 创建 Token 池
    let probe = Arc::new(HttpQuotaProbe::new(
        config.probe_base_url.clone(),
        config.probe_timeout_secs,
    ));
    let token_manager = TokenManager::load(storage.clone(), probe, defaults, config.probe_model.clone())
        .unwrap_or_else(|e| {
            tracing::error!("加载 Token 失败: {}", e);
            std::process::exit(1);
        });

    // 创建 API Key 管理器
    let api_keys = ApiKeyManager::load(storage.clone()).unwrap_or_else(|e| {
        tracing::error!("加载 API Key 失败: {}", e);
        std::process::exit(1);
    });

    let admin_service = AdminService::new(
        Arc::new(SessionStore::with_ttl_hours(config.session_ttl_hours)),
        Arc::new(token_manager),
        Arc::new(api_keys),
        AdminCredentials {
            username: config.admin_username.clone(),
            password: config.admin_password.clone(),
            max_login_failures: config.max_login_failures,
            lockout: Duration::from_secs(config.login_lockout_secs),
        },
        storage.mode(),
    );

    let app = admin::create_admin_router(AdminState::new(admin_service));

    // 启动服务器
    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("启动服务: {}", addr);
    tracing::info!("Admin API:");
    tracing::info!("  POST /api/login");
    tracing::info!("  GET  /api/tokens");
    tracing::info!("  POST /api/tokens/test");
    tracing::info!("  GET  /api/stats");
    tracing::info!("  GET  /api/api-keys");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        tracing::error!("监听 {} 失败: {}", addr, e);
        std::process::exit(1);
    });
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("服务异常退出: {}", e);
        std::process::exit(1);
    }
}
