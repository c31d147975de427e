//! HTTP 客户端构建

use std::time::Duration;

use reqwest::{Client, Proxy};

/// 构建 HTTP 客户端
///
/// `proxy_url` 为 None 时直连；支持 http / https / socks5 代理
pub fn build_client(proxy_url: Option<&str>, timeout_secs: u64) -> anyhow::Result<Client> {
    let mut builder = Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .use_rustls_tls();

    if let Some(url) = proxy_url {
        let proxy = Proxy::all(url)?;
        builder = builder.proxy(proxy);
        tracing::debug!("HTTP 客户端使用代理: {}", url);
    }

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_client_direct() {
        assert!(build_client(None, 30).is_ok());
    }

    #[test]
    fn test_build_client_with_socks_proxy() {
        assert!(build_client(Some("socks5://127.0.0.1:1080"), 30).is_ok());
    }
}
