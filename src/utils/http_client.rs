/// 全局共享的 HTTP 客户端
///
/// 发送邮件和读取收件箱共用同一个连接池。
/// 不设置请求超时，沿用 reqwest 默认行为
use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;

/// 全局 HTTP 客户端实例（使用懒初始化）
pub static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        // 连接池配置
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(90))
        // 重定向配置
        .redirect(reqwest::redirect::Policy::limited(5))
        // 用户代理
        .user_agent(concat!("GraphMail/", env!("CARGO_PKG_VERSION"), " (Rust)"))
        .build()
        .expect("构建全局 HTTP 客户端失败")
});

/// 获取全局 HTTP 客户端
pub fn get_client() -> &'static Client {
    &HTTP_CLIENT
}
