/// 交互式 OAuth2 认证流程
///
/// 授权码流程（带 PKCE），浏览器授权后由本地服务器接收回调
use anyhow::{Context, Result};
use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
    BasicTokenType,
};
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, ExtraTokenFields,
    PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, Scope, StandardRevocableToken,
    StandardTokenResponse, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tiny_http::{Header, Response, Server, StatusCode};
use tokio::sync::oneshot;
use url::Url;

use crate::config::crypto::TokenCipher;
use crate::config::oauth_config::CredentialConfig;
use crate::config::storage::TokenCacheStore;
use crate::mail::graph::error::AuthenticationError;
use crate::mail::graph::types::{AccountRef, CachedAccount};

/// 每次授权请求都附带的 OIDC 保留权限（刷新令牌 + id_token）
pub const RESERVED_SCOPES: [&str; 3] = ["offline_access", "openid", "profile"];

/// 响应未给出有效期时的默认值（秒）
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// 有效期上限（秒），超出的值按上限处理
pub const MAX_EXPIRES_IN_SECS: u64 = u32::MAX as u64;

/// Token 响应中的 id_token
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdTokenFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl ExtraTokenFields for IdTokenFields {}

pub type GraphTokenResponse = StandardTokenResponse<IdTokenFields, BasicTokenType>;

pub type GraphOAuthClient = oauth2::Client<
    BasicErrorResponse,
    GraphTokenResponse,
    BasicTokenType,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
>;

const SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>授权成功 - GraphMail</title></head>
<body style="font-family: sans-serif; text-align: center; margin-top: 15vh;">
    <h1>授权成功</h1>
    <p>现在可以关闭此页面并返回终端。</p>
</body>
</html>"#;

const ERROR_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>授权失败 - GraphMail</title></head>
<body style="font-family: sans-serif; text-align: center; margin-top: 15vh;">
    <h1>授权失败</h1>
    <p>账户连接失败，请返回终端查看错误信息。</p>
</body>
</html>"#;

/// 构建 OAuth2 客户端
///
/// 客户端密钥放在请求体中发送（机密客户端）
pub fn build_client(config: &CredentialConfig) -> Result<GraphOAuthClient> {
    let client = GraphOAuthClient::new(
        ClientId::new(config.client_id.clone()),
        Some(ClientSecret::new(config.client_secret.clone())),
        AuthUrl::new(config.authorize_endpoint()).context("授权端点 URL 无效")?,
        Some(TokenUrl::new(config.token_endpoint()).context("Token 端点 URL 无效")?),
    )
    .set_auth_type(AuthType::RequestBody)
    .set_redirect_uri(RedirectUrl::new(config.redirect_uri.clone()).context("重定向 URI 无效")?);

    Ok(client)
}

/// 请求的权限 = 配置的邮件权限 + 保留权限
pub fn request_scopes(scopes: &[String]) -> Vec<Scope> {
    scopes
        .iter()
        .map(String::as_str)
        .chain(RESERVED_SCOPES)
        .map(|s| Scope::new(s.to_string()))
        .collect()
}

/// 生成授权 URL，返回 URL、CSRF state 与 PKCE verifier
pub fn authorization_request(
    client: &GraphOAuthClient,
    scopes: &[String],
) -> (Url, CsrfToken, PkceCodeVerifier) {
    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
    let (auth_url, csrf_state) = client
        .authorize_url(CsrfToken::new_random)
        .add_scopes(request_scopes(scopes))
        .set_pkce_challenge(pkce_challenge)
        .url();
    (auth_url, csrf_state, pkce_verifier)
}

/// 浏览器回调携带的参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackParams {
    /// 用户同意授权
    Authorized { code: String, state: String },
    /// 身份提供方返回错误（用户取消、拒绝授权等）
    Rejected { error: String, description: String },
}

/// 解析回调 URL 的 query
///
/// 既没有 `code` 也没有 `error` 时返回 `None`（例如浏览器请求 favicon）
pub fn parse_callback(url: &Url) -> Option<CallbackParams> {
    let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

    if let Some(error) = params.get("error") {
        return Some(CallbackParams::Rejected {
            error: error.clone(),
            description: params.get("error_description").cloned().unwrap_or_default(),
        });
    }

    match (params.get("code"), params.get("state")) {
        (Some(code), Some(state)) => Some(CallbackParams::Authorized {
            code: code.clone(),
            state: state.clone(),
        }),
        _ => None,
    }
}

/// 执行交互式认证
///
/// 1. 生成授权 URL（PKCE + CSRF state）
/// 2. 启动本地服务器
/// 3. 打开浏览器
/// 4. 等待回调
/// 5. 验证 CSRF state
/// 6. 交换 Token
/// 7. 写入 Token 缓存
///
/// # Returns
/// 返回访问令牌
///
/// # Errors
/// - 凭据为占位符
/// - 用户拒绝授权或取消
/// - 本地服务器无法启动（端口被占用）
/// - Token 交换失败
pub async fn authenticate(
    config: &CredentialConfig,
    scopes: &[String],
    store: &TokenCacheStore,
    cipher: &TokenCipher,
) -> Result<String, AuthenticationError> {
    tracing::info!("🔐 开始交互式 OAuth2 认证流程");

    if config.is_placeholder() {
        return Err(AuthenticationError::InvalidConfig(
            "请设置 GRAPH_CLIENT_ID / GRAPH_TENANT_ID / GRAPH_CLIENT_SECRET 或在配置文件中添加 [oauth] 段"
                .to_string(),
        ));
    }

    let client = build_client(config)
        .map_err(|e| AuthenticationError::InvalidConfig(format!("{:#}", e)))?;
    let redirect = Url::parse(&config.redirect_uri)
        .map_err(|e| AuthenticationError::InvalidConfig(format!("重定向 URI 无效: {}", e)))?;

    // 步骤 1：生成授权 URL
    let (auth_url, csrf_state, pkce_verifier) = authorization_request(&client, scopes);
    tracing::debug!("授权 URL: {}", auth_url);

    // 步骤 2：启动本地服务器
    let listener = CallbackListener::start(bind_callback_server(&redirect)?, redirect);

    // 步骤 3：打开浏览器
    if let Err(e) = webbrowser::open(auth_url.as_str()) {
        tracing::warn!("无法打开浏览器（{}），请手动访问：{}", e, auth_url);
    } else {
        tracing::info!("✅ 浏览器已打开，等待用户授权...");
    }

    // 步骤 4：等待回调
    let timeout = config.callback_timeout_secs.map(Duration::from_secs);
    let (code, state) = match listener.wait(timeout).await? {
        CallbackParams::Authorized { code, state } => (code, state),
        CallbackParams::Rejected { error, description } => {
            tracing::error!("用户拒绝授权: {} - {}", error, description);
            return Err(AuthenticationError::denied(error, description));
        }
    };
    tracing::info!("✅ 收到授权回调");

    // 步骤 5：验证 CSRF state
    if state != *csrf_state.secret() {
        return Err(AuthenticationError::Failed(
            "CSRF 验证失败：state 不匹配".to_string(),
        ));
    }

    // 步骤 6：交换 Token
    let token_response = exchange_code(&client, code, pkce_verifier).await?;
    let access_token = token_response.access_token().secret().to_string();
    tracing::info!("✅ Token 交换成功");
    tracing::debug!("Access Token: {}", redact(&access_token));

    // 步骤 7：写入 Token 缓存（失败不影响本次调用）
    if let Err(e) = cache_token_response(config, scopes, store, cipher, &token_response) {
        tracing::warn!("⚠️ 写入 Token 缓存失败: {:#}", e);
    }

    Ok(access_token)
}

/// 绑定回调服务器
///
/// 监听重定向 URI 的端口，`localhost` 映射为 127.0.0.1
fn bind_callback_server(redirect: &Url) -> Result<Server, AuthenticationError> {
    let host = match redirect.host_str() {
        Some("localhost") | None => "127.0.0.1",
        Some(host) => host,
    };
    let port = redirect.port_or_known_default().unwrap_or(80);
    let addr = format!("{}:{}", host, port);

    let server = Server::http(&addr).map_err(|e| {
        AuthenticationError::Failed(format!("无法启动本地服务器（端口可能被占用）{}: {}", addr, e))
    })?;
    tracing::info!("✅ 本地服务器启动成功: {}", redirect);

    Ok(server)
}

/// 本地回调监听器
///
/// 服务器在后台线程上阻塞接收请求，收到回调后通过 oneshot 交给调用方
pub struct CallbackListener {
    server: Arc<Server>,
    handle: JoinHandle<Result<()>>,
    callback_rx: oneshot::Receiver<CallbackParams>,
}

impl CallbackListener {
    pub fn start(server: Server, redirect: Url) -> Self {
        let server = Arc::new(server);
        let (callback_tx, callback_rx) = oneshot::channel();
        let handle = {
            let server = Arc::clone(&server);
            std::thread::spawn(move || serve_callback(&server, redirect, callback_tx))
        };
        Self {
            server,
            handle,
            callback_rx,
        }
    }

    /// 等待回调；`timeout` 为 `None` 时一直等待
    ///
    /// 返回前服务器线程已退出，端口已释放
    pub async fn wait(
        self,
        timeout: Option<Duration>,
    ) -> Result<CallbackParams, AuthenticationError> {
        let Self {
            server,
            handle,
            callback_rx,
        } = self;

        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, callback_rx).await {
                Ok(received) => received,
                Err(_) => {
                    server.unblock();
                    let _ = handle.join();
                    return Err(AuthenticationError::Failed(format!(
                        "授权超时：用户未在 {} 秒内完成授权",
                        limit.as_secs()
                    )));
                }
            },
            None => callback_rx.await,
        };

        // 服务器线程已退出（收到回调或出错）
        let joined = handle.join();
        match received {
            Ok(callback) => Ok(callback),
            Err(_) => {
                let reason = match joined {
                    Ok(Err(e)) => format!("{:#}", e),
                    Ok(Ok(())) => "本地服务器未收到回调".to_string(),
                    Err(_) => "本地服务器线程 panic".to_string(),
                };
                Err(AuthenticationError::Failed(reason))
            }
        }
    }
}

/// 处理回调请求
///
/// 只接受重定向路径上的请求，其它路径返回 404 并继续等待
fn serve_callback(
    server: &Server,
    redirect: Url,
    callback_tx: oneshot::Sender<CallbackParams>,
) -> Result<()> {
    let html_header = Header::from_bytes(&b"Content-Type"[..], &b"text/html; charset=utf-8"[..])
        .map_err(|_| anyhow::anyhow!("构造响应头失败"))?;

    for request in server.incoming_requests() {
        let url = redirect
            .join(request.url())
            .with_context(|| format!("回调 URL 无效: {}", request.url()))?;
        tracing::debug!("收到请求: {}", url.path());

        let callback = if url.path() == redirect.path() {
            parse_callback(&url)
        } else {
            None
        };

        let Some(callback) = callback else {
            request.respond(Response::from_string("Not Found").with_status_code(StatusCode(404)))?;
            continue;
        };

        let page = match callback {
            CallbackParams::Authorized { .. } => SUCCESS_HTML,
            CallbackParams::Rejected { .. } => ERROR_HTML,
        };
        request.respond(Response::from_string(page).with_header(html_header.clone()))?;

        // 接收端可能已超时退出
        callback_tx.send(callback).ok();
        break;
    }

    Ok(())
}

/// 交换授权码为 Token
async fn exchange_code(
    client: &GraphOAuthClient,
    code: String,
    verifier: PkceCodeVerifier,
) -> Result<GraphTokenResponse, AuthenticationError> {
    client
        .exchange_code(AuthorizationCode::new(code))
        .set_pkce_verifier(verifier)
        .request_async(oauth2::reqwest::async_http_client)
        .await
        .map_err(|e| {
            tracing::error!("Token 交换失败: {:?}", e);
            AuthenticationError::from(e)
        })
}

/// 把 Token 响应写入缓存
pub fn cache_token_response(
    config: &CredentialConfig,
    requested: &[String],
    store: &TokenCacheStore,
    cipher: &TokenCipher,
    response: &GraphTokenResponse,
) -> Result<AccountRef> {
    let account = AccountRef::from_id_token(
        response.extra_fields().id_token.as_deref(),
        &config.tenant_id,
    );

    let scopes = granted_scopes(response, requested);
    let cached = CachedAccount::new(
        &account,
        response.access_token().secret(),
        response.refresh_token().map(|t| t.secret().as_str()),
        expires_in_secs(response),
        scopes,
        cipher,
    )?;

    store.save_account(&cached)?;
    tracing::info!("✅ 账户已缓存: {}", account.username);

    Ok(account)
}

/// 响应里的权限；没有返回时视为请求的权限已全部授予
pub fn granted_scopes(response: &GraphTokenResponse, requested: &[String]) -> Vec<String> {
    match response.scopes() {
        Some(scopes) => scopes.iter().map(|s| s.as_str().to_string()).collect(),
        None => requested.to_vec(),
    }
}

/// 响应中的有效期（秒），不超过 [`MAX_EXPIRES_IN_SECS`]
pub fn expires_in_secs(response: &GraphTokenResponse) -> i64 {
    let secs = response
        .expires_in()
        .unwrap_or(Duration::from_secs(DEFAULT_EXPIRES_IN_SECS))
        .as_secs()
        .min(MAX_EXPIRES_IN_SECS);
    i64::try_from(secs).unwrap_or(DEFAULT_EXPIRES_IN_SECS as i64)
}

/// 只显示 Token 首尾各 5 个字符
pub fn redact(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 10 {
        return "***".to_string();
    }
    let head: String = chars[..5].iter().collect();
    let tail: String = chars[chars.len() - 5..].iter().collect();
    format!("{}...{}", head, tail)
}
