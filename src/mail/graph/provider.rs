/// Token Provider
///
/// 先静默认证（缓存账户），失败后回退到交互式认证
use anyhow::Result;

use crate::config::crypto::TokenCipher;
use crate::config::oauth_config::CredentialConfig;
use crate::config::storage::TokenCacheStore;
use crate::mail::graph::error::AuthenticationError;
use crate::mail::graph::oauth;
use crate::mail::graph::token::TokenManager;
use crate::mail::graph::types::AccountRef;

/// 身份提供方客户端
///
/// 生产实现为 [`MsIdentityClient`]，测试中可替换
#[allow(async_fn_in_trait)]
pub trait IdentityClient {
    /// 已登录过的账户
    async fn accounts(&self) -> Vec<AccountRef>;

    /// 使用账户静默获取 Token，失败返回 `None`
    async fn acquire_silent(&self, account: &AccountRef, scopes: &[String]) -> Option<String>;

    /// 交互式获取 Token
    async fn acquire_interactive(&self, scopes: &[String]) -> Result<String, AuthenticationError>;
}

/// 访问令牌来源
#[allow(async_fn_in_trait)]
pub trait TokenSource {
    async fn access_token(&self) -> Result<String, AuthenticationError>;
}

/// 静默结果的去向
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenDecision {
    UseSilent(String),
    Interactive,
}

/// 根据是否有缓存账户及静默结果决定 Token 来源
pub fn decide_token_source(has_account: bool, silent: Option<String>) -> TokenDecision {
    match (has_account, silent) {
        (true, Some(token)) => TokenDecision::UseSilent(token),
        _ => TokenDecision::Interactive,
    }
}

/// Token Provider
pub struct TokenProvider<C> {
    client: C,
    scopes: Vec<String>,
}

impl<C: IdentityClient> TokenProvider<C> {
    pub fn new(client: C, config: &CredentialConfig) -> Self {
        Self {
            client,
            scopes: config.scopes.clone(),
        }
    }

    #[cfg(test)]
    fn identity_client(&self) -> &C {
        &self.client
    }

    /// 交互式获取访问令牌，不重试
    pub async fn acquire_token_interactive(&self) -> Result<String, AuthenticationError> {
        self.client.acquire_interactive(&self.scopes).await
    }

    /// 优先使用缓存账户静默获取，否则交互式获取
    pub async fn acquire_token_cached_or_interactive(&self) -> Result<String, AuthenticationError> {
        let accounts = self.client.accounts().await;

        let silent = match accounts.first() {
            Some(account) => {
                tracing::debug!("尝试静默认证: {}", account.username);
                self.client.acquire_silent(account, &self.scopes).await
            }
            None => None,
        };

        match decide_token_source(!accounts.is_empty(), silent) {
            TokenDecision::UseSilent(token) => {
                tracing::info!("✅ 静默认证成功");
                Ok(token)
            }
            TokenDecision::Interactive => {
                tracing::info!("没有可用的缓存凭据，转入交互式认证");
                self.acquire_token_interactive().await
            }
        }
    }
}

impl<C: IdentityClient> TokenSource for TokenProvider<C> {
    async fn access_token(&self) -> Result<String, AuthenticationError> {
        self.acquire_token_cached_or_interactive().await
    }
}

/// 基于授权码流程和本地 Token 缓存的身份提供方客户端
pub struct MsIdentityClient {
    config: CredentialConfig,
    store: TokenCacheStore,
    cipher: TokenCipher,
}

impl MsIdentityClient {
    pub fn new(config: CredentialConfig, store: TokenCacheStore, cipher: TokenCipher) -> Self {
        Self {
            config,
            store,
            cipher,
        }
    }

    /// 使用默认缓存位置和密钥
    pub fn open_default(config: CredentialConfig) -> Result<Self> {
        let dir = crate::config::config_dir()?;
        let store = TokenCacheStore::open_default()?;
        tracing::debug!("Token 缓存文件: {}", store.path().display());
        let cipher = TokenCipher::load(&dir)?;
        Ok(Self::new(config, store, cipher))
    }

    fn token_manager(&self) -> TokenManager<'_> {
        TokenManager::new(&self.config, &self.store, &self.cipher)
    }
}

impl IdentityClient for MsIdentityClient {
    async fn accounts(&self) -> Vec<AccountRef> {
        match self.token_manager().accounts() {
            Ok(accounts) => accounts,
            Err(e) => {
                tracing::warn!("⚠️ 读取 Token 缓存失败，视为没有缓存账户: {:#}", e);
                Vec::new()
            }
        }
    }

    async fn acquire_silent(&self, account: &AccountRef, scopes: &[String]) -> Option<String> {
        match self.token_manager().acquire_silent(account, scopes).await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!("⚠️ 静默认证失败: {:#}", e);
                None
            }
        }
    }

    async fn acquire_interactive(&self, scopes: &[String]) -> Result<String, AuthenticationError> {
        oauth::authenticate(&self.config, scopes, &self.store, &self.cipher).await
    }
}
