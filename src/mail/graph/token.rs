/// 静默认证（Token 缓存 + 刷新）
use anyhow::{Context, Result};
use oauth2::{RefreshToken, TokenResponse};

use crate::config::crypto::TokenCipher;
use crate::config::oauth_config::CredentialConfig;
use crate::config::storage::TokenCacheStore;
use crate::mail::graph::error::AuthenticationError;
use crate::mail::graph::oauth::{self, redact};
use crate::mail::graph::types::AccountRef;

/// Token 刷新阈值（提前多少分钟刷新）
const REFRESH_THRESHOLD_MINUTES: i64 = 5;

/// Token 管理器
///
/// 使用缓存中的账户静默获取访问令牌
pub struct TokenManager<'a> {
    config: &'a CredentialConfig,
    store: &'a TokenCacheStore,
    cipher: &'a TokenCipher,
}

impl<'a> TokenManager<'a> {
    pub fn new(
        config: &'a CredentialConfig,
        store: &'a TokenCacheStore,
        cipher: &'a TokenCipher,
    ) -> Self {
        Self {
            config,
            store,
            cipher,
        }
    }

    /// 已缓存的账户
    pub fn accounts(&self) -> Result<Vec<AccountRef>> {
        Ok(self
            .store
            .load_accounts()?
            .iter()
            .map(|cached| cached.account_ref())
            .collect())
    }

    /// 静默获取访问令牌
    ///
    /// 缓存的 Token 覆盖所需权限且未临近过期时直接返回，
    /// 否则使用 Refresh Token 换取新 Token。
    ///
    /// # Returns
    /// - `Ok(Some(token))` 静默成功
    /// - `Ok(None)` 账户不在缓存中或没有 Refresh Token
    ///
    /// # Errors
    /// - 缓存读取/解密失败
    /// - 刷新请求被拒绝
    ///
    /// 刷新成功后缓存写入失败只记录警告
    pub async fn acquire_silent(
        &self,
        account: &AccountRef,
        scopes: &[String],
    ) -> Result<Option<String>> {
        let mut accounts = self.store.load_accounts()?;
        let Some(cached) = accounts
            .iter_mut()
            .find(|a| a.home_account_id == account.home_account_id)
        else {
            tracing::debug!("缓存中没有账户: {}", account.home_account_id);
            return Ok(None);
        };

        if cached.covers_scopes(scopes) && !cached.is_token_expiring(REFRESH_THRESHOLD_MINUTES) {
            tracing::debug!("使用缓存的 Access Token（过期时间: {}）", cached.expires_at);
            return cached.decrypt_access_token(self.cipher).map(Some);
        }

        let Some(refresh_token) = cached
            .decrypt_refresh_token(self.cipher)
            .context("解密 Refresh Token 失败")?
        else {
            tracing::debug!("账户没有 Refresh Token，无法静默认证");
            return Ok(None);
        };

        tracing::info!(
            "Access Token 即将过期（{}），使用 Refresh Token 刷新",
            cached.expires_at
        );

        let client = oauth::build_client(self.config)?;
        let token_response = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token))
            .add_scopes(oauth::request_scopes(scopes))
            .request_async(oauth2::reqwest::async_http_client)
            .await
            .map_err(|e| {
                anyhow::anyhow!("Refresh Token 交换失败: {}", AuthenticationError::from(e))
            })?;

        let access_token = token_response.access_token().secret().to_string();

        cached.update_tokens(
            &access_token,
            token_response.refresh_token().map(|t| t.secret().as_str()),
            oauth::expires_in_secs(&token_response),
            self.cipher,
        )?;
        cached.scopes = oauth::granted_scopes(&token_response, scopes);

        // 新 Token 已拿到，缓存写入失败不影响本次调用
        if let Err(e) = self.store.save_accounts(&accounts) {
            tracing::warn!("⚠️ 保存 Token 缓存失败: {:#}", e);
        }

        tracing::info!("✅ Access Token 刷新成功: {}", redact(&access_token));

        Ok(Some(access_token))
    }
}
