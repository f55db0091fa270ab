/// Token 缓存文件存储模块
///
/// 负责将已登录账户及其（加密的）Token 持久化到 TOML 文件
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::crypto;
use crate::mail::graph::types::CachedAccount;

/// 缓存文件版本号
const STORAGE_VERSION: &str = "1.0";

/// 缓存文件名
const CACHE_FILE_NAME: &str = "token_cache.toml";

/// 缓存文件容器
#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    /// 文件格式版本
    version: String,

    /// 已登录账户列表
    #[serde(default)]
    accounts: Vec<CachedAccount>,
}

/// Token 缓存存储
#[derive(Debug, Clone)]
pub struct TokenCacheStore {
    path: PathBuf,
}

impl TokenCacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 默认位置：`<config_dir>/GraphMail/token_cache.toml`
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(super::config_dir()?.join(CACHE_FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 加载所有缓存账户
    ///
    /// 文件不存在时返回空列表
    ///
    /// # Errors
    /// - 文件格式错误
    /// - 反序列化失败
    pub fn load_accounts(&self) -> Result<Vec<CachedAccount>> {
        if !self.path.exists() {
            tracing::debug!("Token 缓存文件不存在，返回空列表");
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("读取 Token 缓存失败: {}", self.path.display()))?;

        let cache: CacheFile =
            toml::from_str(&content).context("解析 Token 缓存失败（文件可能损坏）")?;

        if cache.version != STORAGE_VERSION {
            tracing::warn!(
                "Token 缓存版本不匹配（期望: {}, 实际: {}），尝试兼容加载",
                STORAGE_VERSION,
                cache.version
            );
        }

        let accounts: Vec<CachedAccount> = cache
            .accounts
            .into_iter()
            .filter(|entry| {
                let encrypted = crypto::is_encrypted(&entry.access_token);
                if !encrypted {
                    tracing::warn!("忽略未加密的缓存条目: {}", entry.username);
                }
                encrypted
            })
            .collect();

        tracing::debug!("成功加载 {} 个缓存账户", accounts.len());

        Ok(accounts)
    }

    /// 覆盖式保存整个账户列表
    pub fn save_accounts(&self, accounts: &[CachedAccount]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("创建缓存目录失败")?;
        }

        let cache = CacheFile {
            version: STORAGE_VERSION.to_string(),
            accounts: accounts.to_vec(),
        };

        let content = toml::to_string_pretty(&cache).context("序列化 Token 缓存失败")?;

        std::fs::write(&self.path, content)
            .with_context(|| format!("写入 Token 缓存失败: {}", self.path.display()))?;

        tracing::debug!(
            "成功保存 {} 个缓存账户到: {}",
            accounts.len(),
            self.path.display()
        );

        Ok(())
    }

    /// 保存单个账户（按 home_account_id 更新或追加）
    pub fn save_account(&self, account: &CachedAccount) -> Result<()> {
        let mut accounts = self.load_accounts()?;

        if let Some(existing) = accounts
            .iter_mut()
            .find(|a| a.home_account_id == account.home_account_id)
        {
            tracing::debug!("更新已缓存的账户: {}", account.username);
            *existing = account.clone();
        } else {
            tracing::debug!("缓存新账户: {}", account.username);
            accounts.push(account.clone());
        }

        self.save_accounts(&accounts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::crypto::TokenCipher;
    use crate::mail::graph::types::AccountRef;

    fn create_test_account(id: &str, cipher: &TokenCipher) -> CachedAccount {
        let account = AccountRef {
            home_account_id: id.to_string(),
            username: format!("{}@contoso.com", id),
        };
        CachedAccount::new(
            &account,
            "test_access_token",
            Some("test_refresh_token"),
            3600,
            vec!["Mail.ReadWrite".to_string(), "Mail.Send".to_string()],
            cipher,
        )
        .expect("创建测试账户失败")
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenCacheStore::new(dir.path().join("token_cache.toml"));

        assert!(store.load_accounts().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load_single_account() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenCacheStore::new(dir.path().join("nested").join("token_cache.toml"));
        let cipher = TokenCipher::new([5u8; 32]);

        store.save_account(&create_test_account("user1", &cipher)).unwrap();

        let loaded = store.load_accounts().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].username, "user1@contoso.com");
        assert_eq!(
            loaded[0].decrypt_access_token(&cipher).unwrap(),
            "test_access_token"
        );

        // 文件中不出现明文 Token
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("encrypted:"));
        assert!(!raw.contains("test_access_token"));
    }

    #[test]
    fn test_update_existing_account() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenCacheStore::new(dir.path().join("token_cache.toml"));
        let cipher = TokenCipher::new([5u8; 32]);

        let mut account = create_test_account("update", &cipher);
        store.save_account(&account).unwrap();
        store.save_account(&create_test_account("other", &cipher)).unwrap();

        account.username = "renamed@contoso.com".to_string();
        store.save_account(&account).unwrap();

        let loaded = store.load_accounts().unwrap();
        assert_eq!(loaded.len(), 2);

        let count = loaded
            .iter()
            .filter(|a| a.home_account_id == "update")
            .count();
        assert_eq!(count, 1);
        assert_eq!(loaded[0].username, "renamed@contoso.com");
    }

    #[test]
    fn test_plaintext_entries_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenCacheStore::new(dir.path().join("token_cache.toml"));
        std::fs::write(
            store.path(),
            r#"
version = "1.0"

[[accounts]]
home_account_id = "oid.tid"
username = "user@contoso.com"
access_token = "plain_token"
expires_at = "2030-01-01T00:00:00Z"
"#,
        )
        .unwrap();

        assert!(store.load_accounts().unwrap().is_empty());
    }

    #[test]
    fn test_corrupted_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenCacheStore::new(dir.path().join("token_cache.toml"));
        std::fs::write(store.path(), "not = [valid").unwrap();

        assert!(store.load_accounts().is_err());
    }
}
