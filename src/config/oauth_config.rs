/// OAuth2 凭据配置模块
///
/// 支持从环境变量、配置文件或默认值读取身份提供方的客户端凭据
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 默认身份提供方实例地址
pub const DEFAULT_INSTANCE: &str = "https://login.microsoftonline.com";

/// 默认重定向 URI（本地回调服务器）
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:5000/callback";

/// 固定请求的邮件权限
pub const MAIL_SCOPES: [&str; 2] = ["Mail.ReadWrite", "Mail.Send"];

/// OAuth2 凭据配置
///
/// 进程启动时加载一次，之后只读
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// 应用（客户端）ID
    pub client_id: String,

    /// 租户 ID
    pub tenant_id: String,

    /// 客户端密钥
    pub client_secret: String,

    /// 重定向 URI（本地服务器地址）
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,

    /// 请求的 API 权限范围
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    /// 身份提供方实例地址，authority = `{instance}/{tenant_id}`
    #[serde(default = "default_instance")]
    pub instance: String,

    /// 等待浏览器回调的超时（秒），不设置则一直等待
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_timeout_secs: Option<u64>,
}

fn default_redirect_uri() -> String {
    DEFAULT_REDIRECT_URI.to_string()
}

fn default_scopes() -> Vec<String> {
    MAIL_SCOPES.iter().map(|s| s.to_string()).collect()
}

fn default_instance() -> String {
    DEFAULT_INSTANCE.to_string()
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            client_id: "YOUR_CLIENT_ID".to_string(),
            tenant_id: "YOUR_TENANT_ID".to_string(),
            client_secret: "YOUR_CLIENT_SECRET".to_string(),
            redirect_uri: default_redirect_uri(),
            scopes: default_scopes(),
            instance: default_instance(),
            callback_timeout_secs: None,
        }
    }
}

impl CredentialConfig {
    /// 加载 OAuth2 凭据
    ///
    /// 优先级（从高到低）：
    /// 1. 环境变量：`GRAPH_CLIENT_ID`, `GRAPH_TENANT_ID`, `GRAPH_CLIENT_SECRET`
    /// 2. 配置文件 `config.toml` 的 `[oauth]` 段
    /// 3. 默认占位符（交互式授权会拒绝使用）
    pub fn load() -> Result<Self> {
        if let Some(cfg) = Self::from_lookup(|name| std::env::var(name).ok()) {
            tracing::info!("✅ 从环境变量加载 OAuth2 配置");
            return Ok(cfg);
        }

        let path = super::config_path()?;
        match Self::load_from_file(&path) {
            Ok(cfg) => {
                tracing::info!("✅ 从配置文件加载 OAuth2 配置");
                Ok(cfg)
            }
            Err(e) => {
                tracing::warn!("⚠️ 未找到 OAuth2 配置（{}），使用默认占位符", e);
                tracing::warn!("请设置环境变量或在 {} 中添加 [oauth] 段", path.display());
                Ok(Self::default())
            }
        }
    }

    /// 从变量查询函数构造配置
    ///
    /// 三个必需变量齐全时返回配置，`OAUTH_REDIRECT_URI` 可选
    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let client_id = lookup("GRAPH_CLIENT_ID")?;
        let tenant_id = lookup("GRAPH_TENANT_ID")?;
        let client_secret = lookup("GRAPH_CLIENT_SECRET")?;

        let mut cfg = Self {
            client_id,
            tenant_id,
            client_secret,
            ..Self::default()
        };

        if let Some(redirect_uri) = lookup("OAUTH_REDIRECT_URI") {
            cfg.redirect_uri = redirect_uri;
        }

        Some(cfg)
    }

    /// 从配置文件的 `[oauth]` 段加载
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("配置文件不存在: {}", path.display());
        }

        let content = std::fs::read_to_string(path)?;
        let config_toml: toml::Value = toml::from_str(&content)?;

        let oauth_section = config_toml
            .get("oauth")
            .ok_or_else(|| anyhow::anyhow!("配置文件缺少 [oauth] 段"))?;

        Ok(oauth_section.clone().try_into()?)
    }

    /// 授权机构地址：`{instance}/{tenant_id}`
    pub fn authority(&self) -> String {
        format!("{}/{}", self.instance.trim_end_matches('/'), self.tenant_id)
    }

    /// 授权端点
    pub fn authorize_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/authorize", self.authority())
    }

    /// Token 端点
    pub fn token_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.authority())
    }

    /// 验证配置是否为默认占位符
    pub fn is_placeholder(&self) -> bool {
        self.client_id.contains("YOUR_CLIENT_ID")
            || self.tenant_id.contains("YOUR_TENANT_ID")
            || self.client_secret.contains("YOUR_CLIENT_SECRET")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = CredentialConfig::default();
        assert!(config.is_placeholder());
        assert_eq!(config.redirect_uri, "http://localhost:5000/callback");
        assert_eq!(config.scopes, vec!["Mail.ReadWrite", "Mail.Send"]);
        assert_eq!(config.callback_timeout_secs, None);
    }

    #[test]
    fn test_endpoints() {
        let config = CredentialConfig {
            tenant_id: "tenant-123".to_string(),
            instance: "https://login.microsoftonline.com/".to_string(),
            ..CredentialConfig::default()
        };

        assert_eq!(config.authority(), "https://login.microsoftonline.com/tenant-123");
        assert_eq!(
            config.authorize_endpoint(),
            "https://login.microsoftonline.com/tenant-123/oauth2/v2.0/authorize"
        );
        assert_eq!(
            config.token_endpoint(),
            "https://login.microsoftonline.com/tenant-123/oauth2/v2.0/token"
        );
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("GRAPH_CLIENT_ID", "client"),
            ("GRAPH_TENANT_ID", "tenant"),
            ("GRAPH_CLIENT_SECRET", "secret"),
        ]
        .into_iter()
        .collect();

        let config = CredentialConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.client_id, "client");
        assert_eq!(config.tenant_id, "tenant");
        assert_eq!(config.client_secret, "secret");
        assert_eq!(config.redirect_uri, DEFAULT_REDIRECT_URI);
        assert!(!config.is_placeholder());
    }

    #[test]
    fn test_from_lookup_requires_all_credentials() {
        let config = CredentialConfig::from_lookup(|k| match k {
            "GRAPH_CLIENT_ID" => Some("client".to_string()),
            _ => None,
        });
        assert!(config.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[mail]
api_base_url = "https://graph.microsoft.com/v1.0"

[oauth]
client_id = "file-client"
tenant_id = "file-tenant"
client_secret = "file-secret"
callback_timeout_secs = 120
"#,
        )
        .unwrap();

        let config = CredentialConfig::load_from_file(&path).unwrap();
        assert_eq!(config.client_id, "file-client");
        assert_eq!(config.scopes, vec!["Mail.ReadWrite", "Mail.Send"]);
        assert_eq!(config.instance, DEFAULT_INSTANCE);
        assert_eq!(config.callback_timeout_secs, Some(120));
    }

    #[test]
    fn test_load_from_file_without_oauth_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[mail]\napi_base_url = \"x\"\n").unwrap();

        let err = CredentialConfig::load_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("[oauth]"));
    }
}
