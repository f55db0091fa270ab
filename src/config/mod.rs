use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod crypto;
pub mod oauth_config;
pub mod storage;

/// Graph API 默认地址
pub const GRAPH_API_ENDPOINT: &str = "https://graph.microsoft.com/v1.0";

/// 配置目录名
const APP_DIR_NAME: &str = "GraphMail";

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mail: MailConfig,

    #[serde(default)]
    pub demo: DemoConfig,
}

/// 邮件 API 配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailConfig {
    /// Graph API 基础地址
    pub api_base_url: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            api_base_url: GRAPH_API_ENDPOINT.to_string(),
        }
    }
}

/// 启动时发送的测试邮件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoConfig {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            recipient: "recipient@example.com".to_string(),
            subject: "test email".to_string(),
            body: "this is a test email sent by GraphMail".to_string(),
        }
    }
}

/// 获取配置目录（不存在时创建）
pub fn config_dir() -> Result<PathBuf> {
    let dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("无法获取配置目录"))?
        .join(APP_DIR_NAME);

    std::fs::create_dir_all(&dir).context("创建配置目录失败")?;
    Ok(dir)
}

/// 获取配置文件路径
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// 加载配置（文件不存在时写入默认配置）
pub fn load() -> Result<Config> {
    load_from(&config_path()?)
}

/// 从指定路径加载配置
pub fn load_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        let config = Config::default();
        save_to(path, &config)?;
        tracing::info!("已创建默认配置文件: {}", path.display());
        return Ok(config);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
    let config: Config = toml::from_str(&content).context("解析配置文件失败")?;
    Ok(config)
}

/// 保存配置到指定路径
fn save_to(path: &Path, config: &Config) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)
        .with_context(|| format!("写入配置文件失败: {}", path.display()))?;
    Ok(())
}
