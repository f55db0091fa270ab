use anyhow::{Context, Result};

mod config;
mod mail;
mod utils;

use config::oauth_config::CredentialConfig;
use config::{Config, DemoConfig};
use mail::graph::{GraphApiClient, MailOutcome, MsIdentityClient, TokenProvider};

fn main() -> Result<()> {
    // 1. 初始化日志
    init_logger()?;

    // 2. 加载配置
    let app_config = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("⚠️ 加载配置失败: {:#}, 使用默认配置", e);
            Config::default()
        }
    };
    let credentials = CredentialConfig::load().context("加载 OAuth2 配置失败")?;

    // 3. 命令行参数覆盖测试邮件内容
    let demo = demo_message(&app_config.demo, std::env::args().skip(1));

    // 4. 单线程运行时，发送与读取依次执行
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("创建 Tokio 运行时失败")?;

    rt.block_on(run(app_config, credentials, demo))
}

/// 发送一封邮件，然后列出收件箱
///
/// 认证失败终止运行；API 失败只打印，继续下一步
async fn run(app_config: Config, credentials: CredentialConfig, demo: DemoConfig) -> Result<()> {
    let identity = MsIdentityClient::open_default(credentials.clone())
        .context("初始化 Token 缓存失败")?;
    let provider = TokenProvider::new(identity, &credentials);
    let gateway = GraphApiClient::new(provider, &app_config.mail);

    match gateway
        .send_message(&demo.recipient, &demo.subject, &demo.body)
        .await?
    {
        MailOutcome::Success(()) => println!("email sent successfully"),
        MailOutcome::Failure(failure) => println!("error sending email: {}", failure),
    }

    match gateway.list_inbox_messages().await? {
        MailOutcome::Success(page) => {
            for message in &page.messages {
                println!("From: {}", message.sender);
                println!("Subject: {}", message.subject);
                println!("Body: {}", message.preview);
                println!("{}", "-".repeat(40));
            }
        }
        MailOutcome::Failure(failure) => println!("Error fetching emails: {}", failure),
    }

    Ok(())
}

/// `graphmail [RECIPIENT [SUBJECT [BODY]]]`，缺省部分取自配置
fn demo_message(defaults: &DemoConfig, mut args: impl Iterator<Item = String>) -> DemoConfig {
    DemoConfig {
        recipient: args.next().unwrap_or_else(|| defaults.recipient.clone()),
        subject: args.next().unwrap_or_else(|| defaults.subject.clone()),
        body: args.next().unwrap_or_else(|| defaults.body.clone()),
    }
}

/// 初始化日志系统
fn init_logger() -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "graphmail=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
