/// Microsoft Graph 模块 - OAuth2 认证与邮件 API 调用
pub mod api;
pub mod error;
pub mod oauth;
pub mod provider;
pub mod token;
pub mod types;

// 重新导出常用类型
pub use api::{GraphApiClient, MailOutcome};
pub use provider::{MsIdentityClient, TokenProvider};
