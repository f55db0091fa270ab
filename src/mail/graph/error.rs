/// 认证错误类型
use oauth2::RequestTokenError;
use oauth2::basic::BasicErrorResponse;

/// 无法获取访问令牌
///
/// 静默认证和交互式认证都失败时返回，调用方不再重试
#[derive(Debug, thiserror::Error)]
pub enum AuthenticationError {
    /// 身份提供方拒绝（用户取消、拒绝授权、授权码无效等）
    #[error("could not authenticate: {error} - {description}")]
    Denied {
        /// 错误码（例如 `access_denied`, `invalid_grant`）
        error: String,
        /// 身份提供方给出的描述
        description: String,
    },

    /// 网络、本地回调服务器等其他失败
    #[error("could not authenticate: {0}")]
    Failed(String),

    /// 凭据配置无效
    #[error("invalid OAuth2 configuration: {0}")]
    InvalidConfig(String),
}

impl AuthenticationError {
    pub fn denied(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::Denied {
            error: error.into(),
            description: description.into(),
        }
    }

    /// 身份提供方的错误描述
    pub fn description(&self) -> &str {
        match self {
            Self::Denied { description, .. } => description,
            Self::Failed(description) | Self::InvalidConfig(description) => description,
        }
    }
}

impl From<anyhow::Error> for AuthenticationError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(format!("{:#}", err))
    }
}

impl<RE> From<RequestTokenError<RE, BasicErrorResponse>> for AuthenticationError
where
    RE: std::error::Error + 'static,
{
    fn from(err: RequestTokenError<RE, BasicErrorResponse>) -> Self {
        match err {
            RequestTokenError::ServerResponse(response) => Self::denied(
                response.error().as_ref(),
                response.error_description().cloned().unwrap_or_default(),
            ),
            other => Self::Failed(other.to_string()),
        }
    }
}
