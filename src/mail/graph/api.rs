/// Graph 邮件 API 调用模块
///
/// 发送邮件与读取收件箱。每次调用前都重新获取访问令牌，令牌不在此处保存。
/// 除认证失败外，所有失败都以 [`MailOutcome::Failure`] 返回
use reqwest::{Client, StatusCode};

use crate::config::MailConfig;
use crate::mail::graph::error::AuthenticationError;
use crate::mail::graph::provider::TokenSource;
use crate::mail::graph::types::{
    InboxMessage, MessageListResponse, OutboundMessage, SendMailRequest,
};
use crate::utils::http_client;

/// 请求失败详情
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFailure {
    /// HTTP 状态码；请求未发出或未收到响应时为 `None`
    pub status: Option<u16>,

    /// 响应体或错误描述
    pub body: String,
}

impl std::fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{}, {}", status, self.body),
            None => write!(f, "request failed, {}", self.body),
        }
    }
}

/// 邮件操作结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailOutcome<T> {
    Success(T),
    Failure(RequestFailure),
}

/// 收件箱第一页
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboxPage {
    /// 按 API 返回顺序排列
    pub messages: Vec<InboxMessage>,

    /// 还有更多邮件时的下一页地址（不会自动请求）
    pub next_link: Option<String>,
}

/// Graph 邮件 API 客户端
pub struct GraphApiClient<T> {
    http: Client,
    base_url: String,
    tokens: T,
}

impl<T: TokenSource> GraphApiClient<T> {
    /// 创建客户端，使用全局共享的 HTTP 客户端
    pub fn new(tokens: T, config: &MailConfig) -> Self {
        Self::with_http_client(tokens, config, http_client::get_client().clone())
    }

    pub fn with_http_client(tokens: T, config: &MailConfig, http: Client) -> Self {
        Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    /// 发送一封纯文本邮件，并保存到已发送
    ///
    /// 202 视为成功；其它状态返回 [`MailOutcome::Failure`]。不重试
    ///
    /// # Errors
    /// - 无法获取访问令牌
    pub async fn send_message(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<MailOutcome<()>, AuthenticationError> {
        let access_token = self.tokens.access_token().await?;

        let message = OutboundMessage {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        };
        let url = format!("{}/me/sendMail", self.base_url);

        tracing::debug!("发送邮件: {} -> {}", message.subject, message.recipient);

        let result = self
            .http
            .post(&url)
            .bearer_auth(&access_token)
            .json(&SendMailRequest::from(&message))
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => return Ok(transport_failure("发送邮件", e)),
        };

        let status = response.status();
        if status == StatusCode::ACCEPTED {
            tracing::info!("✅ email sent successfully");
            return Ok(MailOutcome::Success(()));
        }

        let failure = RequestFailure {
            status: Some(status.as_u16()),
            body: response.text().await.unwrap_or_default(),
        };
        tracing::warn!("error sending email: {}", failure);

        Ok(MailOutcome::Failure(failure))
    }

    /// 读取收件箱第一页
    ///
    /// 200 时按返回顺序输出每封邮件的发件人、主题和预览；
    /// 其它状态返回 [`MailOutcome::Failure`]，不输出任何邮件
    ///
    /// # Errors
    /// - 无法获取访问令牌
    pub async fn list_inbox_messages(
        &self,
    ) -> Result<MailOutcome<InboxPage>, AuthenticationError> {
        let access_token = self.tokens.access_token().await?;
        let url = format!("{}/me/messages", self.base_url);

        let result = self.http.get(&url).bearer_auth(&access_token).send().await;

        let response = match result {
            Ok(response) => response,
            Err(e) => return Ok(transport_failure("读取收件箱", e)),
        };

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status != StatusCode::OK {
            let failure = RequestFailure {
                status: Some(status.as_u16()),
                body: text,
            };
            tracing::warn!("Error fetching emails: {}", failure);
            return Ok(MailOutcome::Failure(failure));
        }

        let list: MessageListResponse = match serde_json::from_str(&text) {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!("解析收件箱响应失败: {}", e);
                return Ok(MailOutcome::Failure(RequestFailure {
                    status: Some(status.as_u16()),
                    body: text,
                }));
            }
        };

        let page = InboxPage {
            messages: list.value.into_iter().map(InboxMessage::from).collect(),
            next_link: list.next_link,
        };

        for message in &page.messages {
            tracing::info!(
                from = %message.sender,
                subject = %message.subject,
                body = %message.preview,
                "inbox message"
            );
        }

        if page.next_link.is_some() {
            tracing::debug!("收件箱还有更多邮件，只读取了第一页（{} 封）", page.messages.len());
        }

        Ok(MailOutcome::Success(page))
    }
}

fn transport_failure<T>(action: &str, err: reqwest::Error) -> MailOutcome<T> {
    tracing::warn!("{}请求失败: {}", action, err);
    MailOutcome::Failure(RequestFailure {
        status: None,
        body: err.to_string(),
    })
}
