/// Graph 账户与邮件数据结构
use anyhow::{Context, Result};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::crypto::TokenCipher;

/// 账户引用
///
/// 身份提供方返回的已登录身份句柄，只用于静默认证
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRef {
    /// `<oid>.<tid>`
    pub home_account_id: String,

    /// 登录名（通常是邮箱地址）
    pub username: String,
}

/// id_token 中用到的声明
#[derive(Debug, Default, Deserialize)]
struct IdTokenClaims {
    oid: Option<String>,
    tid: Option<String>,
    sub: Option<String>,
    preferred_username: Option<String>,
}

impl AccountRef {
    /// 从 id_token 解析账户引用
    ///
    /// 只读取 payload 中的声明，不校验签名（Token 直接来自 Token 端点）。
    /// 没有 id_token 或无法解析时，以租户 ID 构造一个兜底引用
    pub fn from_id_token(id_token: Option<&str>, tenant_id: &str) -> Self {
        let claims = id_token
            .and_then(|token| match decode_claims(token) {
                Ok(claims) => Some(claims),
                Err(e) => {
                    tracing::warn!("解析 id_token 失败: {:#}", e);
                    None
                }
            })
            .unwrap_or_default();

        let object_id = claims
            .oid
            .or(claims.sub)
            .unwrap_or_else(|| "unknown".to_string());
        let tenant = claims.tid.unwrap_or_else(|| tenant_id.to_string());

        Self {
            home_account_id: format!("{}.{}", object_id, tenant),
            username: claims.preferred_username.unwrap_or_default(),
        }
    }
}

fn decode_claims(id_token: &str) -> Result<IdTokenClaims> {
    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("id_token 格式错误：缺少 payload 段"))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .context("id_token payload Base64 解码失败")?;

    serde_json::from_slice(&bytes).context("id_token payload 不是有效的 JSON")
}

/// Token 缓存条目
///
/// Token 字段均为 `encrypted:` 格式，读取时按需解密
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedAccount {
    pub home_account_id: String,

    pub username: String,

    /// 访问令牌（加密存储）
    pub access_token: String,

    /// 刷新令牌（加密存储）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Token 过期时间（UTC）
    pub expires_at: DateTime<Utc>,

    /// 已授予的权限范围
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl CachedAccount {
    /// 创建缓存条目（Token 为明文，会立即加密）
    pub fn new(
        account: &AccountRef,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_in_seconds: i64,
        scopes: Vec<String>,
        cipher: &TokenCipher,
    ) -> Result<Self> {
        let access_token = cipher
            .encrypt(access_token)
            .context("加密 Access Token 失败")?;
        let refresh_token = refresh_token
            .map(|token| cipher.encrypt(token))
            .transpose()
            .context("加密 Refresh Token 失败")?;

        Ok(Self {
            home_account_id: account.home_account_id.clone(),
            username: account.username.clone(),
            access_token,
            refresh_token,
            expires_at: expiry_from_now(expires_in_seconds),
            scopes,
        })
    }

    pub fn account_ref(&self) -> AccountRef {
        AccountRef {
            home_account_id: self.home_account_id.clone(),
            username: self.username.clone(),
        }
    }

    pub fn decrypt_access_token(&self, cipher: &TokenCipher) -> Result<String> {
        cipher.decrypt(&self.access_token)
    }

    pub fn decrypt_refresh_token(&self, cipher: &TokenCipher) -> Result<Option<String>> {
        self.refresh_token
            .as_deref()
            .map(|token| cipher.decrypt(token))
            .transpose()
    }

    /// 检查 Token 是否即将过期
    ///
    /// # Arguments
    /// * `threshold_minutes` - 提前多少分钟算作"即将过期"
    pub fn is_token_expiring(&self, threshold_minutes: i64) -> bool {
        let threshold = Utc::now() + chrono::Duration::minutes(threshold_minutes);
        self.expires_at <= threshold
    }

    /// 已授予的权限是否覆盖 `requested`
    ///
    /// 比较时忽略大小写和资源前缀（`https://graph.microsoft.com/Mail.Send` 等同 `Mail.Send`）
    pub fn covers_scopes(&self, requested: &[String]) -> bool {
        requested.iter().all(|wanted| {
            self.scopes
                .iter()
                .any(|granted| short_scope(granted).eq_ignore_ascii_case(short_scope(wanted)))
        })
    }

    /// 用刷新得到的新 Token 更新条目（自动加密）
    ///
    /// 响应中没有新的刷新令牌时保留原值
    pub fn update_tokens(
        &mut self,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_in_seconds: i64,
        cipher: &TokenCipher,
    ) -> Result<()> {
        self.access_token = cipher.encrypt(access_token)?;
        if let Some(refresh_token) = refresh_token {
            self.refresh_token = Some(cipher.encrypt(refresh_token)?);
        }
        self.expires_at = expiry_from_now(expires_in_seconds);
        Ok(())
    }
}

/// 从现在起 `seconds` 秒后的时间点；超出可表示范围时取一小时后
fn expiry_from_now(seconds: i64) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::TimeDelta::try_seconds(seconds)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(now + chrono::TimeDelta::hours(1))
}

fn short_scope(scope: &str) -> &str {
    scope.rsplit('/').next().unwrap_or(scope)
}

/// 待发送邮件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// 收件箱邮件摘要
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxMessage {
    /// 发件人地址
    pub sender: String,
    pub subject: String,
    /// 正文预览
    pub preview: String,
}

// ---- Graph API 线上格式 ----

/// `POST /me/sendMail` 请求体
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMailRequest {
    pub message: MessagePayload,
    /// Graph 接受字符串形式的布尔值
    pub save_to_sent_items: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub subject: String,
    pub body: ItemBody,
    pub to_recipients: Vec<Recipient>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemBody {
    pub content_type: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub email_address: EmailAddress,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EmailAddress {
    #[serde(default)]
    pub address: Option<String>,
}

impl From<&OutboundMessage> for SendMailRequest {
    fn from(message: &OutboundMessage) -> Self {
        Self {
            message: MessagePayload {
                subject: message.subject.clone(),
                body: ItemBody {
                    content_type: "Text".to_string(),
                    content: message.body.clone(),
                },
                to_recipients: vec![Recipient {
                    email_address: EmailAddress {
                        address: Some(message.recipient.clone()),
                    },
                }],
            },
            save_to_sent_items: "true".to_string(),
        }
    }
}

/// `GET /me/messages` 响应体
#[derive(Debug, Deserialize)]
pub struct MessageListResponse {
    #[serde(default)]
    pub value: Vec<GraphMessage>,

    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphMessage {
    #[serde(default)]
    pub from: Option<Recipient>,

    #[serde(default)]
    pub subject: Option<String>,

    #[serde(default)]
    pub body_preview: Option<String>,
}

impl From<GraphMessage> for InboxMessage {
    fn from(message: GraphMessage) -> Self {
        Self {
            sender: message
                .from
                .and_then(|from| from.email_address.address)
                .unwrap_or_default(),
            subject: message.subject.unwrap_or_default(),
            preview: message.body_preview.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_id_token(claims: serde_json::Value) -> String {
        format!(
            "eyJhbGciOiJub25lIn0.{}.sig",
            URL_SAFE_NO_PAD.encode(claims.to_string())
        )
    }

    fn test_cipher() -> TokenCipher {
        TokenCipher::new([3u8; 32])
    }

    #[test]
    fn test_account_from_id_token() {
        let token = fake_id_token(serde_json::json!({
            "oid": "object-1",
            "tid": "tenant-1",
            "preferred_username": "someone@contoso.com"
        }));

        let account = AccountRef::from_id_token(Some(&token), "configured-tenant");
        assert_eq!(account.home_account_id, "object-1.tenant-1");
        assert_eq!(account.username, "someone@contoso.com");
    }

    #[test]
    fn test_account_without_id_token() {
        let account = AccountRef::from_id_token(None, "configured-tenant");
        assert_eq!(account.home_account_id, "unknown.configured-tenant");
        assert!(account.username.is_empty());

        // 无法解析的 id_token 同样走兜底
        let account = AccountRef::from_id_token(Some("not-a-jwt"), "configured-tenant");
        assert_eq!(account.home_account_id, "unknown.configured-tenant");
    }

    #[test]
    fn test_cached_account_encrypts_tokens() {
        let cipher = test_cipher();
        let account = AccountRef {
            home_account_id: "oid.tid".to_string(),
            username: "user@contoso.com".to_string(),
        };

        let cached = CachedAccount::new(
            &account,
            "plain_access",
            Some("plain_refresh"),
            3600,
            vec!["Mail.Send".to_string()],
            &cipher,
        )
        .unwrap();

        assert!(!cached.access_token.contains("plain_access"));
        assert_eq!(cached.decrypt_access_token(&cipher).unwrap(), "plain_access");
        assert_eq!(
            cached.decrypt_refresh_token(&cipher).unwrap().as_deref(),
            Some("plain_refresh")
        );
        assert_eq!(cached.account_ref(), account);
    }

    #[test]
    fn test_is_token_expiring() {
        let cipher = test_cipher();
        let account = AccountRef {
            home_account_id: "oid.tid".to_string(),
            username: String::new(),
        };
        let mut cached = CachedAccount::new(&account, "a", None, 3600, vec![], &cipher).unwrap();

        assert!(!cached.is_token_expiring(10));
        assert!(cached.is_token_expiring(120));

        cached.expires_at = Utc::now() - chrono::Duration::minutes(10);
        assert!(cached.is_token_expiring(0));
    }

    #[test]
    fn test_out_of_range_lifetime_does_not_panic() {
        let cipher = test_cipher();
        let account = AccountRef {
            home_account_id: "oid.tid".to_string(),
            username: String::new(),
        };
        let mut cached =
            CachedAccount::new(&account, "a", None, i64::MAX, vec![], &cipher).unwrap();
        assert!(!cached.is_token_expiring(0));

        cached.update_tokens("b", None, i64::MAX, &cipher).unwrap();
        assert!(!cached.is_token_expiring(0));
        assert!(cached.expires_at <= Utc::now() + chrono::Duration::hours(2));
    }

    #[test]
    fn test_covers_scopes() {
        let cipher = test_cipher();
        let account = AccountRef {
            home_account_id: "oid.tid".to_string(),
            username: String::new(),
        };
        let cached = CachedAccount::new(
            &account,
            "a",
            None,
            3600,
            vec![
                "https://graph.microsoft.com/Mail.ReadWrite".to_string(),
                "https://graph.microsoft.com/mail.send".to_string(),
                "openid".to_string(),
            ],
            &cipher,
        )
        .unwrap();

        let wanted = vec!["Mail.ReadWrite".to_string(), "Mail.Send".to_string()];
        assert!(cached.covers_scopes(&wanted));
        assert!(!cached.covers_scopes(&["Calendars.Read".to_string()]));
    }

    #[test]
    fn test_send_mail_payload_shape() {
        let message = OutboundMessage {
            recipient: "a@b.com".to_string(),
            subject: "S".to_string(),
            body: "B".to_string(),
        };

        let json = serde_json::to_value(SendMailRequest::from(&message)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "message": {
                    "subject": "S",
                    "body": {"contentType": "Text", "content": "B"},
                    "toRecipients": [{"emailAddress": {"address": "a@b.com"}}]
                },
                "saveToSentItems": "true"
            })
        );
    }

    #[test]
    fn test_inbox_projection_with_missing_fields() {
        let response: MessageListResponse = serde_json::from_value(serde_json::json!({
            "value": [
                {"subject": null, "bodyPreview": "preview only"},
                {"from": {"emailAddress": {"name": "No Address"}}, "subject": "hi"}
            ]
        }))
        .unwrap();

        let messages: Vec<InboxMessage> = response.value.into_iter().map(Into::into).collect();
        assert_eq!(messages[0].sender, "");
        assert_eq!(messages[0].subject, "");
        assert_eq!(messages[0].preview, "preview only");
        assert_eq!(messages[1].sender, "");
        assert_eq!(messages[1].subject, "hi");
        assert!(response.next_link.is_none());
    }
}
