/// Token 加密/解密模块
///
/// 使用 AES-256-GCM 对 Token 缓存中的敏感数据进行加密存储
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use anyhow::{Context, Result};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use std::path::Path;

use crate::utils::machine_id;

/// 加密前缀（用于识别加密数据）
const ENCRYPTED_PREFIX: &str = "encrypted:";

/// AES-GCM Nonce 长度（12 字节）
const NONCE_SIZE: usize = 12;

/// 显式指定缓存密钥的环境变量（Base64 编码的 32 字节）
pub const CACHE_KEY_ENV: &str = "GRAPHMAIL_CACHE_KEY";

/// Token 加密器
///
/// 持有 256-bit 密钥，负责 Token 缓存字段的加解密
#[derive(Clone)]
pub struct TokenCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher").finish_non_exhaustive()
    }
}

impl TokenCipher {
    /// 使用给定密钥创建加密器
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// 加载默认加密器
    ///
    /// 优先级（从高到低）：
    /// 1. 环境变量 `GRAPHMAIL_CACHE_KEY`
    /// 2. 从机器 ID（或 `seed_dir` 下的随机种子）派生
    ///
    /// # Errors
    /// - 环境变量不是 32 字节的 Base64
    /// - 密钥派生失败
    pub fn load(seed_dir: &Path) -> Result<Self> {
        if let Ok(encoded) = std::env::var(CACHE_KEY_ENV) {
            tracing::debug!("从环境变量加载缓存密钥");
            return Self::from_base64(&encoded);
        }

        let key = machine_id::derive_encryption_key(seed_dir).context("无法派生加密密钥")?;
        Ok(Self::new(key))
    }

    /// 从 Base64 字符串解析密钥
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .with_context(|| format!("{} 不是有效的 Base64", CACHE_KEY_ENV))?;

        let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            anyhow::anyhow!(
                "{} 长度错误（需要 32 字节，实际 {} 字节）",
                CACHE_KEY_ENV,
                bytes.len()
            )
        })?;

        Ok(Self::new(key))
    }

    /// 加密明文 Token
    ///
    /// # 数据格式
    /// 返回格式：`"encrypted:" + Base64(nonce[12 bytes] + ciphertext)`
    ///
    /// # Errors
    /// - 加密失败
    pub fn encrypt(&self, plain: &str) -> Result<String> {
        let cipher = Aes256Gcm::new(&self.key.into());

        // 随机 nonce，相同明文每次加密结果不同
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, plain.as_bytes())
            .map_err(|e| anyhow::anyhow!("AES-GCM 加密失败: {}", e))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);

        Ok(format!("{}{}", ENCRYPTED_PREFIX, BASE64.encode(&combined)))
    }

    /// 解密加密的 Token
    ///
    /// # Errors
    /// - 格式错误（缺少前缀）
    /// - Base64 解码失败
    /// - 数据长度不足
    /// - 解密失败（密钥错误或数据损坏）
    pub fn decrypt(&self, encrypted: &str) -> Result<String> {
        let base64_data = encrypted
            .strip_prefix(ENCRYPTED_PREFIX)
            .ok_or_else(|| anyhow::anyhow!("加密数据格式错误：缺少 'encrypted:' 前缀"))?;

        let combined = BASE64.decode(base64_data).context("Base64 解码失败")?;

        if combined.len() < NONCE_SIZE {
            anyhow::bail!(
                "加密数据长度不足（需要至少 {} 字节，实际 {} 字节）",
                NONCE_SIZE,
                combined.len()
            );
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let cipher = Aes256Gcm::new(&self.key.into());
        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow::anyhow!("AES-GCM 解密失败（可能密钥错误或数据损坏）: {}", e))?;

        String::from_utf8(plaintext).context("解密后的数据不是有效的 UTF-8 字符串")
    }
}

/// 检查字符串是否为加密格式
pub fn is_encrypted(s: &str) -> bool {
    s.starts_with(ENCRYPTED_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> TokenCipher {
        TokenCipher::new([7u8; 32])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = test_cipher();
        let plain = "测试Token🔒";

        let encrypted = cipher.encrypt(plain).unwrap();
        assert!(is_encrypted(&encrypted));
        assert!(!encrypted.contains(plain));

        assert_eq!(cipher.decrypt(&encrypted).unwrap(), plain);
    }

    #[test]
    fn test_encrypt_different_nonce() {
        let cipher = test_cipher();

        // 两次加密应产生不同结果（因为 nonce 随机）
        let encrypted1 = cipher.encrypt("same_token").unwrap();
        let encrypted2 = cipher.encrypt("same_token").unwrap();
        assert_ne!(encrypted1, encrypted2);
    }

    #[test]
    fn test_decrypt_with_wrong_key() {
        let encrypted = test_cipher().encrypt("valid_token").unwrap();

        let result = TokenCipher::new([8u8; 32]).decrypt(&encrypted);
        assert!(result.unwrap_err().to_string().contains("解密失败"));
    }

    #[test]
    fn test_decrypt_invalid_format() {
        let result = test_cipher().decrypt("SGVsbG8gV29ybGQ=");
        assert!(result.unwrap_err().to_string().contains("缺少 'encrypted:' 前缀"));
    }

    #[test]
    fn test_decrypt_invalid_base64() {
        let result = test_cipher().decrypt("encrypted:!!!invalid@@@");
        assert!(result.unwrap_err().to_string().contains("Base64"));
    }

    #[test]
    fn test_decrypt_too_short() {
        let short_data = BASE64.encode(b"short");
        let result = test_cipher().decrypt(&format!("encrypted:{}", short_data));
        assert!(result.unwrap_err().to_string().contains("长度不足"));
    }

    #[test]
    fn test_key_from_base64() {
        let encoded = BASE64.encode([1u8; 32]);
        assert!(TokenCipher::from_base64(&encoded).is_ok());

        let too_short = BASE64.encode([1u8; 16]);
        let err = TokenCipher::from_base64(&too_short).unwrap_err();
        assert!(err.to_string().contains("长度错误"));
    }

    #[test]
    fn test_is_encrypted() {
        assert!(is_encrypted("encrypted:SGVsbG8="));
        assert!(!is_encrypted("plain_text"));
        assert!(!is_encrypted(""));
    }
}
