/// 机器指纹与加密密钥派生模块
///
/// 读取系统机器 ID（读取失败时使用本地随机种子），使用 Argon2 派生加密密钥
use anyhow::{Context, Result};
use argon2::Argon2;
use rand::RngCore;
use rand::rngs::OsRng;
use std::path::Path;

/// 固定盐值（编译时确定，用于密钥派生的一致性）
///
/// 注意：这个盐值对所有用户相同，真正的唯一性来自机器 ID
const FIXED_SALT: &[u8] = b"GraphMail.v1.2026";

/// 机器 ID 候选路径（systemd / dbus）
const MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];

/// 本地随机种子文件名（没有机器 ID 时使用）
const SEED_FILE_NAME: &str = "cache.seed";

/// 读取系统机器 ID
///
/// 依次尝试 `MACHINE_ID_PATHS`，返回第一个非空值
fn get_machine_id() -> Option<String> {
    MACHINE_ID_PATHS.iter().find_map(|path| {
        let id = std::fs::read_to_string(path).ok()?;
        let id = id.trim().to_string();
        if id.is_empty() {
            None
        } else {
            tracing::debug!("机器 ID 读取成功: {}", path);
            Some(id)
        }
    })
}

/// 读取或创建本地随机种子
///
/// 种子以十六进制保存在 `seed_dir/cache.seed`，首次调用时生成
fn load_or_create_seed(seed_dir: &Path) -> Result<String> {
    let path = seed_dir.join(SEED_FILE_NAME);

    if path.exists() {
        let seed = std::fs::read_to_string(&path)
            .with_context(|| format!("读取随机种子失败: {}", path.display()))?;
        return Ok(seed.trim().to_string());
    }

    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    let seed: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();

    std::fs::create_dir_all(seed_dir).context("创建配置目录失败")?;
    std::fs::write(&path, &seed)
        .with_context(|| format!("写入随机种子失败: {}", path.display()))?;

    tracing::info!("未找到机器 ID，已生成本地随机种子: {}", path.display());

    Ok(seed)
}

/// 从任意密钥材料派生 256-bit 密钥（Argon2id）
pub fn derive_key_from(material: &[u8]) -> Result<[u8; 32]> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(material, FIXED_SALT, &mut key)
        .map_err(|e| anyhow::anyhow!("Argon2 哈希失败: {}", e))?;
    Ok(key)
}

/// 从机器 ID 派生 256-bit 加密密钥
///
/// 相同机器上派生结果一致；没有机器 ID 时退回到 `seed_dir` 下的随机种子
///
/// # Errors
/// - 随机种子读写失败
/// - Argon2 哈希失败
pub fn derive_encryption_key(seed_dir: &Path) -> Result<[u8; 32]> {
    let material = match get_machine_id() {
        Some(id) => id,
        None => load_or_create_seed(seed_dir)?,
    };

    let key = derive_key_from(material.as_bytes())?;

    tracing::debug!("加密密钥派生成功（256-bit）");

    Ok(key)
}
