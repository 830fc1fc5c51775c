use std::path::{Path, PathBuf};

use anyhow::Context;

use super::types::AppConfig;

/// Get the default tollgate data directory: ~/.tollgate
pub fn get_tollgate_data_dir() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".tollgate"))
}

pub fn load_from_path(path: &Path) -> anyhow::Result<AppConfig> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let cfg = toml::from_str::<AppConfig>(&s)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    Ok(cfg)
}

pub fn load_default() -> anyhow::Result<AppConfig> {
    // Priority 1: ~/.tollgate/config.toml (highest)
    let data_dir = get_tollgate_data_dir()?;
    let home_config = data_dir.join("config.toml");

    // Priority 2: ./tollgate.toml (current directory)
    let local_config = Path::new("tollgate.toml");

    let mut cfg = if home_config.exists() {
        load_from_path(&home_config)?
    } else if local_config.exists() {
        load_from_path(local_config)?
    } else {
        AppConfig::default()
    };

    apply_env_overrides(&mut cfg, |name| std::env::var(name).ok());
    cfg.validate()?;
    Ok(cfg)
}

/// Environment variable overrides (Priority 0: highest).
pub fn apply_env_overrides<F>(cfg: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(v) = non_empty("TOLLGATE_MAX_MEMORY_MB") {
        match v.trim().parse::<u64>() {
            Ok(mb) => cfg.memory.max_memory_mb = mb,
            Err(e) => tracing::warn!("ignoring TOLLGATE_MAX_MEMORY_MB={v}: {e}"),
        }
    }
    if let Some(v) = non_empty("TOLLGATE_STORE_PATH") {
        cfg.storage.path = v;
    }
    if let Some(v) = non_empty("TOLLGATE_LOG_LEVEL") {
        cfg.logging.level = v;
    }
}
