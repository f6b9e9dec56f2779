use std::path::{Path, PathBuf};

use super::types::{AppConfig, ExpansionConfig, HttpExpansionConfig};

/// Get the default taskmesh data directory: ~/.taskmesh
pub fn get_taskmesh_data_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(PathBuf::from(home).join(".taskmesh"))
}

pub fn load_default() -> anyhow::Result<AppConfig> {
    // Priority 1: ~/.taskmesh/config.toml (highest)
    let data_dir = get_taskmesh_data_dir()?;
    let home_config = data_dir.join("config.toml");

    // Priority 2: ./config.toml (current directory)
    let local_config = Path::new("config.toml");

    let mut cfg: AppConfig = if home_config.exists() {
        load_from_path(&home_config)?
    } else if local_config.exists() {
        load_from_path(local_config)?
    } else {
        AppConfig::default()
    };

    // Session logs default under the data directory.
    if cfg.session_log.directory == "./sessions" {
        cfg.session_log.directory = data_dir.join("sessions").to_string_lossy().to_string();
    }

    if cfg
        .logging
        .directory
        .as_ref()
        .map(|s| s.trim().is_empty())
        .unwrap_or(true)
    {
        cfg.logging.directory = Some(data_dir.join("logs").to_string_lossy().to_string());
    }

    apply_env_overrides(&mut cfg);

    Ok(cfg)
}

pub fn load_from_path(path: &Path) -> anyhow::Result<AppConfig> {
    let s = std::fs::read_to_string(path)?;
    Ok(toml::from_str::<AppConfig>(&s)?)
}

// Environment variable overrides (Priority 0: highest)
fn apply_env_overrides(cfg: &mut AppConfig) {
    if let Some(v) = env_non_empty("TASKMESH_BACKEND_URL") {
        cfg.backend.base_url = v;
    }

    if let Some(v) = env_non_empty("TASKMESH_MAX_PARALLEL") {
        match v.parse::<usize>() {
            Ok(n) => cfg.executor.max_parallel = n,
            Err(_) => tracing::warn!(value = %v, "ignoring invalid TASKMESH_MAX_PARALLEL"),
        }
    }

    if let Some(v) = env_non_empty("TASKMESH_TASK_TIMEOUT_MS") {
        match v.parse::<u64>() {
            Ok(ms) => cfg.executor.task_timeout_ms = ms,
            Err(_) => tracing::warn!(value = %v, "ignoring invalid TASKMESH_TASK_TIMEOUT_MS"),
        }
    }

    if let Some(v) = env_non_empty("TASKMESH_EXPANSION_URL") {
        match cfg.expansion {
            ExpansionConfig::Http(ref mut http) => http.url = v,
            _ => {
                cfg.expansion = ExpansionConfig::Http(HttpExpansionConfig {
                    url: v,
                    api_key: String::new(),
                    timeout_ms: 10_000,
                })
            }
        }
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
