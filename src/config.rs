use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::phase::DEFAULT_STATUS_MAX_CHARS;
use crate::winget::{DEFAULT_PROBE_TIMEOUT, DEFAULT_WINGET};

const APP_DIR: &str = "lian-winget";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// winget 可执行文件，默认从 PATH 查找
    pub winget_path: String,
    pub probe_timeout_secs: u64,
    /// 状态行的最大字符数
    pub status_max_chars: usize,
    /// 附加参数选择的保存位置
    pub settings_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            winget_path: DEFAULT_WINGET.to_string(),
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT.as_secs(),
            status_max_chars: DEFAULT_STATUS_MAX_CHARS,
            settings_path: config_dir().join("settings.toml"),
        }
    }
}

/// 配置目录：Windows 下为 `%APPDATA%\lian-winget`，其他平台为 `$HOME/.config/lian-winget`
pub fn config_dir() -> PathBuf {
    if cfg!(windows) {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join(APP_DIR);
        }
    }
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".config").join(APP_DIR)
}

impl Config {
    pub fn load_or_default() -> Result<Self> {
        Self::load_from(&config_dir().join("config.toml"))
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = fs::read_to_string(config_path)?;
            let config: Config = toml::from_str(&content)?;
            log::debug!("已加载配置: {}", config_path.display());
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}
