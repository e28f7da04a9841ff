//! 附加参数选择的持久化

use crate::flags::{self, Operation};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to access settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// 键值设置存储
pub trait SettingsStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), SettingsError>;
}

#[derive(Debug, Clone, Default)]
pub struct MemorySettings {
    values: BTreeMap<String, String>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// 以 TOML 文件保存的设置，每次写入都落盘
#[derive(Debug, Clone)]
pub struct TomlSettings {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl TomlSettings {
    /// 打开设置文件；文件不存在时从空设置开始
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let values = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|source| SettingsError::Io {
                path: path.clone(),
                source,
            })?;
            toml::from_str(&content)?
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), SettingsError> {
        let io_err = |source| SettingsError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let content = toml::to_string(&self.values)?;
        fs::write(&self.path, content).map_err(io_err)?;
        Ok(())
    }
}

impl SettingsStore for TomlSettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.values.insert(key.to_string(), value.to_string());
        self.save()
    }
}

/// 每个操作已选的附加开关
pub struct FlagSettings<S> {
    store: S,
}

impl<S: SettingsStore> FlagSettings<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// 从未保存过时返回目录默认值；保存过空串则为空
    pub fn selected_keys(&self, op: Operation) -> Vec<String> {
        match self.store.get(op.settings_key()) {
            None => flags::default_selected_keys(op)
                .into_iter()
                .map(str::to_string)
                .collect(),
            Some(raw) => raw
                .split([';', '\n', '\r', '\t', ' '])
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn set_selected_keys<I, K>(&mut self, op: Operation, keys: I) -> Result<(), SettingsError>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for key in keys {
            let key = key.as_ref().trim();
            if key.is_empty() || normalized.iter().any(|k| k.eq_ignore_ascii_case(key)) {
                continue;
            }
            normalized.push(key.to_string());
        }
        normalized.sort_by_key(|k| k.to_lowercase());
        log::debug!("{} 附加开关: {:?}", op, normalized);
        self.store.set(op.settings_key(), &normalized.join(";"))
    }

    /// 当前选择对应的命令行参数，互斥组内只取第一个
    pub fn extra_args(&self, op: Operation) -> String {
        let selected = self.selected_keys(op);
        let effective = flags::enforce_exclusive(op, selected.iter().map(String::as_str));
        flags::build_args(op, effective)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn absent_value_falls_back_to_defaults() {
        let settings = FlagSettings::new(MemorySettings::new());
        assert_eq!(
            settings.selected_keys(Operation::Upgrade),
            vec!["upgrade.includeUnknown".to_string()]
        );
        assert_eq!(settings.extra_args(Operation::Upgrade), "--include-unknown");
        assert_eq!(settings.extra_args(Operation::Install), "");
    }

    #[test]
    fn empty_value_means_nothing_selected() {
        let mut settings = FlagSettings::new(MemorySettings::new());
        settings
            .set_selected_keys(Operation::Upgrade, Vec::<String>::new())
            .unwrap();
        assert!(settings.selected_keys(Operation::Upgrade).is_empty());
        assert_eq!(settings.extra_args(Operation::Upgrade), "");
    }

    #[test]
    fn stored_keys_split_on_any_separator() {
        let mut store = MemorySettings::new();
        store
            .set("InstallFlagKeys", "install.force;install.silent\ninstall.verboseLogs\t install.allowReboot")
            .unwrap();
        let settings = FlagSettings::new(store);
        assert_eq!(
            settings.selected_keys(Operation::Install),
            vec!["install.force", "install.silent", "install.verboseLogs", "install.allowReboot"]
        );
    }

    #[test]
    fn set_dedupes_and_sorts() {
        let mut settings = FlagSettings::new(MemorySettings::new());
        settings
            .set_selected_keys(
                Operation::Install,
                ["install.silent", " install.force ", "INSTALL.SILENT", ""],
            )
            .unwrap();
        assert_eq!(
            settings.store().get("InstallFlagKeys").as_deref(),
            Some("install.force;install.silent")
        );
    }

    #[test]
    fn extra_args_drops_conflicting_choice() {
        let mut settings = FlagSettings::new(MemorySettings::new());
        settings
            .set_selected_keys(
                Operation::Install,
                ["install.interactive", "install.silent", "install.force"],
            )
            .unwrap();
        assert_eq!(settings.extra_args(Operation::Install), "--silent --force");
    }

    #[test]
    fn toml_settings_persist_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");

        let mut settings = FlagSettings::new(TomlSettings::open(&path).unwrap());
        settings
            .set_selected_keys(Operation::Uninstall, ["uninstall.purge"])
            .unwrap();

        let reopened = FlagSettings::new(TomlSettings::open(&path).unwrap());
        assert_eq!(reopened.selected_keys(Operation::Uninstall), vec!["uninstall.purge"]);
        assert_eq!(reopened.extra_args(Operation::Uninstall), "--purge");
        assert_eq!(reopened.store().path(), path.as_path());
    }

    #[test]
    fn toml_settings_reject_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "this is = = not toml").unwrap();
        assert!(matches!(TomlSettings::open(&path), Err(SettingsError::Parse(_))));
    }
}
