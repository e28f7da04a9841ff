//! winget 附加参数目录
//!
//! 只收录不需要额外取值的开关；互斥组内最多选中一个。

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Operation {
    Install,
    Upgrade,
    Uninstall,
}

impl Operation {
    pub const ALL: [Operation; 3] = [Operation::Install, Operation::Upgrade, Operation::Uninstall];

    /// 设置存储中保存已选开关的键名
    pub fn settings_key(self) -> &'static str {
        match self {
            Operation::Install => "InstallFlagKeys",
            Operation::Upgrade => "UpgradeFlagKeys",
            Operation::Uninstall => "UninstallFlagKeys",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Install => "install",
            Operation::Upgrade => "upgrade",
            Operation::Uninstall => "uninstall",
        };
        f.write_str(s)
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "install" => Ok(Operation::Install),
            "upgrade" => Ok(Operation::Upgrade),
            "uninstall" => Ok(Operation::Uninstall),
            other => Err(format!("unknown operation: {}", other)),
        }
    }
}

/// 一个可选的命令行开关
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Flag {
    pub key: &'static str,
    pub argument: &'static str,
    pub display_name: &'static str,
    pub category: &'static str,
    pub exclusive_group: Option<&'static str>,
    pub default_on: bool,
}

const fn flag(key: &'static str, argument: &'static str, display_name: &'static str, category: &'static str) -> Flag {
    Flag {
        key,
        argument,
        display_name,
        category,
        exclusive_group: None,
        default_on: false,
    }
}

const fn grouped(
    key: &'static str,
    argument: &'static str,
    display_name: &'static str,
    category: &'static str,
    group: &'static str,
) -> Flag {
    Flag {
        exclusive_group: Some(group),
        ..flag(key, argument, display_name, category)
    }
}

const INSTALL_FLAGS: &[Flag] = &[
    grouped("install.silent", "--silent", "Silent", "Mode", "mode"),
    grouped("install.interactive", "--interactive", "Interactive", "Mode", "mode"),
    grouped("install.scope.user", "--scope user", "Scope: User", "Scope", "scope"),
    grouped("install.scope.machine", "--scope machine", "Scope: Machine", "Scope", "scope"),
    flag("install.force", "--force", "Force", "Behavior"),
    flag("install.skipDependencies", "--skip-dependencies", "Skip dependencies", "Behavior"),
    flag("install.allowReboot", "--allow-reboot", "Allow reboot", "Behavior"),
    flag("install.ignoreSecurityHash", "--ignore-security-hash", "Ignore security hash", "Behavior"),
    flag("install.disableInteractivity", "--disable-interactivity", "Disable interactivity", "Diagnostics"),
    flag("install.verboseLogs", "--verbose-logs", "Verbose logs", "Diagnostics"),
    flag("install.openLogs", "--open-logs", "Open logs after", "Diagnostics"),
];

const UPGRADE_FLAGS: &[Flag] = &[
    Flag {
        default_on: true,
        ..flag("upgrade.includeUnknown", "--include-unknown", "Include unknown versions", "Selection")
    },
    flag("upgrade.includePinned", "--include-pinned", "Include pinned", "Selection"),
    grouped("upgrade.silent", "--silent", "Silent", "Mode", "mode"),
    grouped("upgrade.interactive", "--interactive", "Interactive", "Mode", "mode"),
    grouped("upgrade.scope.user", "--scope user", "Scope: User", "Scope", "scope"),
    grouped("upgrade.scope.machine", "--scope machine", "Scope: Machine", "Scope", "scope"),
    flag("upgrade.uninstallPrevious", "--uninstall-previous", "Uninstall previous", "Behavior"),
    flag("upgrade.force", "--force", "Force", "Behavior"),
    flag("upgrade.skipDependencies", "--skip-dependencies", "Skip dependencies", "Behavior"),
    flag("upgrade.allowReboot", "--allow-reboot", "Allow reboot", "Behavior"),
    flag("upgrade.ignoreSecurityHash", "--ignore-security-hash", "Ignore security hash", "Behavior"),
    flag("upgrade.disableInteractivity", "--disable-interactivity", "Disable interactivity", "Diagnostics"),
    flag("upgrade.verboseLogs", "--verbose-logs", "Verbose logs", "Diagnostics"),
    flag("upgrade.openLogs", "--open-logs", "Open logs after", "Diagnostics"),
];

const UNINSTALL_FLAGS: &[Flag] = &[
    grouped("uninstall.silent", "--silent", "Silent", "Mode", "mode"),
    grouped("uninstall.interactive", "--interactive", "Interactive", "Mode", "mode"),
    grouped("uninstall.scope.user", "--scope user", "Scope: User", "Scope", "scope"),
    grouped("uninstall.scope.machine", "--scope machine", "Scope: Machine", "Scope", "scope"),
    flag("uninstall.force", "--force", "Force", "Behavior"),
    grouped("uninstall.purge", "--purge", "Purge (portable)", "Behavior", "portable"),
    grouped("uninstall.preserve", "--preserve", "Preserve (portable)", "Behavior", "portable"),
    flag("uninstall.acceptSourceAgreements", "--accept-source-agreements", "Accept source agreements", "Behavior"),
    flag("uninstall.disableInteractivity", "--disable-interactivity", "Disable interactivity", "Diagnostics"),
    flag("uninstall.verboseLogs", "--verbose-logs", "Verbose logs", "Diagnostics"),
    flag("uninstall.openLogs", "--open-logs", "Open logs after", "Diagnostics"),
];

pub fn flags(op: Operation) -> &'static [Flag] {
    match op {
        Operation::Install => INSTALL_FLAGS,
        Operation::Upgrade => UPGRADE_FLAGS,
        Operation::Uninstall => UNINSTALL_FLAGS,
    }
}

pub fn default_selected_keys(op: Operation) -> Vec<&'static str> {
    flags(op)
        .iter()
        .filter(|f| f.default_on)
        .map(|f| f.key)
        .collect()
}

fn selected_set<'a, I: IntoIterator<Item = &'a str>>(selected: I) -> HashSet<String> {
    selected.into_iter().map(|k| k.trim().to_lowercase()).collect()
}

/// 按目录顺序拼接已选开关的参数，键名忽略大小写
pub fn build_args<'a, I: IntoIterator<Item = &'a str>>(op: Operation, selected: I) -> String {
    let selected = selected_set(selected);
    flags(op)
        .iter()
        .filter(|f| selected.contains(&f.key.to_lowercase()))
        .map(|f| f.argument)
        .filter(|a| !a.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// 规范化选择：去掉目录里没有的键；每个互斥组只保留目录顺序中的第一个
pub fn enforce_exclusive<'a, I: IntoIterator<Item = &'a str>>(op: Operation, selected: I) -> Vec<&'static str> {
    let selected = selected_set(selected);
    let mut taken_groups: HashSet<&'static str> = HashSet::new();
    let mut keys = Vec::new();
    for f in flags(op) {
        if !selected.contains(&f.key.to_lowercase()) {
            continue;
        }
        if let Some(group) = f.exclusive_group {
            if !taken_groups.insert(group) {
                log::debug!("enforce_exclusive: {} 与组 {} 中已选项冲突，忽略", f.key, group);
                continue;
            }
        }
        keys.push(f.key);
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_unique_per_operation() {
        for op in Operation::ALL {
            let mut seen = HashSet::new();
            for f in flags(op) {
                assert!(seen.insert(f.key.to_lowercase()), "duplicate {}", f.key);
                assert!(f.key.starts_with(&op.to_string()));
            }
        }
    }

    #[test]
    fn defaults() {
        assert!(default_selected_keys(Operation::Install).is_empty());
        assert_eq!(
            default_selected_keys(Operation::Upgrade),
            vec!["upgrade.includeUnknown"]
        );
    }

    #[test]
    fn build_args_follows_catalog_order() {
        let args = build_args(
            Operation::Install,
            ["install.force", "INSTALL.SILENT", "install.scope.machine", "bogus"],
        );
        assert_eq!(args, "--silent --scope machine --force");
        assert_eq!(build_args(Operation::Uninstall, []), "");
    }

    #[test]
    fn exclusive_groups_keep_first_in_catalog_order() {
        let keys = enforce_exclusive(
            Operation::Uninstall,
            ["uninstall.preserve", "uninstall.interactive", "uninstall.silent", "uninstall.purge", "x"],
        );
        assert_eq!(keys, vec!["uninstall.silent", "uninstall.purge"]);
    }

    #[test]
    fn operation_round_trips_through_text() {
        assert_eq!("Upgrade".parse::<Operation>(), Ok(Operation::Upgrade));
        assert!("repair".parse::<Operation>().is_err());
        assert_eq!(Operation::Uninstall.settings_key(), "UninstallFlagKeys");
    }
}
