//! 安装位置解析
//!
//! 根据包的 Id（`ARP\<Scope>\<Arch>\<SubKey>` 形式）直接定位卸载记录，
//! 或按显示名称 / 版本在卸载记录中打分匹配。

#[cfg(windows)]
pub mod registry;
pub mod store;

#[cfg(windows)]
pub use registry::RegistryStore;
pub use store::{InstallRecord, MemoryStore, StoreError, StoreRoot, UninstallStore};

use std::cmp::Reverse;

const SCORE_NAME_EXACT: u32 = 100;
const SCORE_NAME_CONTAINS_WANTED: u32 = 60;
const SCORE_NAME_CONTAINED_IN_WANTED: u32 = 40;
const SCORE_VERSION_EXACT: u32 = 25;
const SCORE_VERSION_PREFIX: u32 = 10;

/// 解析后的 ARP 标识
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpIdentifier {
    /// 依次尝试的根：先是标识对应的视图，再是另一种处理器架构视图
    pub roots: [StoreRoot; 2],
    pub sub_path: String,
}

/// 解析 `ARP\Machine|User|CurrentUser\X86|X64\<子路径...>`
///
/// 段数少于 4、作用域或架构无法识别时返回 `None`。
pub fn parse_arp_identifier(id: &str) -> Option<ArpIdentifier> {
    let parts: Vec<&str> = id.trim().split('\\').collect();
    if parts.len() < 4 || !parts[0].eq_ignore_ascii_case("ARP") {
        return None;
    }

    let sub_path = parts[3..].join("\\");
    if sub_path.trim().is_empty() {
        return None;
    }

    let scope = parts[1];
    let machine = if scope.eq_ignore_ascii_case("Machine") {
        true
    } else if scope.eq_ignore_ascii_case("User") || scope.eq_ignore_ascii_case("CurrentUser") {
        false
    } else {
        return None;
    };

    let arch = parts[2];
    let x86 = if arch.eq_ignore_ascii_case("X86") {
        true
    } else if arch.eq_ignore_ascii_case("X64") {
        false
    } else {
        return None;
    };

    let roots = match (machine, x86) {
        (true, false) => [StoreRoot::MachineNative, StoreRoot::MachineWow32],
        (true, true) => [StoreRoot::MachineWow32, StoreRoot::MachineNative],
        (false, false) => [StoreRoot::User, StoreRoot::UserWow32],
        (false, true) => [StoreRoot::UserWow32, StoreRoot::User],
    };

    Some(ArpIdentifier { roots, sub_path })
}

/// 候选记录与目标名称 / 版本的匹配分
///
/// 名称（忽略大小写）：完全相同 100，候选包含目标 60，目标包含候选 40，否则 0 直接淘汰。
/// 两边版本都非空时：完全相同 +25，一方是另一方的前缀 +10。
pub fn score(wanted_name: &str, wanted_version: &str, name: &str, version: &str) -> u32 {
    let wanted_name = wanted_name.trim().to_lowercase();
    let name = name.trim().to_lowercase();
    if wanted_name.is_empty() || name.is_empty() {
        return 0;
    }

    let mut total = if name == wanted_name {
        SCORE_NAME_EXACT
    } else if name.contains(&wanted_name) {
        SCORE_NAME_CONTAINS_WANTED
    } else if wanted_name.contains(&name) {
        SCORE_NAME_CONTAINED_IN_WANTED
    } else {
        return 0;
    };

    let wanted_version = wanted_version.trim().to_lowercase();
    let version = version.trim().to_lowercase();
    if !wanted_version.is_empty() && !version.is_empty() {
        if version == wanted_version {
            total += SCORE_VERSION_EXACT;
        } else if version.starts_with(&wanted_version) || wanted_version.starts_with(&version) {
            total += SCORE_VERSION_PREFIX;
        }
    }

    total
}

/// 安装位置解析器
///
/// 只读取存储，不需要加锁；所有查找错误都被吞掉，结果表现为"未找到"。
#[derive(Debug, Clone)]
pub struct InstallLocationResolver<S> {
    store: S,
}

impl<S: UninstallStore> InstallLocationResolver<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// 先按 ARP 标识解析，失败或不是 ARP 形式时按名称 / 版本模糊匹配
    pub fn resolve(&self, id: &str, display_name: &str, version: &str) -> Option<InstallRecord> {
        self.resolve_by_identifier(id)
            .or_else(|| self.resolve_by_name(display_name, version))
    }

    pub fn resolve_by_identifier(&self, id: &str) -> Option<InstallRecord> {
        let arp = parse_arp_identifier(id)?;

        for root in arp.roots {
            match self.store.read(root, &arp.sub_path) {
                Ok(Some(mut record)) => {
                    if record.display_name.trim().is_empty() {
                        record.display_name = arp.sub_path.clone();
                    }
                    log::debug!("resolve_by_identifier: {} 命中 {:?}", id, root);
                    return Some(record);
                }
                Ok(None) => {}
                Err(e) => log::debug!("resolve_by_identifier: {:?}\\{} 读取失败: {}", root, arp.sub_path, e),
            }
        }
        None
    }

    /// 按名称 / 版本打分，取最高分
    ///
    /// 同分时按显示名称（忽略大小写）的字典序取第一个，仍相同则取先枚举到的，
    /// 这样结果不依赖存储的枚举顺序是否稳定。
    pub fn resolve_by_name(&self, display_name: &str, version: &str) -> Option<InstallRecord> {
        if display_name.trim().is_empty() {
            return None;
        }

        let mut candidates: Vec<(u32, InstallRecord)> = Vec::new();
        for root in StoreRoot::ENUMERATED {
            let subkeys = match self.store.subkeys(root) {
                Ok(subkeys) => subkeys,
                Err(e) => {
                    log::debug!("resolve_by_name: 跳过 {:?}: {}", root, e);
                    continue;
                }
            };
            for subkey in subkeys {
                let record = match self.store.read(root, &subkey) {
                    Ok(Some(record)) => record,
                    Ok(None) => continue,
                    Err(e) => {
                        log::debug!("resolve_by_name: {:?}\\{} 读取失败: {}", root, subkey, e);
                        continue;
                    }
                };
                if record.display_name.trim().is_empty() {
                    continue;
                }
                let s = score(display_name, version, &record.display_name, &record.display_version);
                if s > 0 {
                    candidates.push((s, record));
                }
            }
        }

        log::debug!("resolve_by_name: {} 个候选", candidates.len());
        candidates
            .into_iter()
            .enumerate()
            .min_by_key(|(index, (s, record))| {
                (Reverse(*s), record.display_name.to_lowercase(), *index)
            })
            .map(|(_, (_, record))| record)
    }
}
