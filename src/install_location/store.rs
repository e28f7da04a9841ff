//! 卸载记录存储（注册表 Uninstall 键的抽象）

use std::collections::HashMap;
use thiserror::Error;

/// 卸载记录存储的根
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreRoot {
    /// 本机，原生（64 位）视图
    MachineNative,
    /// 本机，32 位视图（WOW6432Node）
    MachineWow32,
    /// 当前用户
    User,
    /// 当前用户，32 位视图
    UserWow32,
}

impl StoreRoot {
    /// 模糊匹配时依次枚举的根
    pub const ENUMERATED: [StoreRoot; 3] = [
        StoreRoot::MachineNative,
        StoreRoot::MachineWow32,
        StoreRoot::User,
    ];

    /// 根键下的相对路径
    pub fn key_path(self) -> &'static str {
        match self {
            StoreRoot::MachineNative | StoreRoot::User => {
                r"SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall"
            }
            StoreRoot::MachineWow32 | StoreRoot::UserWow32 => {
                r"SOFTWARE\WOW6432Node\Microsoft\Windows\CurrentVersion\Uninstall"
            }
        }
    }

    pub fn is_machine(self) -> bool {
        matches!(self, StoreRoot::MachineNative | StoreRoot::MachineWow32)
    }
}

/// 一条卸载记录；缺失的值为空串
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct InstallRecord {
    pub display_name: String,
    pub display_version: String,
    pub install_location: String,
    pub display_icon: String,
    pub uninstall_command: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("uninstall root {0:?} is not available")]
    RootUnavailable(StoreRoot),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("lookup failed: {0}")]
    Lookup(String),
}

/// 卸载记录存储接口
///
/// 只读；枚举可能很慢，调用方需要响应性时应放到后台线程执行。
pub trait UninstallStore: Send + Sync {
    /// 列出某个根下的所有子键名
    fn subkeys(&self, root: StoreRoot) -> Result<Vec<String>, StoreError>;

    /// 读取某个根下的子路径；不存在时返回 `Ok(None)`
    fn read(&self, root: StoreRoot, sub_path: &str) -> Result<Option<InstallRecord>, StoreError>;
}

impl<T: UninstallStore + ?Sized> UninstallStore for &T {
    fn subkeys(&self, root: StoreRoot) -> Result<Vec<String>, StoreError> {
        (**self).subkeys(root)
    }

    fn read(&self, root: StoreRoot, sub_path: &str) -> Result<Option<InstallRecord>, StoreError> {
        (**self).read(root, sub_path)
    }
}

#[derive(Debug, Clone)]
enum MemoryEntry {
    Record(InstallRecord),
    Denied,
}

/// 内存中的卸载记录存储，枚举顺序即插入顺序
///
/// 子路径查找忽略大小写，与注册表一致。
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    roots: HashMap<StoreRoot, Vec<(String, MemoryEntry)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, root: StoreRoot, sub_path: &str, record: InstallRecord) -> &mut Self {
        self.put(root, sub_path, MemoryEntry::Record(record));
        self
    }

    /// 模拟无权限读取的子键
    pub fn deny(&mut self, root: StoreRoot, sub_path: &str) -> &mut Self {
        self.put(root, sub_path, MemoryEntry::Denied);
        self
    }

    fn put(&mut self, root: StoreRoot, sub_path: &str, entry: MemoryEntry) {
        let entries = self.roots.entry(root).or_default();
        match entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(sub_path))
        {
            Some(slot) => slot.1 = entry,
            None => entries.push((sub_path.to_string(), entry)),
        }
    }
}

impl UninstallStore for MemoryStore {
    fn subkeys(&self, root: StoreRoot) -> Result<Vec<String>, StoreError> {
        self.roots
            .get(&root)
            .map(|entries| entries.iter().map(|(k, _)| k.clone()).collect())
            .ok_or(StoreError::RootUnavailable(root))
    }

    fn read(&self, root: StoreRoot, sub_path: &str) -> Result<Option<InstallRecord>, StoreError> {
        let Some(entries) = self.roots.get(&root) else {
            return Err(StoreError::RootUnavailable(root));
        };
        match entries.iter().find(|(k, _)| k.eq_ignore_ascii_case(sub_path)) {
            Some((_, MemoryEntry::Record(record))) => Ok(Some(record.clone())),
            Some((k, MemoryEntry::Denied)) => Err(StoreError::AccessDenied(k.clone())),
            None => Ok(None),
        }
    }
}
