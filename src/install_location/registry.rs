//! 基于 Windows 注册表的卸载记录存储

use super::store::{InstallRecord, StoreError, StoreRoot, UninstallStore};
use windows::core::{HSTRING, PWSTR};
use windows::Win32::Foundation::{ERROR_ACCESS_DENIED, ERROR_FILE_NOT_FOUND, ERROR_SUCCESS};
use windows::Win32::System::Registry::{
    RegCloseKey, RegEnumKeyExW, RegOpenKeyExW, RegQueryValueExW, HKEY, HKEY_CURRENT_USER,
    HKEY_LOCAL_MACHINE, KEY_READ, REG_EXPAND_SZ, REG_SZ, REG_VALUE_TYPE,
};

/// 注册表子键名的最大长度（字符）
const MAX_KEY_NAME: usize = 256;

/// 打开的注册表键，离开作用域时关闭
struct OwnedKey(HKEY);

impl Drop for OwnedKey {
    fn drop(&mut self) {
        unsafe {
            let _ = RegCloseKey(self.0);
        }
    }
}

/// 读取 `HKLM` / `HKCU` 下 Uninstall 键的存储
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryStore;

impl RegistryStore {
    pub fn new() -> Self {
        Self
    }
}

fn hive(root: StoreRoot) -> HKEY {
    if root.is_machine() {
        HKEY_LOCAL_MACHINE
    } else {
        HKEY_CURRENT_USER
    }
}

/// 打开子键；不存在时返回 `Ok(None)`
unsafe fn open_key(parent: HKEY, path: &str) -> Result<Option<OwnedKey>, StoreError> {
    let mut key = HKEY::default();
    let rc = RegOpenKeyExW(parent, &HSTRING::from(path), 0, KEY_READ, &mut key);
    if rc == ERROR_SUCCESS {
        Ok(Some(OwnedKey(key)))
    } else if rc == ERROR_FILE_NOT_FOUND {
        Ok(None)
    } else if rc == ERROR_ACCESS_DENIED {
        Err(StoreError::AccessDenied(path.to_string()))
    } else {
        Err(StoreError::Lookup(format!("RegOpenKeyExW({}) = {}", path, rc.0)))
    }
}

unsafe fn open_root(root: StoreRoot) -> Result<OwnedKey, StoreError> {
    open_key(hive(root), root.key_path())?.ok_or(StoreError::RootUnavailable(root))
}

/// 读取字符串值（REG_SZ / REG_EXPAND_SZ），缺失或类型不符时返回空串
unsafe fn read_string(key: &OwnedKey, name: &str) -> String {
    let value_name = HSTRING::from(name);
    let mut value_type = REG_VALUE_TYPE::default();
    let mut size = 0u32;

    let rc = RegQueryValueExW(
        key.0,
        &value_name,
        None,
        Some(&mut value_type as *mut _),
        None,
        Some(&mut size as *mut _),
    );
    if rc != ERROR_SUCCESS || (value_type != REG_SZ && value_type != REG_EXPAND_SZ) || size == 0 {
        return String::new();
    }

    let mut buffer = vec![0u16; (size as usize + 1) / 2];
    let rc = RegQueryValueExW(
        key.0,
        &value_name,
        None,
        Some(&mut value_type as *mut _),
        Some(buffer.as_mut_ptr() as *mut u8),
        Some(&mut size as *mut _),
    );
    if rc != ERROR_SUCCESS {
        return String::new();
    }

    let len = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());
    String::from_utf16_lossy(&buffer[..len])
}

unsafe fn read_record(key: &OwnedKey) -> InstallRecord {
    InstallRecord {
        display_name: read_string(key, "DisplayName"),
        display_version: read_string(key, "DisplayVersion"),
        install_location: read_string(key, "InstallLocation"),
        display_icon: read_string(key, "DisplayIcon"),
        uninstall_command: read_string(key, "UninstallString"),
    }
}

impl UninstallStore for RegistryStore {
    fn subkeys(&self, root: StoreRoot) -> Result<Vec<String>, StoreError> {
        unsafe {
            let key = open_root(root)?;
            let mut names = Vec::new();
            let mut index = 0u32;
            loop {
                let mut name = [0u16; MAX_KEY_NAME];
                let mut len = MAX_KEY_NAME as u32;
                let rc = RegEnumKeyExW(
                    key.0,
                    index,
                    PWSTR(name.as_mut_ptr()),
                    &mut len,
                    None,
                    PWSTR::null(),
                    None,
                    None,
                );
                if rc != ERROR_SUCCESS {
                    break;
                }
                names.push(String::from_utf16_lossy(&name[..len as usize]));
                index += 1;
            }
            log::debug!("RegistryStore: {:?} 下有 {} 个子键", root, names.len());
            Ok(names)
        }
    }

    fn read(&self, root: StoreRoot, sub_path: &str) -> Result<Option<InstallRecord>, StoreError> {
        unsafe {
            let parent = open_root(root)?;
            match open_key(parent.0, sub_path)? {
                Some(key) => Ok(Some(read_record(&key))),
                None => Ok(None),
            }
        }
    }
}
