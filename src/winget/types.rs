//! winget 相关数据类型定义

use serde::Serialize;
use std::collections::HashMap;

/// 缓冲模式下的命令输出结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    /// 进程启动失败时的哨兵结果（exit_code = -1，错误信息放在 stderr）
    pub fn start_failure(message: impl Into<String>) -> Self {
        Self {
            exit_code: -1,
            stdout: String::new(),
            stderr: message.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// 失败信息：stderr 优先，其次 stdout，最后是通用提示
    pub fn failure_message(&self, context: &str) -> String {
        let msg = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        if msg.is_empty() {
            format!("{} failed with exit code {}.", context, self.exit_code)
        } else {
            msg.to_string()
        }
    }
}

/// 流式模式的结束方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// 进程正常退出，携带原样的退出码
    Exited(i32),
    /// 进程没能启动
    StartFailed(String),
}

impl StreamOutcome {
    /// 启动失败时为 -1
    pub fn exit_code(&self) -> i32 {
        match self {
            StreamOutcome::Exited(code) => *code,
            StreamOutcome::StartFailed(_) => -1,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, StreamOutcome::Exited(0))
    }
}

/// 表格的一行：列名（不区分大小写）→ 去空白后的值
///
/// 列顺序与表头一致。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableRow {
    columns: Vec<(String, String)>,
}

impl TableRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同名列（忽略大小写）后写覆盖前写
    pub fn insert(&mut self, name: &str, value: String) {
        match self
            .columns
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some(slot) => slot.1 = value,
            None => self.columns.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// 取值，缺失列返回空串
    pub fn value(&self, name: &str) -> &str {
        self.get(name).unwrap_or("")
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(k, _)| k.as_str())
    }

    pub fn is_blank(&self) -> bool {
        self.columns.iter().all(|(_, v)| v.trim().is_empty())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// winget 包条目
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Package {
    pub name: String,
    id: String,
    pub version: String,
    /// 为空表示没有可用升级
    pub available_version: String,
    pub source: String,
    pub description: String,
}

impl Package {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// 包 Id，创建后不可变；比较时忽略大小写
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn id_key(&self) -> String {
        self.id.to_lowercase()
    }

    pub fn has_upgrade(&self) -> bool {
        !self.available_version.trim().is_empty()
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// 以小写 Id 为键的升级表
pub type UpgradeMap = HashMap<String, Package>;

/// 可用性探测结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub available: bool,
    pub detail: String,
}
