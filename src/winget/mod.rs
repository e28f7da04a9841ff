//! winget 模块 — 对 winget 命令行的封装

pub mod parser;
pub mod session;
pub mod streaming;
pub mod types;

// 重新导出常用类型和函数
pub use parser::{parse_description, parse_table};
pub use session::{Operation, Session};
pub use streaming::{CommandRunner, ExecError, LineCallback, ProcessExecutor, CANCELLING_NOTICE};
pub use types::{Availability, CommandResult, Package, StreamOutcome, TableRow, UpgradeMap};

use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_WINGET: &str = "winget";
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const ACCEPT_SOURCE: &str = "--accept-source-agreements";
const ACCEPT_BOTH: &str = "--accept-source-agreements --accept-package-agreements";

#[derive(Debug, Error)]
pub enum WingetError {
    #[error("operation cancelled")]
    Cancelled,

    /// 只读命令（list / search）非零退出
    #[error("{0}")]
    CommandFailed(String),

    #[error("{0} is required")]
    InvalidArgument(&'static str),

    #[error("process I/O failed: {0}")]
    Io(std::io::Error),
}

impl From<ExecError> for WingetError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::Cancelled => WingetError::Cancelled,
            ExecError::Io(e) => WingetError::Io(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, WingetError>;

/// `winget repair` 的三种定位方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairTarget {
    Id(String),
    Query(String),
    Manifest(String),
}

/// 转义内嵌双引号后加上引号
fn quote(operand: &str) -> String {
    format!("\"{}\"", operand.replace('"', "\\\""))
}

fn with_extra(mut args: String, extra: Option<&str>) -> String {
    if let Some(extra) = extra.map(str::trim).filter(|e| !e.is_empty()) {
        args.push(' ');
        args.push_str(extra);
    }
    args
}

fn require<'a>(value: &'a str, what: &'static str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(WingetError::InvalidArgument(what));
    }
    Ok(value)
}

/// 非零退出时把 stderr / stdout / 通用提示作为错误信息
fn ensure_success(result: &CommandResult, context: &str) -> Result<()> {
    if result.success() {
        return Ok(());
    }
    Err(WingetError::CommandFailed(result.failure_message(context)))
}

/// 把表格行转换成包列表，丢弃缺少 Name 或 Id 的行
fn packages_from_rows(rows: &[TableRow], with_available: bool) -> Vec<Package> {
    rows.iter()
        .filter_map(|row| {
            let name = row.value("Name");
            let id = row.value("Id");
            if name.trim().is_empty() || id.trim().is_empty() {
                return None;
            }
            let mut pkg = Package::new(id, name);
            pkg.version = row.value("Version").to_string();
            pkg.source = row.value("Source").to_string();
            if with_available {
                pkg.available_version = row.value("Available").to_string();
            }
            Some(pkg)
        })
        .collect()
}

/// 把升级表合并进已安装列表（按 Id 忽略大小写匹配）
pub fn merge_upgrades(installed: &mut [Package], upgrades: &UpgradeMap) {
    for pkg in installed.iter_mut() {
        let Some(upgrade) = upgrades.get(&pkg.id_key()) else {
            continue;
        };
        if pkg.available_version.trim().is_empty() {
            pkg.available_version = upgrade.available_version.clone();
        }
        if pkg.source.trim().is_empty() {
            pkg.source = upgrade.source.clone();
        }
    }
}

/// winget 客户端
///
/// 只读操作（list / search / show）走缓冲执行并解析表格；
/// 修改类操作（install / upgrade / uninstall / export / import / repair）走流式执行，
/// 退出码原样返回给调用方，不做解释。
#[derive(Debug, Clone)]
pub struct WingetClient<R = ProcessExecutor> {
    runner: R,
    program: String,
    probe_timeout: Duration,
}

impl WingetClient<ProcessExecutor> {
    pub fn new() -> Self {
        Self::with_runner(ProcessExecutor::new())
    }
}

impl Default for WingetClient<ProcessExecutor> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: CommandRunner> WingetClient<R> {
    pub fn with_runner(runner: R) -> Self {
        Self {
            runner,
            program: DEFAULT_WINGET.to_string(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    async fn capture(&self, args: &str, cancel: &CancellationToken) -> Result<CommandResult> {
        Ok(self.runner.run_capture(&self.program, args, cancel).await?)
    }

    async fn stream(
        &self,
        args: String,
        on_line: LineCallback,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome> {
        log::info!("{} {}", self.program, args);
        Ok(self
            .runner
            .run_streaming(&self.program, &args, on_line, cancel)
            .await?)
    }

    // ===== 探测 =====

    /// 检查 winget 是否可用（`--version`，带超时）；任何失败都只体现在返回值里
    pub async fn check_available(&self, cancel: &CancellationToken) -> Availability {
        let probe = cancel.child_token();
        let timer = {
            let probe = probe.clone();
            let timeout = self.probe_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                probe.cancel();
            })
        };
        let result = self
            .runner
            .run_capture(&self.program, "--version", &probe)
            .await;
        timer.abort();

        match result {
            Ok(r) if r.success() => {
                let version = r.stdout.trim();
                Availability {
                    available: true,
                    detail: if version.is_empty() {
                        "winget available".to_string()
                    } else {
                        format!("winget {}", version)
                    },
                }
            }
            Ok(r) => {
                let msg = if r.stderr.trim().is_empty() {
                    r.stdout.trim()
                } else {
                    r.stderr.trim()
                };
                Availability {
                    available: false,
                    detail: if msg.is_empty() {
                        format!("winget exited with code {}", r.exit_code)
                    } else {
                        msg.to_string()
                    },
                }
            }
            Err(ExecError::Cancelled) => Availability {
                available: false,
                detail: "Timed out while checking winget".to_string(),
            },
            Err(ExecError::Io(e)) => Availability {
                available: false,
                detail: e.to_string(),
            },
        }
    }

    // ===== 查询 =====

    /// 已安装的包 (`winget list`)
    pub async fn list_installed(&self, cancel: &CancellationToken) -> Result<Vec<Package>> {
        let result = self.capture("list", cancel).await?;
        ensure_success(&result, "winget list")?;
        Ok(packages_from_rows(&parse_table(&result.stdout), true))
    }

    /// 可升级的包，以小写 Id 为键
    ///
    /// 失败时带 `--accept-source-agreements` 重试一次；仍失败则视为没有可用升级。
    pub async fn list_upgrades(&self, cancel: &CancellationToken) -> Result<UpgradeMap> {
        let mut result = self.capture("upgrade --include-unknown", cancel).await?;
        if !result.success() {
            log::debug!("list_upgrades: exit={}，带协议参数重试", result.exit_code);
            result = self
                .capture(&format!("upgrade --include-unknown {}", ACCEPT_SOURCE), cancel)
                .await?;
        }
        if !result.success() {
            log::warn!(
                "list_upgrades: winget upgrade 失败（exit={}），按无可用升级处理",
                result.exit_code
            );
            return Ok(UpgradeMap::new());
        }

        let mut map = UpgradeMap::new();
        for row in parse_table(&result.stdout) {
            let id = row.value("Id");
            if id.trim().is_empty() {
                continue;
            }
            let name = row.value("Name");
            let mut pkg = Package::new(id, if name.trim().is_empty() { id } else { name });
            pkg.version = row.value("Version").to_string();
            pkg.available_version = row.value("Available").to_string();
            pkg.source = row.value("Source").to_string();
            map.insert(pkg.id_key(), pkg);
        }
        Ok(map)
    }

    /// 已安装列表，并补上升级信息
    pub async fn list_installed_with_upgrades(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Package>> {
        let mut installed = self.list_installed(cancel).await?;
        let upgrades = self.list_upgrades(cancel).await?;
        merge_upgrades(&mut installed, &upgrades);
        Ok(installed)
    }

    /// 搜索远程源 (`winget search`)
    pub async fn search(&self, query: &str, cancel: &CancellationToken) -> Result<Vec<Package>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let args = format!("search {} {}", quote(query), ACCEPT_SOURCE);
        let result = self.capture(&args, cancel).await?;
        ensure_success(&result, "winget search")?;
        Ok(packages_from_rows(&parse_table(&result.stdout), false))
    }

    /// 包的详细描述 (`winget show`)；Id 为空或命令失败时返回空串
    pub async fn describe(&self, id: &str, cancel: &CancellationToken) -> Result<String> {
        let id = id.trim();
        if id.is_empty() {
            return Ok(String::new());
        }
        let args = format!("show --id {} {}", quote(id), ACCEPT_SOURCE);
        let result = self.capture(&args, cancel).await?;
        if !result.success() {
            log::debug!("describe: winget show {} exit={}", id, result.exit_code);
            return Ok(String::new());
        }
        Ok(parse_description(&result.stdout))
    }

    /// 给包补上 `winget show` 中的描述
    pub async fn describe_package(&self, pkg: Package, cancel: &CancellationToken) -> Result<Package> {
        let description = self.describe(pkg.id(), cancel).await?;
        Ok(pkg.with_description(description))
    }

    // ===== 修改类操作（流式输出） =====

    pub async fn install(
        &self,
        id: &str,
        location: Option<&str>,
        extra: Option<&str>,
        on_line: LineCallback,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome> {
        let id = require(id, "package id")?;
        let mut args = format!("install --id {} {}", quote(id), ACCEPT_BOTH);
        if let Some(location) = location.map(str::trim).filter(|l| !l.is_empty()) {
            args.push_str(&format!(" --location {}", quote(location)));
        }
        self.stream(with_extra(args, extra), on_line, cancel).await
    }

    pub async fn upgrade(
        &self,
        id: &str,
        extra: Option<&str>,
        on_line: LineCallback,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome> {
        let id = require(id, "package id")?;
        let args = format!("upgrade --id {} {}", quote(id), ACCEPT_BOTH);
        self.stream(with_extra(args, extra), on_line, cancel).await
    }

    pub async fn upgrade_all(
        &self,
        extra: Option<&str>,
        on_line: LineCallback,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome> {
        let args = format!("upgrade --all {}", ACCEPT_BOTH);
        self.stream(with_extra(args, extra), on_line, cancel).await
    }

    pub async fn uninstall(
        &self,
        id: &str,
        extra: Option<&str>,
        on_line: LineCallback,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome> {
        let id = require(id, "package id")?;
        let args = format!("uninstall --id {}", quote(id));
        self.stream(with_extra(args, extra), on_line, cancel).await
    }

    /// 导出已安装包列表到 JSON 文件
    pub async fn export(
        &self,
        output_path: &str,
        extra: Option<&str>,
        on_line: LineCallback,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome> {
        let path = require(output_path, "output path")?;
        let args = format!("export -o {} {}", quote(path), ACCEPT_SOURCE);
        self.stream(with_extra(args, extra), on_line, cancel).await
    }

    pub async fn import(
        &self,
        import_file: &str,
        extra: Option<&str>,
        on_line: LineCallback,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome> {
        let path = require(import_file, "import file path")?;
        let args = format!("import -i {} {}", quote(path), ACCEPT_BOTH);
        self.stream(with_extra(args, extra), on_line, cancel).await
    }

    pub async fn repair(
        &self,
        target: &RepairTarget,
        extra: Option<&str>,
        on_line: LineCallback,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome> {
        let args = match target {
            // --exact 避免按 Id 部分匹配到别的包
            RepairTarget::Id(id) => format!(
                "repair --id {} --exact {}",
                quote(require(id, "package id")?),
                ACCEPT_BOTH
            ),
            RepairTarget::Query(query) => {
                format!("repair -q {} {}", quote(require(query, "query")?), ACCEPT_BOTH)
            }
            RepairTarget::Manifest(path) => format!(
                "repair -m {} {}",
                quote(require(path, "manifest path")?),
                ACCEPT_BOTH
            ),
        };
        self.stream(with_extra(args, extra), on_line, cancel).await
    }
}
