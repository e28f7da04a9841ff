use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use lian_winget::config::Config;
use lian_winget::flags::{self, Flag, Operation as FlagOperation};
use lian_winget::install_location::InstallRecord;
use lian_winget::phase::PhaseTracker;
use lian_winget::settings::{FlagSettings, TomlSettings};
use lian_winget::winget::{
    LineCallback, Package, RepairTarget, Session, StreamOutcome, WingetClient, WingetError,
};

#[derive(Parser)]
#[command(name = "lian-winget", version, about = "winget 的命令行前端")]
struct Cli {
    /// 以 JSON 输出结果
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 检查 winget 是否可用
    Check,
    /// 列出已安装的包
    List {
        #[arg(long)]
        upgrades_only: bool,
    },
    Search {
        query: String,
        /// 为每个结果补上 `winget show` 的描述
        #[arg(long)]
        describe: bool,
    },
    /// 显示包描述
    Show {
        id: String,
    },
    Install {
        id: String,
        #[arg(long)]
        location: Option<String>,
    },
    /// 升级指定包，或用 --all 升级全部
    Upgrade {
        #[arg(required_unless_present = "all")]
        id: Option<String>,
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },
    Uninstall {
        id: String,
    },
    /// 导出已安装包列表
    Export {
        output: String,
    },
    Import {
        file: String,
    },
    Repair(RepairArgs),
    /// 查找包的安装位置（读取卸载记录）
    Locate {
        id: String,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value = "")]
        version: String,
    },
    /// 查看或设置某个操作的附加开关
    Flags {
        operation: FlagOperation,
        /// 逗号分隔的开关键名；传空串清空选择
        #[arg(long, value_delimiter = ',')]
        set: Option<Vec<String>>,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct RepairArgs {
    #[arg(long)]
    id: Option<String>,
    #[arg(long)]
    query: Option<String>,
    #[arg(long)]
    manifest: Option<String>,
}

impl RepairArgs {
    fn into_target(self) -> Option<RepairTarget> {
        self.id
            .map(RepairTarget::Id)
            .or(self.query.map(RepairTarget::Query))
            .or(self.manifest.map(RepairTarget::Manifest))
    }
}

#[derive(Serialize)]
struct FlagView {
    #[serde(flatten)]
    flag: Flag,
    selected: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = Config::load_or_default()?;
    let client = WingetClient::new()
        .program(config.winget_path.clone())
        .probe_timeout(config.probe_timeout());

    // Ctrl+C 取消当前操作；流式命令的取消提示由执行器输出
    let session = Arc::new(Session::new());
    {
        let session = session.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                session.cancel();
            }
        });
    }

    let operation = session.begin();
    let result = run(cli, &config, &client, operation.token()).await;
    session.finish(&operation);

    let code = result?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn run(
    cli: Cli,
    config: &Config,
    client: &WingetClient,
    cancel: &CancellationToken,
) -> Result<i32> {
    let json = cli.json;
    match cli.command {
        Command::Check => {
            let availability = client.check_available(cancel).await;
            if json {
                print_json(&availability)?;
            } else {
                println!("{}", availability.detail);
            }
            Ok(if availability.available { 0 } else { 1 })
        }
        Command::List { upgrades_only } => {
            let mut packages = client.list_installed_with_upgrades(cancel).await?;
            if upgrades_only {
                packages.retain(Package::has_upgrade);
            }
            print_packages(&packages, json)?;
            Ok(0)
        }
        Command::Search { query, describe } => {
            let mut packages = client.search(&query, cancel).await?;
            if describe {
                let mut described = Vec::with_capacity(packages.len());
                for pkg in packages {
                    described.push(client.describe_package(pkg, cancel).await?);
                }
                packages = described;
            }
            print_packages(&packages, json)?;
            Ok(0)
        }
        Command::Show { id } => {
            let description = client.describe(&id, cancel).await?;
            if json {
                print_json(&serde_json::json!({ "id": id, "description": description }))?;
            } else if description.is_empty() {
                eprintln!("没有找到 {} 的描述", id);
            } else {
                println!("{}", description);
            }
            Ok(0)
        }
        Command::Install { id, location } => {
            let extra = flag_settings(config)?.extra_args(FlagOperation::Install);
            let (on_line, tracker) = progress(config.status_max_chars);
            let outcome = client
                .install(&id, location.as_deref(), Some(&extra), on_line, cancel)
                .await;
            report(&tracker, outcome)
        }
        Command::Upgrade { id, all } => {
            let extra = flag_settings(config)?.extra_args(FlagOperation::Upgrade);
            let (on_line, tracker) = progress(config.status_max_chars);
            let outcome = match id {
                Some(id) if !all => client.upgrade(&id, Some(&extra), on_line, cancel).await,
                _ => client.upgrade_all(Some(&extra), on_line, cancel).await,
            };
            report(&tracker, outcome)
        }
        Command::Uninstall { id } => {
            let extra = flag_settings(config)?.extra_args(FlagOperation::Uninstall);
            let (on_line, tracker) = progress(config.status_max_chars);
            let outcome = client.uninstall(&id, Some(&extra), on_line, cancel).await;
            report(&tracker, outcome)
        }
        Command::Export { output } => {
            let (on_line, tracker) = progress(config.status_max_chars);
            let outcome = client.export(&output, None, on_line, cancel).await;
            report(&tracker, outcome)
        }
        Command::Import { file } => {
            let (on_line, tracker) = progress(config.status_max_chars);
            let outcome = client.import(&file, None, on_line, cancel).await;
            report(&tracker, outcome)
        }
        Command::Repair(args) => {
            let Some(target) = args.into_target() else {
                bail!("repair needs --id, --query or --manifest");
            };
            let (on_line, tracker) = progress(config.status_max_chars);
            let outcome = client.repair(&target, None, on_line, cancel).await;
            report(&tracker, outcome)
        }
        Command::Locate { id, name, version } => match locate(id, name, version).await? {
            Some(record) => {
                if json {
                    print_json(&record)?;
                } else {
                    println!("{}", record.display_name);
                    println!("  版本:     {}", record.display_version);
                    println!("  安装位置: {}", record.install_location);
                    println!("  图标:     {}", record.display_icon);
                    println!("  卸载命令: {}", record.uninstall_command);
                }
                Ok(0)
            }
            None => {
                eprintln!("没有找到匹配的卸载记录");
                Ok(1)
            }
        },
        Command::Flags { operation, set } => {
            let mut settings = flag_settings(config)?;
            if let Some(keys) = set {
                let keys = flags::enforce_exclusive(operation, keys.iter().map(String::as_str));
                settings.set_selected_keys(operation, keys)?;
            }
            let selected: Vec<String> = settings
                .selected_keys(operation)
                .iter()
                .map(|k| k.to_lowercase())
                .collect();
            let views: Vec<FlagView> = flags::flags(operation)
                .iter()
                .map(|flag| FlagView {
                    flag: *flag,
                    selected: selected.contains(&flag.key.to_lowercase()),
                })
                .collect();
            if json {
                print_json(&views)?;
            } else {
                for view in &views {
                    let mark = if view.selected { "x" } else { " " };
                    println!(
                        "[{}] {:<36} {:<28} {}",
                        mark, view.flag.key, view.flag.argument, view.flag.display_name
                    );
                }
                println!("附加参数: {}", settings.extra_args(operation));
            }
            Ok(0)
        }
    }
}

fn flag_settings(config: &Config) -> Result<FlagSettings<TomlSettings>> {
    Ok(FlagSettings::new(TomlSettings::open(&config.settings_path)?))
}

/// 逐行打印输出，阶段变化时在 stderr 显示状态
fn progress(max_chars: usize) -> (LineCallback, Arc<Mutex<PhaseTracker>>) {
    let tracker = Arc::new(Mutex::new(PhaseTracker::new(max_chars)));
    let observer = tracker.clone();
    let on_line: LineCallback = Arc::new(move |line: &str| {
        println!("{}", line);
        let mut tracker = observer.lock().unwrap_or_else(|e| e.into_inner());
        if tracker.observe(line) {
            print_status(&tracker);
        }
    });
    (on_line, tracker)
}

fn print_status(tracker: &PhaseTracker) {
    match tracker.percent() {
        Some(percent) => eprintln!("[{} {}%]", tracker.status(), percent),
        None => eprintln!("[{}]", tracker.status()),
    }
}

fn report(
    tracker: &Mutex<PhaseTracker>,
    outcome: lian_winget::winget::Result<StreamOutcome>,
) -> Result<i32> {
    let mut tracker = tracker.lock().unwrap_or_else(|e| e.into_inner());
    match outcome {
        Ok(StreamOutcome::Exited(code)) => {
            tracker.finish(code);
            print_status(&tracker);
            Ok(code)
        }
        // 失败信息已经通过行回调打印
        Ok(StreamOutcome::StartFailed(message)) => {
            log::error!("{}", message);
            tracker.finish(-1);
            print_status(&tracker);
            Ok(1)
        }
        Err(WingetError::Cancelled) => {
            tracker.cancelled();
            print_status(&tracker);
            Ok(130)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(windows)]
async fn locate(id: String, name: String, version: String) -> Result<Option<InstallRecord>> {
    use lian_winget::install_location::{InstallLocationResolver, RegistryStore};

    // 注册表枚举可能较慢，放到阻塞线程
    let record = tokio::task::spawn_blocking(move || {
        InstallLocationResolver::new(RegistryStore::new()).resolve(&id, &name, &version)
    })
    .await?;
    Ok(record)
}

#[cfg(not(windows))]
async fn locate(_id: String, _name: String, _version: String) -> Result<Option<InstallRecord>> {
    bail!("install location lookup needs the Windows registry")
}

fn print_packages(packages: &[Package], json: bool) -> Result<()> {
    if json {
        return print_json(&packages);
    }
    for pkg in packages {
        println!(
            "{:<40} {:<40} {:<16} {:<16} {}",
            pkg.name,
            pkg.id(),
            pkg.version,
            pkg.available_version,
            pkg.source
        );
        if !pkg.description.is_empty() {
            for line in pkg.description.lines() {
                println!("    {}", line);
            }
        }
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
