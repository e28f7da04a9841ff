//! 进程执行（缓冲模式 / 流式模式）
//!
//! 两种模式都接受程序名、参数字符串和取消令牌：
//!   - 缓冲模式读取完整的 stdout / stderr，返回 [`CommandResult`]
//!   - 流式模式把每一行输出立即交给回调，返回退出码
//!
//! 取消时会结束整棵进程树（Unix 上是独立进程组，Windows 上是 `taskkill /T`），
//! 结束失败只记日志，不作为错误返回。

use super::parser::clean_terminal_output;
use super::types::{CommandResult, StreamOutcome};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// 流式模式取消时发给回调的提示行
pub const CANCELLING_NOTICE: &str = "(cancelling…)";

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// 行回调；可能同时被 stdout、stderr 两个读取任务调用
pub type LineCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("process I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// 外部命令执行接口，方便在测试里替换成假实现
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// 缓冲执行；启动失败返回 exit_code = -1 的结果而不是错误
    async fn run_capture(
        &self,
        program: &str,
        args: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandResult, ExecError>;

    /// 流式执行；启动失败时把失败信息作为一行交给回调并返回 [`StreamOutcome::StartFailed`]
    async fn run_streaming(
        &self,
        program: &str,
        args: &str,
        on_line: LineCallback,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome, ExecError>;
}

/// 基于 tokio 子进程的执行器
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

/// 把参数字符串拆成参数列表（非 Windows 平台）
///
/// 空白分隔；双引号内的空白保留；`\"` 表示字面量双引号。
pub fn split_args(args: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;
    let mut chars = args.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'"') => {
                chars.next();
                current.push('"');
                has_token = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    out.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        out.push(current);
    }
    out
}

fn build_command(program: &str, args: &str) -> Command {
    let mut cmd = Command::new(program);

    // Windows 上参数字符串原样交给目标进程，引号规则由 winget 自己解析
    #[cfg(windows)]
    {
        cmd.raw_arg(args);
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    #[cfg(not(windows))]
    cmd.args(split_args(args));

    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            // 独立进程组，取消时可以一次结束整棵进程树
            libc::setpgid(0, 0);
            #[cfg(target_os = "linux")]
            libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
            Ok(())
        });
    }

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// 结束以 pid 为根的整棵进程树，失败只记录日志
fn kill_process_tree(pid: u32) {
    #[cfg(unix)]
    {
        let rc = unsafe { libc::kill(-(pid as i32), libc::SIGKILL) };
        if rc != 0 {
            log::debug!(
                "kill_process_tree: kill(-{}) 失败: {}",
                pid,
                std::io::Error::last_os_error()
            );
        }
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        let result = std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .creation_flags(CREATE_NO_WINDOW)
            .output();
        match result {
            Ok(o) if !o.status.success() => {
                log::debug!("kill_process_tree: taskkill {} exit={:?}", pid, o.status.code())
            }
            Err(e) => log::debug!("kill_process_tree: taskkill {} 失败: {}", pid, e),
            _ => {}
        }
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
    }
}

/// 结束进程树并回收子进程
async fn terminate(child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        kill_process_tree(pid);
    }
    if let Err(e) = child.start_kill() {
        log::debug!("terminate: start_kill 失败: {}", e);
    }
    if let Err(e) = child.wait().await {
        log::warn!("terminate: 等待子进程退出失败: {}", e);
    }
}

async fn read_all<R: AsyncRead + Unpin>(stream: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut reader) = stream {
        if let Err(e) = reader.read_to_end(&mut buf).await {
            log::warn!("read_all: 读取输出失败: {}", e);
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn emit_line(raw: &[u8], on_line: &LineCallback) {
    let text = String::from_utf8_lossy(raw);
    let cleaned = clean_terminal_output(&text);
    if !cleaned.trim().is_empty() {
        on_line(&cleaned);
    }
}

/// 从流中读取行并交给回调
///
/// `\n` 和 `\r` 都视为行结束：winget 的下载进度通过 `\r` 就地刷新。
/// 按字节缓冲整行后再解码，避免多字节字符被读取块截断。
async fn forward_lines<R: AsyncRead + Unpin>(stream: Option<R>, on_line: LineCallback) {
    let Some(mut reader) = stream else {
        return;
    };
    let mut buffer = [0u8; 1024];
    let mut line_buffer: Vec<u8> = Vec::new();

    loop {
        let n = match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                log::warn!("forward_lines: 读取输出失败: {}", e);
                break;
            }
        };
        for &b in &buffer[..n] {
            match b {
                b'\n' | b'\r' => {
                    emit_line(&line_buffer, &on_line);
                    line_buffer.clear();
                }
                _ => line_buffer.push(b),
            }
        }
    }
    if !line_buffer.is_empty() {
        emit_line(&line_buffer, &on_line);
    }
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    // Unix 上被信号结束时没有退出码
    status.code().unwrap_or(-1)
}

#[async_trait]
impl CommandRunner for ProcessExecutor {
    async fn run_capture(
        &self,
        program: &str,
        args: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandResult, ExecError> {
        if cancel.is_cancelled() {
            return Err(ExecError::Cancelled);
        }
        log::debug!("run_capture: {} {}", program, args);

        let mut child = match build_command(program, args).spawn() {
            Ok(child) => child,
            Err(e) => {
                log::warn!("run_capture: 启动 {} 失败: {}", program, e);
                return Ok(CommandResult::start_failure(e.to_string()));
            }
        };
        let pid = child.id();

        let stdout_task = tokio::spawn(read_all(child.stdout.take()));
        let stderr_task = tokio::spawn(read_all(child.stderr.take()));

        let finished = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            done = async {
                let status = child.wait().await;
                let stdout = stdout_task.await.unwrap_or_default();
                let stderr = stderr_task.await.unwrap_or_default();
                (status, stdout, stderr)
            } => Some(done),
        };

        match finished {
            Some((status, stdout, stderr)) => {
                let result = CommandResult {
                    exit_code: exit_code(status?),
                    stdout,
                    stderr,
                };
                log::debug!("run_capture: {} exit={}", program, result.exit_code);
                Ok(result)
            }
            None => {
                log::info!("run_capture: {} {} 已取消", program, args);
                terminate(&mut child, pid).await;
                Err(ExecError::Cancelled)
            }
        }
    }

    async fn run_streaming(
        &self,
        program: &str,
        args: &str,
        on_line: LineCallback,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome, ExecError> {
        if cancel.is_cancelled() {
            return Err(ExecError::Cancelled);
        }
        log::debug!("run_streaming: {} {}", program, args);

        let mut child = match build_command(program, args).spawn() {
            Ok(child) => child,
            Err(e) => {
                log::warn!("run_streaming: 启动 {} 失败: {}", program, e);
                let message = format!("Failed to start {}: {}", program, e);
                on_line(&message);
                return Ok(StreamOutcome::StartFailed(message));
            }
        };
        let pid = child.id();

        let stdout_task = tokio::spawn(forward_lines(child.stdout.take(), on_line.clone()));
        let stderr_task = tokio::spawn(forward_lines(child.stderr.take(), on_line.clone()));

        let finished = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            status = async {
                let status = child.wait().await;
                // 等两个读取任务把剩余行送完
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                status
            } => Some(status),
        };

        match finished {
            Some(status) => {
                let code = exit_code(status?);
                log::debug!("run_streaming: {} exit={}", program, code);
                Ok(StreamOutcome::Exited(code))
            }
            None => {
                if matches!(child.try_wait(), Ok(None)) {
                    on_line(CANCELLING_NOTICE);
                }
                log::info!("run_streaming: {} {} 已取消", program, args);
                terminate(&mut child, pid).await;
                Err(ExecError::Cancelled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    #[test]
    fn split_args_respects_quotes() {
        assert_eq!(
            split_args(r#"search "visual studio" --accept-source-agreements"#),
            vec!["search", "visual studio", "--accept-source-agreements"]
        );
        assert_eq!(
            split_args(r#"show --id "a\"b""#),
            vec!["show", "--id", "a\"b"]
        );
        assert_eq!(split_args(r#"x "" y"#), vec!["x", "", "y"]);
        assert!(split_args("   ").is_empty());
    }

    fn collector() -> (LineCallback, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let cb: LineCallback = Arc::new(move |line: &str| {
            sink.lock().unwrap().push(line.to_string());
        });
        (cb, lines)
    }

    fn cancel_after(token: &CancellationToken, ms: u64) {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            token.cancel();
        });
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn capture_collects_both_streams_and_exit_code() {
        let cancel = CancellationToken::new();
        let result = ProcessExecutor::new()
            .run_capture(
                "sh",
                r#"-c "printf 'a\nb\n'; printf err 1>&2; exit 3""#,
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stdout, "a\nb\n");
        assert_eq!(result.stderr, "err");
    }

    #[tokio::test]
    async fn capture_start_failure_is_returned_as_data() {
        let cancel = CancellationToken::new();
        let result = ProcessExecutor::new()
            .run_capture("/nonexistent/lian-winget-test-binary", "--version", &cancel)
            .await
            .unwrap();
        assert_eq!(result.exit_code, -1);
        assert!(result.stdout.is_empty());
        assert!(!result.stderr.is_empty());
    }

    /// 让 shell 在后台启动一个 `sleep`，并把它的 pid 写进文件
    #[cfg(target_os = "linux")]
    fn background_sleep_script(prefix: &str, pid_file: &std::path::Path) -> String {
        format!(
            r#"-c "{}sleep 30 & echo $! > '{}'; wait""#,
            prefix,
            pid_file.display()
        )
    }

    /// pid 文件出现后再取消，保证孙进程已经启动
    #[cfg(target_os = "linux")]
    fn cancel_once_written(token: &CancellationToken, pid_file: &std::path::Path) {
        let token = token.clone();
        let pid_file = pid_file.to_path_buf();
        tokio::spawn(async move {
            for _ in 0..200 {
                let written = std::fs::read_to_string(&pid_file)
                    .map(|s| s.trim().parse::<u32>().is_ok())
                    .unwrap_or(false);
                if written {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            // 给读取任务一点时间送出已有的输出
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });
    }

    /// 进程已消失或只剩僵尸（`Z`）时视为已结束
    #[cfg(target_os = "linux")]
    async fn assert_process_gone(pid_file: &std::path::Path) {
        let pid: u32 = std::fs::read_to_string(pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let stat_path = format!("/proc/{}/stat", pid);
        for _ in 0..100 {
            let state = std::fs::read_to_string(&stat_path).ok().and_then(|stat| {
                // 格式: "pid (comm) S ..."，comm 里可能有空格
                let rest = &stat[stat.rfind(')')? + 1..];
                rest.split_whitespace().next().map(str::to_string)
            });
            match state.as_deref() {
                None | Some("Z") | Some("X") => return,
                Some(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
        panic!("grandchild {} still running after cancellation", pid);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn capture_cancellation_returns_promptly() {
        let cancel = CancellationToken::new();
        cancel_after(&cancel, 200);
        let started = Instant::now();
        let result = ProcessExecutor::new()
            .run_capture("sh", r#"-c "sleep 30 & sleep 30; wait""#, &cancel)
            .await;
        assert!(matches!(result, Err(ExecError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn capture_cancellation_kills_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("grandchild.pid");
        let cancel = CancellationToken::new();
        cancel_once_written(&cancel, &pid_file);

        let result = ProcessExecutor::new()
            .run_capture("sh", &background_sleep_script("", &pid_file), &cancel)
            .await;
        assert!(matches!(result, Err(ExecError::Cancelled)));
        assert_process_gone(&pid_file).await;
    }

    #[tokio::test]
    async fn already_cancelled_token_does_not_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (cb, lines) = collector();
        let result = ProcessExecutor::new()
            .run_streaming("/nonexistent/lian-winget-test-binary", "", cb, &cancel)
            .await;
        assert!(matches!(result, Err(ExecError::Cancelled)));
        assert!(lines.lock().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streaming_delivers_lines_from_both_streams() {
        let cancel = CancellationToken::new();
        let (cb, lines) = collector();
        let code = ProcessExecutor::new()
            .run_streaming(
                "sh",
                r#"-c "echo one; echo two 1>&2; printf 'p1\rp2\r\n\n'; echo three; exit 4""#,
                cb,
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(code, StreamOutcome::Exited(4));

        let lines = lines.lock().unwrap().clone();
        for expected in ["one", "two", "p1", "p2", "three"] {
            assert!(lines.iter().any(|l| l == expected), "missing {expected}: {lines:?}");
        }
        assert_eq!(lines.len(), 5);

        // 同一个流内保持顺序
        let stdout_order: Vec<&String> = lines.iter().filter(|l| *l != "two").collect();
        assert_eq!(stdout_order, vec!["one", "p1", "p2", "three"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streaming_cancellation_emits_notice() {
        let cancel = CancellationToken::new();
        cancel_after(&cancel, 300);
        let (cb, lines) = collector();
        let result = ProcessExecutor::new()
            .run_streaming("sh", r#"-c "echo started; sleep 30""#, cb, &cancel)
            .await;
        assert!(matches!(result, Err(ExecError::Cancelled)));
        let lines = lines.lock().unwrap().clone();
        let notices = lines.iter().filter(|l| l.as_str() == CANCELLING_NOTICE).count();
        assert_eq!(notices, 1, "{lines:?}");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn streaming_cancellation_kills_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("grandchild.pid");
        let cancel = CancellationToken::new();
        cancel_once_written(&cancel, &pid_file);
        let (cb, lines) = collector();

        let result = ProcessExecutor::new()
            .run_streaming("sh", &background_sleep_script("echo hi; ", &pid_file), cb, &cancel)
            .await;
        assert!(matches!(result, Err(ExecError::Cancelled)));
        assert_process_gone(&pid_file).await;

        let lines = lines.lock().unwrap().clone();
        assert!(lines.iter().any(|l| l == "hi"), "{lines:?}");
        assert!(lines.iter().any(|l| l == CANCELLING_NOTICE), "{lines:?}");
    }

    #[tokio::test]
    async fn streaming_start_failure_is_typed() {
        let cancel = CancellationToken::new();
        let (cb, lines) = collector();
        let outcome = ProcessExecutor::new()
            .run_streaming("/nonexistent/lian-winget-test-binary", "install", cb, &cancel)
            .await
            .unwrap();
        let StreamOutcome::StartFailed(message) = &outcome else {
            panic!("expected start failure, got {outcome:?}");
        };
        assert_eq!(outcome.exit_code(), -1);
        let lines = lines.lock().unwrap().clone();
        assert_eq!(lines, vec![message.clone()]);
        assert!(message.starts_with("Failed to start"));
    }
}
