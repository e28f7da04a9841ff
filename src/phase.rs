//! 流式输出阶段识别
//!
//! 把 winget 输出的单行文本映射为操作阶段（下载 / 安装 / 卸载 / 完成 / 其他）。

use regex::Regex;
use std::sync::OnceLock;

/// "其他" 文本的默认截断长度（字符数）
pub const DEFAULT_STATUS_MAX_CHARS: usize = 90;

/// 操作阶段信号
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Downloading { percent: Option<u8> },
    Installing,
    Uninstalling,
    Done,
    /// 无法归类的行，携带截断后的原文
    Other(String),
}

impl Phase {
    pub fn label(&self) -> &str {
        match self {
            Phase::Downloading { .. } => "Downloading",
            Phase::Installing => "Installing",
            Phase::Uninstalling => "Uninstalling",
            Phase::Done => "Done",
            Phase::Other(text) => text,
        }
    }
}

fn percent_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // 匹配总是从一段数字的开头开始，等价于 "前面不是数字"
    RE.get_or_init(|| Regex::new(r"([0-9]+)%").expect("static regex"))
}

/// 提取 1–3 位 ASCII 数字、紧跟 `%` 且前面不是数字的百分比，并限制在 0..=100
fn extract_percent(line: &str) -> Option<u8> {
    percent_regex()
        .captures_iter(line)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .find(|digits| digits.len() <= 3)
        .and_then(|digits| digits.parse::<u32>().ok())
        .map(|p| p.min(100) as u8)
}

/// "installing" 出现在 "uninstalling" 内部时不算
fn mentions_installing(lower: &str) -> bool {
    lower
        .match_indices("installing")
        .any(|(i, _)| !lower[..i].ends_with("un"))
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let mut s: String = text.chars().take(max_chars).collect();
        s.push('…');
        s
    } else {
        text.to_string()
    }
}

/// 按默认截断长度识别一行输出
pub fn classify_line(line: &str) -> Option<Phase> {
    classify(line, DEFAULT_STATUS_MAX_CHARS)
}

/// 识别一行输出的阶段，规则按顺序匹配，先命中者生效；空行返回 `None`
pub fn classify(line: &str, max_chars: usize) -> Option<Phase> {
    let text = line.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(percent) = extract_percent(text) {
        return Some(Phase::Downloading {
            percent: Some(percent),
        });
    }

    let lower = text.to_lowercase();
    if lower.contains("download") {
        return Some(Phase::Downloading { percent: None });
    }
    if mentions_installing(&lower) || lower.contains("starting package") {
        return Some(Phase::Installing);
    }
    if lower.contains("uninstalling") {
        return Some(Phase::Uninstalling);
    }
    if lower.contains("successfully") {
        return Some(Phase::Done);
    }

    Some(Phase::Other(truncate_chars(text, max_chars)))
}

/// 面向界面的阶段状态，带"已进入下载"的锁存
///
/// 当前阶段为下载时，无法归类的行不会把状态退回成普通文本。
#[derive(Debug, Clone, Default)]
pub struct PhaseTracker {
    status: String,
    percent: Option<u8>,
    downloading: bool,
    max_chars: usize,
}

impl PhaseTracker {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            ..Self::default()
        }
    }

    /// 处理一行输出，返回状态是否发生变化
    pub fn observe(&mut self, line: &str) -> bool {
        match classify(line, self.max_chars) {
            Some(phase) => self.apply(phase),
            None => false,
        }
    }

    pub fn apply(&mut self, phase: Phase) -> bool {
        let before = (self.status.clone(), self.percent);
        match phase {
            Phase::Downloading { percent } => {
                self.downloading = true;
                if percent.is_some() {
                    self.percent = percent;
                }
                self.status = "Downloading".to_string();
            }
            Phase::Other(_) if self.downloading => {}
            other => {
                self.downloading = false;
                self.status = other.label().to_string();
            }
        }
        before != (self.status.clone(), self.percent)
    }

    /// 操作结束：退出码 0 视为完成，否则显示退出码
    pub fn finish(&mut self, exit_code: i32) {
        self.downloading = false;
        if exit_code == 0 {
            self.status = "Done".to_string();
            self.percent = Some(100);
        } else {
            self.status = format!("Exit code: {}", exit_code);
        }
    }

    pub fn cancelled(&mut self) {
        self.downloading = false;
        self.status = "Cancelled".to_string();
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn percent(&self) -> Option<u8> {
        self.percent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_lines_are_downloading() {
        assert_eq!(
            classify_line("Downloading 42%"),
            Some(Phase::Downloading { percent: Some(42) })
        );
        assert_eq!(
            classify_line("  ██████  1.50 MB / 3.00 MB  50%"),
            Some(Phase::Downloading { percent: Some(50) })
        );
    }

    #[test]
    fn percent_needs_ascii_digits() {
        assert_eq!(classify_line("٤٢%"), Some(Phase::Other("٤٢%".into())));
        assert_eq!(classify_line("进度 ４２%"), Some(Phase::Other("进度 ４２%".into())));
        assert_eq!(
            classify_line("进度 42%"),
            Some(Phase::Downloading { percent: Some(42) })
        );
    }

    #[test]
    fn percent_is_clamped() {
        assert_eq!(
            classify_line("progress 150%"),
            Some(Phase::Downloading { percent: Some(100) })
        );
    }

    #[test]
    fn percent_ignores_longer_digit_runs() {
        assert_eq!(
            classify_line("100%5"),
            Some(Phase::Downloading { percent: Some(100) })
        );
        // 4 位数字不算百分比，落到后续规则
        assert_eq!(
            classify_line("ratio 1234% then"),
            Some(Phase::Other("ratio 1234% then".into()))
        );
        assert_eq!(
            classify_line("1234% then 7%"),
            Some(Phase::Downloading { percent: Some(7) })
        );
    }

    #[test]
    fn keyword_rules_in_order() {
        assert_eq!(
            classify_line("Download started"),
            Some(Phase::Downloading { percent: None })
        );
        assert_eq!(classify_line("Starting package install..."), Some(Phase::Installing));
        assert_eq!(classify_line("Installing Foo"), Some(Phase::Installing));
        assert_eq!(classify_line("Uninstalling Foo"), Some(Phase::Uninstalling));
        assert_eq!(classify_line("Successfully installed."), Some(Phase::Done));
        assert_eq!(classify_line("Successfully uninstalled"), Some(Phase::Done));
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(classify_line(""), None);
        assert_eq!(classify_line("   \t"), None);
    }

    #[test]
    fn other_text_is_truncated() {
        let long = "x".repeat(120);
        match classify(&long, 80) {
            Some(Phase::Other(text)) => {
                assert_eq!(text.chars().count(), 81);
                assert!(text.ends_with('…'));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            classify_line("Found Foo [foo.id]"),
            Some(Phase::Other("Found Foo [foo.id]".into()))
        );
    }

    #[test]
    fn tracker_latches_downloading() {
        let mut t = PhaseTracker::new(DEFAULT_STATUS_MAX_CHARS);
        assert!(t.observe("Found Foo [foo.id] Version 1.0"));
        assert_eq!(t.status(), "Found Foo [foo.id] Version 1.0");
        t.observe("Downloading https://example.com/foo.exe");
        t.observe("  10%");
        assert!(!t.observe("  ███ 1 MB / 10 MB"));
        assert_eq!(t.status(), "Downloading");
        assert_eq!(t.percent(), Some(10));
        t.observe("Starting package install...");
        assert_eq!(t.status(), "Installing");
        t.observe("some note");
        assert_eq!(t.status(), "some note");
        t.finish(0);
        assert_eq!(t.status(), "Done");
        assert_eq!(t.percent(), Some(100));
        t.finish(5);
        assert_eq!(t.status(), "Exit code: 5");
    }
}
