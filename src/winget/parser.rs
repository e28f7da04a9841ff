//! 输出解析函数

use super::types::TableRow;

/// 分隔线至少包含的 `-` 个数
const SEPARATOR_MIN_DASHES: usize = 10;

/// 版权脚注行的前导字符
const FOOTNOTE_MARK: char = '\u{00A9}';

/// 清理终端输出中的 ANSI 转义序列和特殊字符
pub fn clean_terminal_output(input: &str) -> String {
    let mut result = String::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\x1b' => {
                if chars.peek() == Some(&'[') {
                    chars.next();
                    while let Some(&next) = chars.peek() {
                        chars.next();
                        if next.is_ascii_alphabetic() {
                            break;
                        }
                    }
                }
            }
            '\r' => {
                if chars.peek() != Some(&'\n') && !result.ends_with('\n') {
                    result.push('\n');
                }
            }
            c if c.is_control() && c != '\n' && c != '\t' => {}
            _ => result.push(c),
        }
    }

    let lines: Vec<&str> = result.lines().collect();
    let mut cleaned_lines = Vec::new();
    let mut prev_empty = false;

    for line in lines {
        let is_empty = line.trim().is_empty();
        if is_empty && prev_empty {
            continue;
        }
        cleaned_lines.push(line);
        prev_empty = is_empty;
    }

    cleaned_lines.join("\n")
}

/// 按 `\n`、`\r\n`、单独的 `\r` 切分行
///
/// winget 用 `\r` 原地刷新进度和转圈字符，这些片段也按独立的行处理。
pub fn split_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let bytes = text.as_bytes();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                lines.push(&text[start..i]);
                start = i + 1;
            }
            b'\r' => {
                lines.push(&text[start..i]);
                if bytes.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    if start < bytes.len() {
        lines.push(&text[start..]);
    }
    lines
}

// ========== 表格解析 ==========

fn is_separator_like(line: &str) -> bool {
    line.chars().all(|c| c == '-' || c.is_whitespace())
        && line.chars().filter(|&c| c == '-').count() >= SEPARATOR_MIN_DASHES
}

fn is_footnote_line(line: &str) -> bool {
    line.trim_start().starts_with(FOOTNOTE_MARK)
}

/// 按字符（而非字节）下标截取，越界部分返回空串
fn char_slice(chars: &[char], start: usize, end: usize) -> String {
    let end = end.min(chars.len());
    if start >= end {
        return String::new();
    }
    chars[start..end].iter().collect()
}

/// 表头中每个单词的起始位置：前一个字符是空格（或位于行首）且当前字符不是空格
fn column_starts(header: &[char]) -> Vec<usize> {
    (0..header.len())
        .filter(|&i| (i == 0 || header[i - 1] == ' ') && header[i] != ' ')
        .collect()
}

/// 解析 winget 的列对齐表格（`list` / `search` / `upgrade`）
///
/// 表格形如：
///   `Name    Id      Version`
///   `----------------------`
///   `Foo     foo.id  1.0`
///
/// 列边界只根据表头计算一次，之后的每一行都按同样的字符区间截取。
/// 这种按单词起点切列的做法对右对齐的数字列、或值里含有连续空格的列并不可靠，
/// 这里保持该行为不变。
///
/// 找不到表头或分隔线时返回空列表，不报错。
pub fn parse_table(output: &str) -> Vec<TableRow> {
    let lines: Vec<&str> = split_lines(output)
        .into_iter()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .collect();

    let separator_index = match lines.iter().position(|l| is_separator_like(l)) {
        Some(i) if i > 0 => i,
        _ => return Vec::new(),
    };

    let header: Vec<char> = lines[separator_index - 1].chars().collect();
    let starts = column_starts(&header);

    let mut ranges: Vec<(String, usize, usize)> = Vec::new();
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(header.len());
        let name = char_slice(&header, start, end).trim().to_string();
        if name.is_empty() {
            continue;
        }
        ranges.push((name, start, starts.get(i + 1).copied().unwrap_or(usize::MAX)));
    }

    let mut rows = Vec::new();
    for line in &lines[separator_index + 1..] {
        if is_separator_like(line) || is_footnote_line(line) {
            continue;
        }

        let chars: Vec<char> = line.chars().collect();
        let mut row = TableRow::new();
        for (name, start, end) in &ranges {
            let value = char_slice(&chars, *start, *end);
            row.insert(name, value.trim().to_string());
        }

        if row.is_blank() {
            continue;
        }
        rows.push(row);
    }

    log::debug!("parse_table: {} 列, {} 行", ranges.len(), rows.len());
    rows
}

// ========== 详情解析 ==========

/// 从 `winget show` 的输出中提取 `Description:` 字段
///
/// 取同一行冒号后的内容，再加上紧随其后的缩进续行；
/// 遇到空行，或遇到不以空白开头且含冒号的新字段行时停止。
pub fn parse_description(output: &str) -> String {
    let normalized = output.replace("\r\n", "\n");
    let lines: Vec<&str> = normalized.split('\n').collect();

    for (i, line) in lines.iter().enumerate() {
        if !starts_with_ignore_case(line.trim_start(), "Description:") {
            continue;
        }

        let mut parts: Vec<String> = Vec::new();
        let first = line.split_once(':').map(|(_, rest)| rest.trim()).unwrap_or("");
        if !first.is_empty() {
            parts.push(first.to_string());
        }

        for next in &lines[i + 1..] {
            if next.trim().is_empty() {
                break;
            }
            let trimmed = next.trim_end();
            let looks_like_field = !next.starts_with(char::is_whitespace) && trimmed.contains(':');
            if looks_like_field {
                break;
            }
            parts.push(trimmed.trim().to_string());
        }

        return parts.join("\n").trim().to_string();
    }

    String::new()
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}
