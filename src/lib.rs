//! lian-winget: winget 命令行的集成核心
//!
//! 进程驱动与取消、表格输出解析、流式输出阶段识别、安装位置解析。

pub mod config;
pub mod flags;
pub mod install_location;
pub mod phase;
pub mod settings;
pub mod winget;
