//! 外部工具执行
//!
//! diskpart / dism / bcdboot 统一通过 `ToolCommand` 描述，退出码是唯一被消费的结构化结果。

use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Stdio};

use anyhow::{Context, Result};

use crate::utils::command::{new_command, new_hidden_command};
use crate::utils::encoding::console_to_utf8;

/// 一次外部工具调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// 逐行写入 stdin（diskpart 脚本）
    pub stdin_lines: Vec<String>,
    /// 捕获 stdout 而不是回显到控制台
    pub capture: bool,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin_lines: Vec::new(),
            capture: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin_lines(mut self, lines: Vec<String>) -> Self {
        self.stdin_lines = lines;
        self
    }

    pub fn capture(mut self) -> Self {
        self.capture = true;
        self
    }

    /// 工具名称（不含路径和扩展名），用于日志和错误信息
    pub fn tool_name(&self) -> String {
        self.program
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// 完整命令行，仅用于日志
    pub fn display_line(&self) -> String {
        if self.args.is_empty() {
            self.program.display().to_string()
        } else {
            format!("{} {}", self.program.display(), self.args.join(" "))
        }
    }
}

/// 外部工具执行结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// 进程被终止时为 None
    pub exit_code: Option<i32>,
    /// 仅在 `capture` 时有内容
    pub stdout: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// 启动外部工具并等待退出
///
/// 不经过 shell；未捕获时 stdout/stderr 继承当前控制台。
pub fn run_tool(command: &ToolCommand) -> Result<ToolOutput> {
    log::info!("[PROCESS] 执行: {}", command.display_line());

    let mut cmd = if command.capture {
        new_hidden_command(&command.program)
    } else {
        new_command(&command.program)
    };
    cmd.args(&command.args);

    if !command.stdin_lines.is_empty() {
        cmd.stdin(Stdio::piped());
    }
    if command.capture {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("启动 {} 失败", command.program.display()))?;

    if !command.stdin_lines.is_empty() {
        let fed = child
            .stdin
            .take()
            .with_context(|| format!("无法获取 {} 的 stdin", command.tool_name()))
            .and_then(|stdin| feed_stdin(stdin, &command.stdin_lines, &command.tool_name()));
        if let Err(e) = fed {
            abort_child(&mut child, &command.tool_name());
            return Err(e);
        }
    }

    let output = child
        .wait_with_output()
        .with_context(|| format!("等待 {} 完成失败", command.tool_name()))?;

    let stdout = console_to_utf8(&output.stdout);
    if command.capture {
        let stderr = console_to_utf8(&output.stderr);
        if !stderr.trim().is_empty() {
            log::warn!("[PROCESS] {} stderr:\n{}", command.tool_name(), stderr.trim());
        }
    }

    log::info!(
        "[PROCESS] {} 退出码: {:?}",
        command.tool_name(),
        output.status.code()
    );

    Ok(ToolOutput {
        exit_code: output.status.code(),
        stdout,
    })
}

/// 逐行写入 stdin，返回时关闭 stdin，工具读到 EOF 后退出
fn feed_stdin<W: Write>(mut stdin: W, lines: &[String], tool_name: &str) -> Result<()> {
    for line in lines {
        log::debug!("[PROCESS] stdin> {}", line);
        writeln!(stdin, "{}", line).with_context(|| format!("写入 {} 的 stdin 失败", tool_name))?;
    }
    stdin
        .flush()
        .with_context(|| format!("写入 {} 的 stdin 失败", tool_name))
}

/// 终止并回收子进程
fn abort_child(child: &mut Child, tool_name: &str) {
    log::warn!("[PROCESS] 终止 {} (PID {})", tool_name, child.id());
    if let Err(e) = child.kill() {
        log::warn!("[PROCESS] 终止 {} 失败: {}", tool_name, e);
    }
    if let Err(e) = child.wait() {
        log::warn!("[PROCESS] 等待 {} 退出失败: {}", tool_name, e);
    }
}
