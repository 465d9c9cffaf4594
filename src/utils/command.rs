use std::ffi::OsStr;
use std::process::Command;

/// Windows CREATE_NO_WINDOW 标志
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// 创建一个直接继承当前控制台的 Command（外部工具输出回显到控制台）
pub fn new_command<S: AsRef<OsStr>>(program: S) -> Command {
    log::debug!("[CMD] {}", program.as_ref().to_string_lossy());
    Command::new(program)
}

/// 创建一个配置好的 Command，在 Windows 上隐藏控制台窗口
///
/// 仅用于需要捕获输出的查询类命令
pub fn new_hidden_command<S: AsRef<OsStr>>(program: S) -> Command {
    let cmd = new_command(program);

    #[cfg(windows)]
    let cmd = {
        use std::os::windows::process::CommandExt;
        let mut cmd = cmd;
        cmd.creation_flags(CREATE_NO_WINDOW);
        cmd
    };

    cmd
}
