use std::path::PathBuf;

/// 部署流程错误类型
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("administrator privileges are required to {0}")]
    NotElevated(String),

    #[error("no {0} was specified")]
    MissingParameter(&'static str),

    #[error("the {first} drive and the {second} drive cannot use the same letter {letter}")]
    DuplicateDrive {
        first: &'static str,
        second: &'static str,
        letter: String,
    },

    #[error("invalid image index {0}, indexes start at 1")]
    InvalidImageIndex(u32),

    #[error("image index {index} does not exist in {image} (available: {available})")]
    UnknownImageIndex {
        index: u32,
        image: PathBuf,
        available: String,
    },

    #[error("could not find a valid image file at {0}")]
    ImageNotFound(PathBuf),

    #[error("no images were found in {0}")]
    NoImages(PathBuf),

    #[error("{0} holds several images, choose one with --index")]
    AmbiguousImage(PathBuf),

    #[error("Windows seems to be already deployed to {0}, not overwriting it")]
    AlreadyDeployed(PathBuf),

    #[error("the drive letter {0} is already in use by another bootloader")]
    EfiDriveInUse(String),

    #[error("the directory {0} does not exist")]
    WindowsDirMissing(PathBuf),

    #[error("the drivers directory {0} does not exist")]
    DriversNotFound(PathBuf),

    #[error("{tool} failed with exit code {code}")]
    ToolFailed { tool: String, code: i32 },

    #[error("{0} was terminated before reporting an exit code")]
    ToolTerminated(String),

    #[error("worker thread '{0}' panicked")]
    WorkerPanicked(String),

    #[error("this operation is only supported on Windows")]
    Unsupported,
}

impl DeployError {
    /// 将外部工具退出码转换为结果
    pub fn check_exit(tool: &str, exit_code: Option<i32>) -> Result<(), DeployError> {
        match exit_code {
            Some(0) => Ok(()),
            Some(code) => Err(DeployError::ToolFailed {
                tool: tool.to_string(),
                code,
            }),
            None => Err(DeployError::ToolTerminated(tool.to_string())),
        }
    }
}
