use thiserror::Error;
use vigil_core::{ConfigError, CoreError};

#[derive(Error, Debug)]
pub enum VideoError {
    #[error("Camera not found: {0}")]
    CameraNotFound(String),

    #[error("Camera already exists: {0}")]
    DuplicateCamera(String),

    /// 摄像头读帧失败，触发退避重试
    #[error("Source error: {0}")]
    Source(String),

    #[error("Source read timed out after {0}ms")]
    SourceTimeout(u64),

    /// 单帧处理失败，该帧被跳过
    #[error("Processing error: {0}")]
    Processing(String),

    /// 录像写盘失败，当前会话中止
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("No frame available for camera {0}")]
    NoFrame(String),

    #[error("Timeout")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<CoreError> for VideoError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Config(e) => VideoError::Config(e),
            CoreError::Image(e) => VideoError::Image(e),
            CoreError::Serialization(e) => VideoError::Serialization(e),
            CoreError::ChannelClosed(e) => VideoError::Processing(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, VideoError>;
