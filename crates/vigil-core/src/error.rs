use thiserror::Error;

/// 摄像头配置校验错误
///
/// 同步返回给调用方，出错时不会应用任何修改。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid camera id: {0}")]
    InvalidId(String),

    #[error("{field} out of range: {value} (expected {expected})")]
    OutOfRange {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("Invalid zone mask: {0}")]
    InvalidZoneMask(String),

    #[error("Invalid resolution: {0}")]
    InvalidResolution(String),

    #[error("Invalid source: {0}")]
    InvalidSource(String),
}

impl ConfigError {
    pub(crate) fn out_of_range(
        field: &'static str,
        value: impl ToString,
        expected: &'static str,
    ) -> Self {
        ConfigError::OutOfRange {
            field,
            value: value.to_string(),
            expected,
        }
    }
}

/// Vigil Core 统一错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, CoreError>;
