// vigil-core: 共享模型
//
// - 摄像头配置与补丁校验
// - 帧、会话、状态等领域类型
// - 进程内事件总线与 WebSocket 报文
// - 统计数据源接口

pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod frame;
pub mod model;
pub mod stats;

// 重新导出常用类型
pub use bus::{event_channel, EventPublisher, EventReceiver};
pub use config::{
    AnnotationSettings, CameraConfig, CameraConfigPatch, CaptureSettings, DetectionSettings,
    ImageAdjustments, MockPattern, NoiseReduction, RecordingSettings, Resolution, Sharpness,
    SourceDescriptor, ZoneMask,
};
pub use error::{ConfigError, CoreError, Result};
pub use event::{
    Alert, AlertSeverity, CameraEvent, CameraEventKind, ClientMessage, ConnectionPhase, Event,
    ServerMessage, StatisticsUpdate,
};
pub use frame::Frame;
pub use model::{
    BoundingBox, CameraStatus, ControllerState, Detection, DetectionSummary, MotionEvent,
    MotionRegion, RecordingSession, TimedDetection, TriggerReason, WorkerState,
};
pub use stats::StatisticsSource;
