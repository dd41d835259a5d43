// vigil-video: 摄像头采集与运动录像
//
// 每路摄像头一个 tokio 任务：
// - 读帧：模拟源 / 本地图片 / 网络快照，超时与指数退避
// - 处理：画质调整 -> 运动检测 -> 录像状态机，在阻塞线程池执行
// - 输出：快照、实时 JPEG 流、事件总线、会话元数据

pub mod adjust;
pub mod annotator;
pub mod error;
pub mod motion;
pub mod pipeline;
pub mod recording;
pub mod registry;
pub mod source;
pub mod worker;

// 重新导出常用类型
pub use annotator::{AnnotationScheduler, FrameAnnotator};
pub use error::{Result, VideoError};
pub use recording::{
    JsonSessionRepository, MemorySessionRepository, MjpegSinkFactory, SessionMetadata,
    SessionRepository, SinkFactory,
};
pub use registry::CameraRegistry;
pub use source::{DefaultSourceFactory, FrameSource, SourceFactory};
pub use worker::{CameraWorker, WorkerDeps};
