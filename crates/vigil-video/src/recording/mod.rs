// 运动触发录像
pub mod controller;
pub mod repository;
pub mod sink;

pub use controller::{RecordingController, RecordingOutcome};
pub use repository::{JsonSessionRepository, MemorySessionRepository, SessionMetadata, SessionRepository};
pub use sink::{MjpegFileSink, MjpegSinkFactory, SinkFactory, VideoSink};
