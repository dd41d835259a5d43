// 外部识别器接入
use crate::{Result, VideoError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use vigil_core::{Detection, Frame};

/// 帧识别器（人脸识别等），由外部实现
#[async_trait]
pub trait FrameAnnotator: Send + Sync {
    fn name(&self) -> &str;

    async fn annotate(&self, frame: Arc<Frame>) -> Result<Vec<Detection>>;
}

#[derive(Debug, Clone)]
pub struct AnnotationResult {
    pub frame_sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub detections: Vec<Detection>,
}

struct InFlight {
    frame_sequence: u64,
    timestamp: DateTime<Utc>,
    handle: JoinHandle<Result<Vec<Detection>>>,
}

/// 按帧间隔调度识别，同一时刻最多一个请求在途，从不阻塞采集循环
pub struct AnnotationScheduler {
    annotator: Arc<dyn FrameAnnotator>,
    every_n_frames: u32,
    frames_since_last: u32,
    timeout: Duration,
    in_flight: Option<InFlight>,
}

impl AnnotationScheduler {
    pub fn new(annotator: Arc<dyn FrameAnnotator>, every_n_frames: u32, timeout: Duration) -> Self {
        Self {
            annotator,
            every_n_frames: every_n_frames.max(1),
            frames_since_last: 0,
            timeout,
            in_flight: None,
        }
    }

    pub fn set_cadence(&mut self, every_n_frames: u32) {
        self.every_n_frames = every_n_frames.max(1);
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// 取回已完成的结果，未完成时立即返回 `None`
    pub fn poll(&mut self) -> Option<Result<AnnotationResult>> {
        if !self.in_flight.as_ref()?.handle.is_finished() {
            return None;
        }
        let InFlight {
            frame_sequence,
            timestamp,
            handle,
        } = self.in_flight.take()?;

        let result = match handle.now_or_never()? {
            Ok(Ok(detections)) => Ok(AnnotationResult {
                frame_sequence,
                timestamp,
                detections,
            }),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(VideoError::Processing(format!("annotator task failed: {}", e))),
        };
        Some(result)
    }

    /// 计数一帧，到达间隔且空闲时提交识别
    pub fn offer(&mut self, frame: &Arc<Frame>) -> bool {
        self.frames_since_last = self.frames_since_last.saturating_add(1);
        if self.frames_since_last < self.every_n_frames || self.in_flight.is_some() {
            return false;
        }
        self.frames_since_last = 0;

        let annotator = self.annotator.clone();
        let timeout = self.timeout;
        let task_frame = frame.clone();
        let handle = tokio::spawn(async move {
            match tokio::time::timeout(timeout, annotator.annotate(task_frame)).await {
                Ok(result) => result,
                Err(_) => Err(VideoError::Timeout),
            }
        });
        self.in_flight = Some(InFlight {
            frame_sequence: frame.sequence,
            timestamp: frame.captured_at,
            handle,
        });
        true
    }

    pub fn cancel(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.handle.abort();
        }
    }
}

impl Drop for AnnotationScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
