// 单帧处理流水线：画质调整 -> 运动检测 -> 录像状态机 -> 实时画面编码
use crate::adjust::ImageAdjuster;
use crate::motion::MotionDetector;
use crate::recording::{RecordingController, RecordingOutcome, SinkFactory};
use crate::source::mock::fill_circle;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::{Rgb, RgbImage};
use std::sync::Arc;
use vigil_core::frame::encode_jpeg;
use vigil_core::{
    CameraConfig, ControllerState, Detection, Frame, MotionEvent, RecordingSession, TriggerReason,
};

/// 实时画面与快照的 JPEG 质量
pub const LIVE_JPEG_QUALITY: u8 = 80;

/// 运动状态变化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionTransition {
    Started,
    Ended,
}

pub struct ProcessedFrame {
    /// 调整后、未叠加标注的帧，供识别器使用
    pub frame: Arc<Frame>,
    pub motion: MotionEvent,
    pub motion_transition: Option<MotionTransition>,
    pub recording: Option<RecordingOutcome>,
    /// 叠加了运动框和录像标记的 JPEG，编码失败时为空
    pub live_jpeg: Option<Bytes>,
}

/// CPU 密集部分，整体放进阻塞线程执行
pub struct FramePipeline {
    camera_id: String,
    adjuster: ImageAdjuster,
    detector: MotionDetector,
    recorder: RecordingController,
    motion_active: bool,
}

impl FramePipeline {
    pub fn new(config: &CameraConfig, sink_factory: Arc<dyn SinkFactory>) -> Self {
        Self {
            camera_id: config.id.clone(),
            adjuster: ImageAdjuster::new(config.adjustments.clone()),
            detector: MotionDetector::new(config.detection.clone()),
            recorder: RecordingController::new(&config.id, config.recording.clone(), sink_factory),
            motion_active: false,
        }
    }

    pub fn update_config(&mut self, config: &CameraConfig) {
        self.adjuster.update(&config.adjustments);
        self.detector.update_settings(&config.detection);
        self.recorder.update_settings(&config.recording);
    }

    pub fn controller_state(&self) -> ControllerState {
        self.recorder.state()
    }

    pub fn motion_active(&self) -> bool {
        self.motion_active
    }

    pub fn open_session(&self) -> Option<RecordingSession> {
        self.recorder.open_session().cloned()
    }

    pub fn process(&mut self, frame: Frame) -> ProcessedFrame {
        let Frame {
            sequence,
            captured_at,
            image,
        } = frame;
        let frame = Frame::new(sequence, captured_at, self.adjuster.apply(image));

        let analysis = self.detector.detect(&frame.image);
        let motion = MotionEvent {
            camera_id: self.camera_id.clone(),
            timestamp: captured_at,
            detected: analysis.detected,
            regions: analysis.regions,
        };

        let motion_transition = match (self.motion_active, motion.detected) {
            (false, true) => Some(MotionTransition::Started),
            (true, false) => Some(MotionTransition::Ended),
            _ => None,
        };
        self.motion_active = motion.detected;

        let recording = self.recorder.on_frame(&frame, &motion);

        let mut live = analysis.annotated;
        if self.recorder.is_recording() {
            draw_recording_indicator(&mut live);
        }
        let live_jpeg = match encode_jpeg(&live, LIVE_JPEG_QUALITY) {
            Ok(jpeg) => Some(jpeg),
            Err(e) => {
                tracing::warn!(camera_id = %self.camera_id, error = %e, "Failed to encode live frame");
                None
            }
        };

        ProcessedFrame {
            frame: Arc::new(frame),
            motion,
            motion_transition,
            recording,
            live_jpeg,
        }
    }

    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<RecordingOutcome> {
        self.recorder.tick(now)
    }

    pub fn force_stop(&mut self, reason: TriggerReason, now: DateTime<Utc>) -> Option<RecordingOutcome> {
        self.recorder.force_stop(reason, now)
    }

    pub fn add_detections(&mut self, frame_sequence: u64, timestamp: DateTime<Utc>, detections: &[Detection]) {
        self.recorder.add_detections(frame_sequence, timestamp, detections);
    }
}

/// 右上角红点
fn draw_recording_indicator(image: &mut RgbImage) {
    let radius = (image.height() as f32 / 40.0).max(4.0);
    let cx = image.width() as f32 - radius * 3.0;
    let cy = radius * 3.0;
    if cx > 0.0 {
        fill_circle(image, cx, cy, radius, Rgb([255, 0, 0]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{MjpegSinkFactory, VideoSink};
    use chrono::Duration;
    use tempfile::TempDir;

    fn frame(seq: u64, secs: i64, block: bool) -> Frame {
        let ts = DateTime::parse_from_rfc3339("2024-05-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + Duration::seconds(secs);
        let mut image = RgbImage::from_pixel(160, 120, Rgb([30, 30, 30]));
        if block {
            for y in 30..90 {
                for x in 40..100 {
                    image.put_pixel(x, y, Rgb([240, 240, 240]));
                }
            }
        }
        Frame::new(seq, ts, image)
    }

    #[test]
    fn test_motion_transitions_and_recording() {
        let dir = TempDir::new().unwrap();
        let factory = Arc::new(MjpegSinkFactory::new(dir.path()));
        let mut config = CameraConfig::mock("yard");
        config.recording.cooldown_secs = 2;
        let mut pipeline = FramePipeline::new(&config, factory);

        for i in 0..5 {
            let out = pipeline.process(frame(i, i as i64, false));
            assert!(out.motion_transition.is_none());
            assert!(out.recording.is_none());
            assert!(out.live_jpeg.is_some());
        }

        let out = pipeline.process(frame(5, 5, true));
        assert_eq!(out.motion_transition, Some(MotionTransition::Started));
        assert!(matches!(out.recording, Some(RecordingOutcome::Started(_))));
        assert_eq!(pipeline.controller_state(), ControllerState::Recording);
        let path = pipeline.open_session().unwrap().file_path;

        let out = pipeline.process(frame(6, 6, false));
        assert_eq!(out.motion_transition, Some(MotionTransition::Ended));

        let out = pipeline.process(frame(7, 8, false));
        let finished = match out.recording {
            Some(RecordingOutcome::Finished(s)) => s,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(finished.file_path, path);
        assert_eq!(finished.frame_count, 3);
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn test_indicator_only_on_live_frame() {
        let mut image = RgbImage::from_pixel(160, 120, Rgb([0, 0, 0]));
        draw_recording_indicator(&mut image);
        assert!(image.pixels().any(|p| p.0 == [255, 0, 0]));

        // 录像写入的是干净帧
        struct CapturingSink(Vec<Frame>);
        impl VideoSink for CapturingSink {
            fn path(&self) -> &std::path::Path {
                std::path::Path::new("/mem/capture.mjpeg")
            }
            fn write_frame(&mut self, frame: &Frame) -> crate::Result<()> {
                self.0.push(frame.clone());
                Ok(())
            }
            fn finish(self: Box<Self>) -> crate::Result<u64> {
                assert!(self
                    .0
                    .iter()
                    .all(|f| f.image.pixels().all(|p| p.0 != [255, 0, 0])));
                Ok(0)
            }
        }
        struct CapturingFactory;
        impl SinkFactory for CapturingFactory {
            fn open(
                &self,
                _: &str,
                _: DateTime<Utc>,
                _: &vigil_core::RecordingSettings,
            ) -> crate::Result<Box<dyn VideoSink>> {
                Ok(Box::new(CapturingSink(Vec::new())))
            }
        }

        let mut pipeline = FramePipeline::new(&CameraConfig::mock("p"), Arc::new(CapturingFactory));
        pipeline.process(frame(0, 0, false));
        pipeline.process(frame(1, 1, true));
        pipeline.process(frame(2, 2, true));
        assert!(pipeline
            .force_stop(TriggerReason::Stopped, Utc::now())
            .is_some());
    }
}
