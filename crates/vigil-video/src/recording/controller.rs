// 录像状态机
use super::sink::{SinkFactory, VideoSink};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use vigil_core::{
    ControllerState, Detection, Frame, MotionEvent, RecordingSession, RecordingSettings,
    TimedDetection, TriggerReason,
};

/// 状态机对外可见的会话变化
#[derive(Debug, Clone, PartialEq)]
pub enum RecordingOutcome {
    Started(RecordingSession),
    Finished(RecordingSession),
    Aborted(RecordingSession),
}

impl RecordingOutcome {
    pub fn session(&self) -> &RecordingSession {
        match self {
            RecordingOutcome::Started(s)
            | RecordingOutcome::Finished(s)
            | RecordingOutcome::Aborted(s) => s,
        }
    }
}

struct ActiveRecording {
    session: RecordingSession,
    sink: Box<dyn VideoSink>,
    last_motion_at: DateTime<Utc>,
}

/// 单个摄像头的 Idle -> Recording -> Cooldown -> Idle 状态机
///
/// 同一时刻最多持有一个打开的会话。时间取自帧时间戳，
/// 没有帧时由 `tick` 检查冷却期。
pub struct RecordingController {
    camera_id: String,
    settings: RecordingSettings,
    factory: Arc<dyn SinkFactory>,
    state: ControllerState,
    active: Option<ActiveRecording>,
}

impl RecordingController {
    pub fn new(
        camera_id: impl Into<String>,
        settings: RecordingSettings,
        factory: Arc<dyn SinkFactory>,
    ) -> Self {
        Self {
            camera_id: camera_id.into(),
            settings,
            factory,
            state: ControllerState::Idle,
            active: None,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn open_session(&self) -> Option<&RecordingSession> {
        self.active.as_ref().map(|a| &a.session)
    }

    /// 新参数对下一帧生效；分辨率和码率只影响之后打开的会话
    pub fn update_settings(&mut self, settings: &RecordingSettings) {
        self.settings = settings.clone();
    }

    pub fn on_frame(&mut self, frame: &Frame, motion: &MotionEvent) -> Option<RecordingOutcome> {
        let now = frame.captured_at;

        if self.active.is_none() {
            if !motion.detected || !self.settings.enabled {
                return None;
            }
            return self.start(frame, now);
        }

        let active = self.active.as_mut()?;
        if motion.detected {
            active.last_motion_at = now;
            active.session.motion_frames += 1;
        }
        if let Err(e) = active.sink.write_frame(frame) {
            return self.abort(now, e.to_string());
        }
        active.session.frame_count += 1;

        if !motion.detected {
            return self.tick(now);
        }
        None
    }

    /// 冷却期到期则收尾
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<RecordingOutcome> {
        let active = self.active.as_ref()?;
        let cooldown = Duration::seconds(self.settings.cooldown_secs as i64);
        if now - active.last_motion_at >= cooldown {
            return self.finish(now, TriggerReason::Motion);
        }
        None
    }

    /// 停用或删除摄像头时强制收尾
    pub fn force_stop(&mut self, reason: TriggerReason, now: DateTime<Utc>) -> Option<RecordingOutcome> {
        self.active.as_ref()?;
        debug!(camera_id = %self.camera_id, reason = reason.as_str(), "Forcing recording stop");
        self.finish(now, reason)
    }

    /// 识别结果附加到当前会话；空闲时丢弃
    pub fn add_detections(&mut self, frame_sequence: u64, timestamp: DateTime<Utc>, detections: &[Detection]) {
        if let Some(active) = self.active.as_mut() {
            active
                .session
                .detections
                .extend(detections.iter().cloned().map(|detection| TimedDetection {
                    timestamp,
                    frame_sequence,
                    detection,
                }));
        }
    }

    fn start(&mut self, frame: &Frame, now: DateTime<Utc>) -> Option<RecordingOutcome> {
        let mut sink = match self.factory.open(&self.camera_id, now, &self.settings) {
            Ok(sink) => sink,
            Err(e) => {
                warn!(camera_id = %self.camera_id, error = %e, "Failed to open recording");
                let mut session = RecordingSession::open(&self.camera_id, now, Default::default());
                session.end_time = Some(now);
                session.trigger_reason = TriggerReason::Aborted;
                session.error = Some(e.to_string());
                return Some(RecordingOutcome::Aborted(session));
            }
        };

        let mut session = RecordingSession::open(&self.camera_id, now, sink.path().to_path_buf());
        if let Err(e) = sink.write_frame(frame) {
            warn!(camera_id = %self.camera_id, error = %e, "Failed to write first frame");
            let _ = sink.finish();
            session.end_time = Some(now);
            session.trigger_reason = TriggerReason::Aborted;
            session.error = Some(e.to_string());
            return Some(RecordingOutcome::Aborted(session));
        }
        session.frame_count = 1;
        session.motion_frames = 1;

        self.transition(ControllerState::Recording);
        info!(
            camera_id = %self.camera_id,
            session_id = %session.id,
            path = %session.file_path.display(),
            "Recording started"
        );
        self.active = Some(ActiveRecording {
            session: session.clone(),
            sink,
            last_motion_at: now,
        });
        Some(RecordingOutcome::Started(session))
    }

    fn finish(&mut self, now: DateTime<Utc>, reason: TriggerReason) -> Option<RecordingOutcome> {
        let ActiveRecording {
            mut session, sink, ..
        } = self.active.take()?;

        self.transition(ControllerState::Cooldown);
        session.end_time = Some(now);
        session.trigger_reason = reason;

        let outcome = match sink.finish() {
            Ok(bytes) => {
                session.file_size = bytes;
                info!(
                    camera_id = %self.camera_id,
                    session_id = %session.id,
                    frames = session.frame_count,
                    duration_secs = session.duration_secs().unwrap_or_default(),
                    reason = reason.as_str(),
                    "Recording finished"
                );
                RecordingOutcome::Finished(session)
            }
            Err(e) => {
                warn!(camera_id = %self.camera_id, error = %e, "Failed to finalize recording");
                session.trigger_reason = TriggerReason::Aborted;
                session.error = Some(e.to_string());
                RecordingOutcome::Aborted(session)
            }
        };
        self.transition(ControllerState::Idle);
        Some(outcome)
    }

    fn abort(&mut self, now: DateTime<Utc>, error: String) -> Option<RecordingOutcome> {
        let ActiveRecording {
            mut session, sink, ..
        } = self.active.take()?;

        warn!(
            camera_id = %self.camera_id,
            session_id = %session.id,
            error = %error,
            "Recording aborted"
        );
        self.transition(ControllerState::Cooldown);
        session.end_time = Some(now);
        session.trigger_reason = TriggerReason::Aborted;
        session.error = Some(error);
        if let Ok(bytes) = sink.finish() {
            session.file_size = bytes;
        }
        self.transition(ControllerState::Idle);
        Some(RecordingOutcome::Aborted(session))
    }

    fn transition(&mut self, next: ControllerState) {
        debug_assert!(
            matches!(
                (self.state, next),
                (ControllerState::Idle, ControllerState::Recording)
                    | (ControllerState::Recording, ControllerState::Cooldown)
                    | (ControllerState::Cooldown, ControllerState::Idle)
            ),
            "invalid transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }
}
