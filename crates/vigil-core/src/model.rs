use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use uuid::Uuid;

/// 一个连通的运动区域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionRegion {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    /// 区域内前景像素数
    pub area: u32,
}

/// 单帧运动分析结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionEvent {
    pub camera_id: String,
    pub timestamp: DateTime<Utc>,
    pub detected: bool,
    pub regions: Vec<MotionRegion>,
}

impl MotionEvent {
    pub fn still(camera_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            camera_id: camera_id.into(),
            timestamp,
            detected: false,
            regions: Vec::new(),
        }
    }

    pub fn total_area(&self) -> u64 {
        self.regions.iter().map(|r| r.area as u64).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// 识别器返回的一个目标
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    /// 识别器约定未识别的人标记为 "unknown"
    pub fn is_known(&self) -> bool {
        !self.label.is_empty() && !self.label.eq_ignore_ascii_case("unknown")
    }
}

/// 带时间戳的识别结果，附在录像会话上
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedDetection {
    pub timestamp: DateTime<Utc>,
    pub frame_sequence: u64,
    pub detection: Detection,
}

/// 会话结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    /// 运动触发，冷却期结束后正常收尾
    Motion,
    /// 摄像头被停用或服务关闭
    Stopped,
    /// 摄像头被删除
    Removed,
    /// 写盘失败或停止超时
    Aborted,
}

impl TriggerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerReason::Motion => "motion",
            TriggerReason::Stopped => "stopped",
            TriggerReason::Removed => "removed",
            TriggerReason::Aborted => "aborted",
        }
    }
}

/// 一次运动触发的录像
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSession {
    pub id: Uuid,
    pub camera_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub file_path: PathBuf,
    pub trigger_reason: TriggerReason,
    pub frame_count: u64,
    pub motion_frames: u64,
    pub file_size: u64,
    pub detections: Vec<TimedDetection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecordingSession {
    pub fn open(camera_id: impl Into<String>, start_time: DateTime<Utc>, file_path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            camera_id: camera_id.into(),
            start_time,
            end_time: None,
            file_path,
            trigger_reason: TriggerReason::Motion,
            frame_count: 0,
            motion_frames: 0,
            file_size: 0,
            detections: Vec::new(),
            error: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds() as f64 / 1000.0)
    }

    /// 识别结果汇总
    pub fn detection_summary(&self) -> DetectionSummary {
        let mut labels = BTreeSet::new();
        let mut known = 0;
        let mut unknown = 0;
        for d in &self.detections {
            if d.detection.is_known() {
                known += 1;
                labels.insert(d.detection.label.clone());
            } else {
                unknown += 1;
            }
        }
        DetectionSummary {
            total: self.detections.len(),
            known,
            unknown,
            unique_labels: labels.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionSummary {
    pub total: usize,
    pub known: usize,
    pub unknown: usize,
    pub unique_labels: Vec<String>,
}

/// 采集循环状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Faulted,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Starting => "starting",
            WorkerState::Running => "running",
            WorkerState::Stopping => "stopping",
            WorkerState::Stopped => "stopped",
            WorkerState::Faulted => "faulted",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, WorkerState::Starting | WorkerState::Running)
    }
}

/// 录像状态机状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    #[default]
    Idle,
    Recording,
    Cooldown,
}

/// 摄像头运行时状态快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraStatus {
    pub camera_id: String,
    pub name: String,
    pub enabled: bool,
    pub state: WorkerState,
    pub controller_state: ControllerState,
    pub motion_active: bool,
    pub last_frame_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub sessions_completed: u64,
    pub sessions_aborted: u64,
    pub config_version: u64,
}

impl CameraStatus {
    pub fn new(camera_id: impl Into<String>, name: impl Into<String>, enabled: bool, config_version: u64) -> Self {
        Self {
            camera_id: camera_id.into(),
            name: name.into(),
            enabled,
            state: WorkerState::Stopped,
            controller_state: ControllerState::Idle,
            motion_active: false,
            last_frame_at: None,
            consecutive_failures: 0,
            last_error: None,
            frames_processed: 0,
            frames_skipped: 0,
            sessions_completed: 0,
            sessions_aborted: 0,
            config_version,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.controller_state == ControllerState::Recording
    }
}
