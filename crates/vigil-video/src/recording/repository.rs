// 录像会话持久化
use crate::{Result, VideoError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use vigil_core::{DetectionSummary, RecordingSession, TriggerReason};

/// 会话结束后写入的元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub camera_id: String,
    pub file_path: PathBuf,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: f64,
    pub frame_count: u64,
    pub motion_frames: u64,
    pub file_size: u64,
    pub trigger_reason: TriggerReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub detections: DetectionSummary,
}

impl SessionMetadata {
    pub fn from_session(session: &RecordingSession) -> Self {
        Self {
            session_id: session.id.to_string(),
            camera_id: session.camera_id.clone(),
            file_path: session.file_path.clone(),
            start_time: session.start_time,
            end_time: session.end_time,
            duration_secs: session.duration_secs().unwrap_or_default(),
            frame_count: session.frame_count,
            motion_frames: session.motion_frames,
            file_size: session.file_size,
            trigger_reason: session.trigger_reason,
            error: session.error.clone(),
            detections: session.detection_summary(),
        }
    }
}

/// 会话持久化接口
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn save_session(&self, session: &RecordingSession) -> Result<()>;

    /// 按开始时间升序
    async fn list_sessions(&self, camera_id: &str) -> Result<Vec<SessionMetadata>>;
}

/// 录像文件旁写 `<stem>_metadata.json`
///
/// 没有录像文件的会话（打开即失败）写到 `<base>/<camera>/failed/` 下。
pub struct JsonSessionRepository {
    base_dir: PathBuf,
}

impl JsonSessionRepository {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn metadata_path(&self, session: &RecordingSession) -> PathBuf {
        let stem = session
            .file_path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty());
        match (stem, session.file_path.parent()) {
            (Some(stem), Some(parent)) => parent.join(format!("{}_metadata.json", stem)),
            _ => self
                .base_dir
                .join(&session.camera_id)
                .join("failed")
                .join(format!("{}_metadata.json", session.id)),
        }
    }

    async fn scan(&self, dir: &Path, out: &mut Vec<SessionMetadata>) -> Result<()> {
        let mut stack = vec![dir.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    stack.push(path);
                    continue;
                }
                let is_metadata = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.ends_with("_metadata.json"))
                    .unwrap_or(false);
                if !is_metadata {
                    continue;
                }
                let data = tokio::fs::read(&path).await?;
                match serde_json::from_slice::<SessionMetadata>(&data) {
                    Ok(meta) => out.push(meta),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable metadata")
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for JsonSessionRepository {
    async fn save_session(&self, session: &RecordingSession) -> Result<()> {
        let path = self.metadata_path(session);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(&SessionMetadata::from_session(session))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| VideoError::Storage(format!("{}: {}", path.display(), e)))?;

        tracing::debug!(
            camera_id = %session.camera_id,
            session_id = %session.id,
            path = %path.display(),
            "Session metadata saved"
        );
        Ok(())
    }

    async fn list_sessions(&self, camera_id: &str) -> Result<Vec<SessionMetadata>> {
        let dir = self.base_dir.join(camera_id);
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let mut sessions = Vec::new();
        self.scan(&dir, &mut sessions).await?;
        sessions.sort_by_key(|s| s.start_time);
        Ok(sessions)
    }
}

/// 内存实现，测试和无盘部署使用
#[derive(Default)]
pub struct MemorySessionRepository {
    sessions: RwLock<Vec<RecordingSession>>,
}

impl MemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sessions(&self) -> Vec<RecordingSession> {
        self.sessions.read().await.clone()
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn save_session(&self, session: &RecordingSession) -> Result<()> {
        self.sessions.write().await.push(session.clone());
        Ok(())
    }

    async fn list_sessions(&self, camera_id: &str) -> Result<Vec<SessionMetadata>> {
        let mut out: Vec<SessionMetadata> = self
            .sessions
            .read()
            .await
            .iter()
            .filter(|s| s.camera_id == camera_id)
            .map(SessionMetadata::from_session)
            .collect();
        out.sort_by_key(|s| s.start_time);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vigil_core::{BoundingBox, Detection, TimedDetection};

    fn finished_session(dir: &Path, camera: &str, offset_secs: i64) -> RecordingSession {
        let start = Utc::now() + chrono::Duration::seconds(offset_secs);
        let mut session = RecordingSession::open(
            camera,
            start,
            dir.join(camera).join("20240101").join(format!("motion_{}.mjpeg", offset_secs)),
        );
        session.end_time = Some(start + chrono::Duration::seconds(12));
        session.frame_count = 120;
        session.detections.push(TimedDetection {
            timestamp: start,
            frame_sequence: 3,
            detection: Detection {
                label: "unknown".to_string(),
                confidence: 0.4,
                bbox: BoundingBox { x: 0, y: 0, w: 1, h: 1 },
            },
        });
        session
    }

    #[tokio::test]
    async fn test_json_repository_round_trip() {
        let dir = TempDir::new().unwrap();
        let repo = JsonSessionRepository::new(dir.path());

        let later = finished_session(dir.path(), "porch", 60);
        let earlier = finished_session(dir.path(), "porch", 0);
        repo.save_session(&later).await.unwrap();
        repo.save_session(&earlier).await.unwrap();
        repo.save_session(&finished_session(dir.path(), "garage", 0)).await.unwrap();

        let sidecar = dir.path().join("porch/20240101/motion_60_metadata.json");
        assert!(sidecar.exists());

        let sessions = repo.list_sessions("porch").await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_id, earlier.id.to_string());
        assert_eq!(sessions[0].duration_secs, 12.0);
        assert_eq!(sessions[0].detections.unknown, 1);

        assert!(repo.list_sessions("attic").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_session_without_file_goes_to_failed_dir() {
        let dir = TempDir::new().unwrap();
        let repo = JsonSessionRepository::new(dir.path());

        let mut session = RecordingSession::open("porch", Utc::now(), PathBuf::new());
        session.end_time = Some(session.start_time);
        session.trigger_reason = TriggerReason::Aborted;
        repo.save_session(&session).await.unwrap();

        let path = dir
            .path()
            .join("porch/failed")
            .join(format!("{}_metadata.json", session.id));
        assert!(path.exists());
        assert_eq!(repo.list_sessions("porch").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_repository() {
        let repo = MemorySessionRepository::new();
        let dir = PathBuf::from("/mem");
        repo.save_session(&finished_session(&dir, "a", 0)).await.unwrap();
        repo.save_session(&finished_session(&dir, "b", 0)).await.unwrap();

        assert_eq!(repo.sessions().await.len(), 2);
        assert_eq!(repo.list_sessions("a").await.unwrap().len(), 1);
    }
}
