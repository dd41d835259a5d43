// 摄像头注册表：管理所有采集循环
use crate::recording::SessionMetadata;
use crate::worker::{CameraWorker, WorkerDeps};
use crate::{Result, VideoError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::BoxStream;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;
use vigil_core::{
    CameraConfig, CameraConfigPatch, CameraEvent, CameraEventKind, CameraStatus, StatisticsSource,
    TriggerReason, WorkerState,
};

/// 停止单个摄像头时等待会话收尾的默认时长
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct CameraRegistry {
    // 使用 DashMap 实现无锁并发访问
    workers: DashMap<String, CameraWorker>,
    deps: WorkerDeps,
    stop_timeout: Duration,
    started_at: DateTime<Utc>,
}

impl CameraRegistry {
    pub fn new(deps: WorkerDeps) -> Self {
        Self {
            workers: DashMap::new(),
            deps,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            started_at: Utc::now(),
        }
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    fn publish(&self, camera_id: &str, kind: CameraEventKind, data: Value) {
        self.deps
            .publisher
            .publish(CameraEvent::new(camera_id, kind, data));
    }

    fn worker(&self, camera_id: &str) -> Result<CameraWorker> {
        self.workers
            .get(camera_id)
            .map(|w| w.value().clone())
            .ok_or_else(|| VideoError::CameraNotFound(camera_id.to_string()))
    }

    /// 注册摄像头，启用时立即启动采集
    pub async fn add_camera(&self, config: CameraConfig) -> Result<CameraStatus> {
        config.validate()?;
        let camera_id = config.id.clone();
        let enabled = config.enabled;
        let name = config.display_name().to_string();

        let worker = match self.workers.entry(camera_id.clone()) {
            Entry::Occupied(_) => return Err(VideoError::DuplicateCamera(camera_id)),
            Entry::Vacant(slot) => {
                let worker = CameraWorker::new(config, self.deps.clone());
                slot.insert(worker.clone());
                worker
            }
        };

        info!(camera_id = %camera_id, enabled, "Camera added");
        self.publish(
            &camera_id,
            CameraEventKind::CameraAdded,
            json!({ "name": name, "enabled": enabled }),
        );

        if enabled {
            if let Err(e) = worker.start().await {
                // 期间可能已被移除并以同一 ID 重新注册
                self.workers
                    .remove_if(&camera_id, |_, current| current.is_same(&worker));
                self.publish(&camera_id, CameraEventKind::CameraRemoved, json!({ "error": e.to_string() }));
                return Err(e);
            }
        }
        Ok(worker.status())
    }

    /// 注销摄像头，打开的会话以 `removed` 收尾
    pub async fn remove_camera(&self, camera_id: &str) -> Result<()> {
        let (_, worker) = self
            .workers
            .remove(camera_id)
            .ok_or_else(|| VideoError::CameraNotFound(camera_id.to_string()))?;

        worker
            .stop_with(TriggerReason::Removed, self.stop_timeout)
            .await;

        info!(camera_id = %camera_id, "Camera removed");
        self.publish(camera_id, CameraEventKind::CameraRemoved, json!({}));
        Ok(())
    }

    pub fn get(&self, camera_id: &str) -> Option<CameraWorker> {
        self.workers.get(camera_id).map(|w| w.value().clone())
    }

    pub fn contains(&self, camera_id: &str) -> bool {
        self.workers.contains_key(camera_id)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn status(&self, camera_id: &str) -> Result<CameraStatus> {
        Ok(self.worker(camera_id)?.status())
    }

    /// 按摄像头 ID 排序
    pub fn list(&self) -> Vec<CameraStatus> {
        let mut cameras: Vec<CameraStatus> =
            self.workers.iter().map(|w| w.value().status()).collect();
        cameras.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        cameras
    }

    pub fn config(&self, camera_id: &str) -> Result<CameraConfig> {
        Ok(CameraConfig::clone(&self.worker(camera_id)?.config()))
    }

    /// 应用设置补丁，校验失败时配置保持不变
    pub async fn apply_settings(
        &self,
        camera_id: &str,
        patch: &CameraConfigPatch,
    ) -> Result<CameraStatus> {
        let worker = self.worker(camera_id)?;
        let config = worker.reconfigure(patch, self.stop_timeout).await?;

        info!(camera_id = %camera_id, version = config.version, "Camera settings updated");
        self.publish(
            camera_id,
            CameraEventKind::SettingsUpdated,
            json!({ "version": config.version, "changes": patch }),
        );
        Ok(worker.status())
    }

    pub async fn enable_camera(&self, camera_id: &str) -> Result<CameraStatus> {
        let patch = CameraConfigPatch {
            enabled: Some(true),
            ..Default::default()
        };
        self.apply_settings(camera_id, &patch).await
    }

    pub async fn disable_camera(&self, camera_id: &str) -> Result<CameraStatus> {
        let patch = CameraConfigPatch {
            enabled: Some(false),
            ..Default::default()
        };
        self.apply_settings(camera_id, &patch).await
    }

    pub fn snapshot(&self, camera_id: &str) -> Result<Option<Bytes>> {
        Ok(self.worker(camera_id)?.snapshot())
    }

    pub fn live_sequence(&self, camera_id: &str) -> Result<BoxStream<'static, Bytes>> {
        Ok(self.worker(camera_id)?.live_sequence())
    }

    /// 已注册摄像头的历史会话，按开始时间升序
    pub async fn list_sessions(&self, camera_id: &str) -> Result<Vec<SessionMetadata>> {
        self.worker(camera_id)?;
        self.deps.repository.list_sessions(camera_id).await
    }

    /// 停止全部采集循环，摄像头保留在注册表中
    pub async fn shutdown(&self, timeout: Duration) {
        let workers: Vec<CameraWorker> = self.workers.iter().map(|w| w.value().clone()).collect();
        info!(cameras = workers.len(), "Stopping all camera workers");
        futures::future::join_all(
            workers
                .iter()
                .map(|w| w.stop_with(TriggerReason::Stopped, timeout)),
        )
        .await;
    }

    pub fn statistics(&self) -> Value {
        let cameras = self.list();
        let count = |state: WorkerState| cameras.iter().filter(|c| c.state == state).count();
        let per_camera: Vec<Value> = cameras
            .iter()
            .map(|c| {
                json!({
                    "camera_id": c.camera_id,
                    "state": c.state,
                    "recording": c.is_recording(),
                    "motion_active": c.motion_active,
                    "frames_processed": c.frames_processed,
                    "frames_skipped": c.frames_skipped,
                    "consecutive_failures": c.consecutive_failures,
                })
            })
            .collect();

        json!({
            "total": cameras.len(),
            "running": count(WorkerState::Running),
            "faulted": count(WorkerState::Faulted),
            "recording": cameras.iter().filter(|c| c.is_recording()).count(),
            "motion_active": cameras.iter().filter(|c| c.motion_active).count(),
            "frames_processed": cameras.iter().map(|c| c.frames_processed).sum::<u64>(),
            "sessions_completed": cameras.iter().map(|c| c.sessions_completed).sum::<u64>(),
            "sessions_aborted": cameras.iter().map(|c| c.sessions_aborted).sum::<u64>(),
            "events_dropped": self.deps.publisher.dropped(),
            "uptime_secs": (Utc::now() - self.started_at).num_seconds(),
            "cameras": per_camera,
        })
    }
}

#[async_trait]
impl StatisticsSource for CameraRegistry {
    fn name(&self) -> &str {
        "cameras"
    }

    async fn collect(&self) -> vigil_core::Result<Value> {
        Ok(self.statistics())
    }
}
