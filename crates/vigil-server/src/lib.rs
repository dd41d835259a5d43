// vigil-server: 监控服务进程
//
// - 配置加载（TOML + 环境变量）
// - 日志初始化
// - 信号驱动的优雅关闭
// - WebSocket / 快照 / MJPEG 传输层

pub mod api;
pub mod config;
pub mod logging;
pub mod shutdown;
pub mod ws;

use axum::{routing::get, Router};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{error, info};
use vigil_core::{event_channel, EventReceiver};
use vigil_realtime::{EventBroadcaster, JwtAuth, RealtimeConnectionManager, StatisticsTask};
use vigil_video::{CameraRegistry, JsonSessionRepository, MjpegSinkFactory, WorkerDeps};

// 重新导出常用类型
pub use config::AppConfig;
pub use shutdown::{ShutdownSignal, SignalHandler};

/// 路由共享状态
pub struct AppState {
    pub registry: Arc<CameraRegistry>,
    pub connections: Arc<RealtimeConnectionManager>,
    /// 进程关闭信号，长连接响应（MJPEG）据此结束
    pub signals: SignalHandler,
    pub started_at: Instant,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/ws", get(ws::ws_upgrade))
        .route("/api/v1/cameras", get(api::list_cameras))
        .route("/api/v1/cameras/:id", get(api::camera_status))
        .route("/api/v1/cameras/:id/snapshot", get(api::snapshot))
        .route("/api/v1/cameras/:id/live", get(api::live))
        .route("/api/v1/cameras/:id/sessions", get(api::sessions))
        .with_state(state)
}

/// 进程内全部服务的装配结果
pub struct Services {
    pub config: AppConfig,
    pub state: Arc<AppState>,
    pub broadcaster: Arc<EventBroadcaster>,
    events: Option<EventReceiver>,
    /// 事件分发单独停止：采集停止后产生的收尾事件仍要送达
    drain: SignalHandler,
    dispatch: Option<JoinHandle<()>>,
}

impl Services {
    pub fn build(config: AppConfig, signals: SignalHandler) -> Self {
        let (publisher, events) = event_channel(config.realtime.event_channel_capacity);

        let base_dir = config.recording.base_dir.clone();
        let deps = WorkerDeps::new(
            publisher,
            Arc::new(MjpegSinkFactory::new(base_dir.clone())),
            Arc::new(JsonSessionRepository::new(base_dir)),
        );
        let registry = Arc::new(
            CameraRegistry::new(deps).with_stop_timeout(config.recording.stop_timeout()),
        );

        let broadcaster = Arc::new(EventBroadcaster::new(
            config.realtime.connection.queue_capacity,
        ));
        let verifier = Arc::new(JwtAuth::new(
            config.auth.jwt_secret.clone(),
            config.auth.expiration_hours,
        ));
        let connections = Arc::new(RealtimeConnectionManager::new(
            verifier,
            broadcaster.clone(),
            config.realtime.connection.clone(),
        ));

        Self {
            config,
            state: Arc::new(AppState {
                registry,
                connections,
                signals,
                started_at: Instant::now(),
            }),
            broadcaster,
            events: Some(events),
            drain: SignalHandler::new(),
            dispatch: None,
        }
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// 启动事件分发、心跳巡检与统计推送
    ///
    /// 心跳与统计任务在关闭信号触发后退出；事件分发由 `shutdown` 停止。
    /// 事件通道只能被消费一次，重复调用只启动心跳与统计任务。
    pub fn spawn_background(&mut self) -> Vec<JoinHandle<()>> {
        let signals = self.state.signals.clone();
        let mut tasks = Vec::new();

        if let Some(events) = self.events.take() {
            self.dispatch = Some(tokio::spawn(
                self.broadcaster
                    .clone()
                    .run_dispatch(events, self.drain.signalled()),
            ));
        }

        tasks.push(tokio::spawn(
            self.state
                .connections
                .clone()
                .run_heartbeat(signals.signalled()),
        ));

        let statistics = StatisticsTask::new(
            self.broadcaster.clone(),
            self.config.realtime.statistics_interval(),
        )
        .with_source(self.state.registry.clone())
        .with_source(self.state.connections.clone())
        .with_source(self.broadcaster.clone());
        tasks.push(tokio::spawn(statistics.run(signals.signalled())));

        tasks
    }

    /// 注册配置文件中的摄像头；单个失败只记录日志，返回成功数
    pub async fn add_configured_cameras(&self) -> usize {
        let mut added = 0;
        for camera in self.config.cameras.clone() {
            let camera_id = camera.id.clone();
            match self.state.registry.add_camera(camera).await {
                Ok(status) => {
                    info!(camera_id = %camera_id, state = ?status.state, "Camera registered");
                    added += 1;
                }
                Err(e) => error!(camera_id = %camera_id, error = %e, "Failed to register camera"),
            }
        }
        added
    }

    /// 先停采集（会话以 stopped 收尾），投递完收尾事件后关闭所有实时连接
    pub async fn shutdown(&mut self) {
        self.state
            .registry
            .shutdown(self.config.recording.stop_timeout())
            .await;

        self.drain.trigger(ShutdownSignal::Manual);
        if let Some(dispatch) = self.dispatch.take() {
            if let Err(e) = dispatch.await {
                error!(error = %e, "Event dispatch task failed");
            }
        }

        let closed = self.state.connections.shutdown().await;
        info!(connections = closed, "Realtime connections closed");
    }
}
