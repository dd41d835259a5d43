// 单摄像头采集循环
use crate::annotator::{AnnotationScheduler, FrameAnnotator};
use crate::pipeline::{FramePipeline, MotionTransition, ProcessedFrame};
use crate::recording::{RecordingOutcome, SessionRepository, SinkFactory};
use crate::source::{DefaultSourceFactory, FrameSource, SourceFactory};
use crate::{Result, VideoError};
use arc_swap::{ArcSwap, ArcSwapOption};
use bytes::Bytes;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use vigil_core::{
    Alert, AlertSeverity, CameraConfig, CameraConfigPatch, CameraEvent, CameraEventKind,
    CameraStatus, ControllerState, EventPublisher, Frame, RecordingSession, TriggerReason, WorkerState,
};

const TICK_INTERVAL: Duration = Duration::from_millis(500);
const ANNOTATION_TIMEOUT: Duration = Duration::from_secs(10);

/// 采集循环依赖的外部组件
#[derive(Clone)]
pub struct WorkerDeps {
    pub publisher: EventPublisher,
    pub source_factory: Arc<dyn SourceFactory>,
    pub sink_factory: Arc<dyn SinkFactory>,
    pub repository: Arc<dyn SessionRepository>,
    pub annotator: Option<Arc<dyn FrameAnnotator>>,
}

impl WorkerDeps {
    pub fn new(
        publisher: EventPublisher,
        sink_factory: Arc<dyn SinkFactory>,
        repository: Arc<dyn SessionRepository>,
    ) -> Self {
        Self {
            publisher,
            source_factory: Arc::new(DefaultSourceFactory),
            sink_factory,
            repository,
            annotator: None,
        }
    }

    pub fn with_source_factory(mut self, factory: Arc<dyn SourceFactory>) -> Self {
        self.source_factory = factory;
        self
    }

    pub fn with_annotator(mut self, annotator: Arc<dyn FrameAnnotator>) -> Self {
        self.annotator = Some(annotator);
        self
    }
}

/// 采集任务和句柄共享的状态
struct WorkerShared {
    camera_id: String,
    config_tx: watch::Sender<Arc<CameraConfig>>,
    status: ArcSwap<CameraStatus>,
    snapshot: ArcSwapOption<Bytes>,
    live_tx: watch::Sender<Option<Bytes>>,
    // 当前打开会话的镜像，停止超时强杀任务后据此收尾
    open_session: Mutex<Option<RecordingSession>>,
    // 已从注册表移除，任务锁内置位，之后不再启动
    retired: AtomicBool,
    deps: WorkerDeps,
}

impl WorkerShared {
    fn update_status(&self, f: impl Fn(&mut CameraStatus)) {
        self.status.rcu(|current| {
            let mut next = CameraStatus::clone(current);
            f(&mut next);
            next
        });
    }

    fn state(&self) -> WorkerState {
        self.status.load().state
    }

    fn set_state(&self, state: WorkerState, error: Option<&str>) {
        let previous = self.state();
        if previous == state {
            return;
        }
        self.update_status(|s| {
            s.state = state;
            if let Some(e) = error {
                s.last_error = Some(e.to_string());
            }
        });
        info!(
            camera_id = %self.camera_id,
            from = previous.as_str(),
            to = state.as_str(),
            "Worker state changed"
        );
        self.publish(
            CameraEventKind::WorkerStateChanged,
            json!({ "state": state, "previous": previous, "error": error }),
        );
    }

    fn publish(&self, kind: CameraEventKind, data: serde_json::Value) {
        self.deps
            .publisher
            .publish(CameraEvent::new(&self.camera_id, kind, data));
    }

    fn mirror(&self) -> MutexGuard<'_, Option<RecordingSession>> {
        self.open_session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn record_outcome(&self, outcome: RecordingOutcome) {
        match outcome {
            RecordingOutcome::Started(session) => {
                self.publish(
                    CameraEventKind::RecordingStarted,
                    json!({
                        "session_id": session.id,
                        "file_path": session.file_path,
                        "start_time": session.start_time,
                    }),
                );
                *self.mirror() = Some(session);
            }
            RecordingOutcome::Finished(session) | RecordingOutcome::Aborted(session) => {
                let closed_id = session.id;
                {
                    let mut mirror = self.mirror();
                    if mirror.as_ref().map(|s| s.id) == Some(closed_id) {
                        mirror.take();
                    }
                }
                self.persist_closed(session).await;
            }
        }
    }

    async fn persist_closed(&self, session: RecordingSession) {
        let aborted = session.trigger_reason == TriggerReason::Aborted;
        self.update_status(|s| {
            if aborted {
                s.sessions_aborted += 1;
            } else {
                s.sessions_completed += 1;
            }
        });

        if let Err(e) = self.deps.repository.save_session(&session).await {
            warn!(
                camera_id = %self.camera_id,
                session_id = %session.id,
                error = %e,
                "Failed to persist recording session"
            );
        }

        let kind = if aborted {
            CameraEventKind::RecordingAborted
        } else {
            CameraEventKind::RecordingFinished
        };
        self.publish(
            kind,
            json!({
                "session_id": session.id,
                "file_path": session.file_path,
                "start_time": session.start_time,
                "end_time": session.end_time,
                "duration_secs": session.duration_secs(),
                "frame_count": session.frame_count,
                "motion_frames": session.motion_frames,
                "file_size": session.file_size,
                "trigger_reason": session.trigger_reason,
                "error": session.error,
                "detections": session.detection_summary(),
            }),
        );
    }

    /// 采集任务已不在，按镜像把打开的会话记为中止
    async fn abort_mirrored_session(&self, reason: &str) {
        let Some(mut session) = self.mirror().take() else {
            return;
        };
        session.end_time = Some(Utc::now());
        session.trigger_reason = TriggerReason::Aborted;
        session.error = Some(reason.to_string());
        if let Ok(meta) = tokio::fs::metadata(&session.file_path).await {
            session.file_size = meta.len();
        }
        warn!(
            camera_id = %self.camera_id,
            session_id = %session.id,
            reason = reason,
            "Recording session aborted"
        );
        self.persist_closed(session).await;
    }
}

struct RunningTask {
    handle: JoinHandle<()>,
    stop_tx: watch::Sender<Option<TriggerReason>>,
}

/// 摄像头工作者句柄，可廉价克隆
#[derive(Clone)]
pub struct CameraWorker {
    shared: Arc<WorkerShared>,
    task: Arc<tokio::sync::Mutex<Option<RunningTask>>>,
}

impl CameraWorker {
    pub fn new(config: CameraConfig, deps: WorkerDeps) -> Self {
        let status = CameraStatus::new(
            &config.id,
            config.display_name(),
            config.enabled,
            config.version,
        );
        let camera_id = config.id.clone();
        let (config_tx, _) = watch::channel(Arc::new(config));
        let (live_tx, _) = watch::channel(None);

        Self {
            shared: Arc::new(WorkerShared {
                camera_id,
                config_tx,
                status: ArcSwap::from_pointee(status),
                snapshot: ArcSwapOption::empty(),
                live_tx,
                open_session: Mutex::new(None),
                retired: AtomicBool::new(false),
                deps,
            }),
            task: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.camera_id
    }

    pub fn config(&self) -> Arc<CameraConfig> {
        self.shared.config_tx.borrow().clone()
    }

    pub fn status(&self) -> CameraStatus {
        CameraStatus::clone(&self.shared.status.load())
    }

    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    /// 最近一帧（带标注）的 JPEG
    pub fn snapshot(&self) -> Option<Bytes> {
        self.shared.snapshot.load_full().map(|b| Bytes::clone(&b))
    }

    /// 从订阅时刻起的实时 JPEG 帧流；工作者被丢弃后结束
    pub fn live_sequence(&self) -> BoxStream<'static, Bytes> {
        let mut rx = self.shared.live_tx.subscribe();
        rx.borrow_and_update();
        futures::stream::unfold(rx, |mut rx| async move {
            loop {
                rx.changed().await.ok()?;
                let next = rx.borrow_and_update().clone();
                if let Some(jpeg) = next {
                    return Some((jpeg, rx));
                }
            }
        })
        .boxed()
    }

    pub async fn is_running(&self) -> bool {
        self.task.lock().await.as_ref().map(is_live).unwrap_or(false)
    }

    /// 启动采集循环，已在运行时直接返回
    pub async fn start(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        self.start_locked(&mut task)
    }

    pub async fn stop(&self, timeout: Duration) {
        self.stop_with(TriggerReason::Stopped, timeout).await
    }

    /// 通知循环退出并等待打开的会话收尾
    ///
    /// 超时后强杀任务，镜像中的会话记为中止。重复调用无副作用。
    /// `Removed` 停止后句柄作废，`start` 与 `reconfigure` 返回 `CameraNotFound`。
    pub async fn stop_with(&self, reason: TriggerReason, timeout: Duration) {
        let mut task = self.task.lock().await;
        if reason == TriggerReason::Removed {
            self.shared.retired.store(true, Ordering::SeqCst);
        }
        self.stop_locked(&mut task, reason, timeout).await;
    }

    /// 两个句柄指向同一工作者
    pub fn is_same(&self, other: &CameraWorker) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub fn is_retired(&self) -> bool {
        self.shared.retired.load(Ordering::SeqCst)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_retired() {
            return Err(VideoError::CameraNotFound(self.id().to_string()));
        }
        Ok(())
    }

    /// 原子地应用配置补丁，并按启用状态启停循环
    ///
    /// 运行中的循环在下一帧前读取新配置。返回新配置。
    pub async fn reconfigure(
        &self,
        patch: &CameraConfigPatch,
        stop_timeout: Duration,
    ) -> Result<Arc<CameraConfig>> {
        let mut task = self.task.lock().await;
        self.ensure_active()?;

        let mut swapped = None;
        self.shared.config_tx.send_if_modified(|current| {
            match current.apply_patch(patch) {
                Ok(next) => {
                    let next = Arc::new(next);
                    swapped = Some(Ok((current.clone(), next.clone())));
                    *current = next;
                    true
                }
                Err(e) => {
                    swapped = Some(Err(e));
                    false
                }
            }
        });
        let (previous, next) = match swapped {
            Some(result) => result?,
            None => return Ok(self.config()),
        };

        let name = next.display_name().to_string();
        let (enabled, version) = (next.enabled, next.version);
        self.shared.update_status(|s| {
            s.enabled = enabled;
            s.config_version = version;
            s.name = name.clone();
        });
        debug!(camera_id = %self.id(), version, "Camera configuration replaced");

        if !next.enabled {
            self.stop_locked(&mut task, TriggerReason::Stopped, stop_timeout)
                .await;
        } else if !previous.enabled || patch.enabled == Some(true) {
            self.start_locked(&mut task)?;
        }
        Ok(next)
    }

    fn start_locked(&self, task: &mut Option<RunningTask>) -> Result<()> {
        self.ensure_active()?;
        if task.as_ref().map(is_live).unwrap_or(false) {
            return Ok(());
        }

        let config = self.config();
        let source = match self.shared.deps.source_factory.create(&config) {
            Ok(source) => source,
            Err(e) => {
                self.shared
                    .set_state(WorkerState::Faulted, Some(&e.to_string()));
                return Err(e);
            }
        };
        let (stop_tx, stop_rx) = watch::channel(None);

        self.shared.update_status(|s| {
            s.consecutive_failures = 0;
            s.last_error = None;
        });
        self.shared.set_state(WorkerState::Starting, None);
        info!(camera_id = %self.id(), source = %source.describe(), "Starting camera worker");

        let worker_loop = WorkerLoop::new(self.shared.clone(), stop_rx);
        let handle = tokio::spawn(worker_loop.run(source));
        *task = Some(RunningTask { handle, stop_tx });
        Ok(())
    }

    async fn stop_locked(
        &self,
        task: &mut Option<RunningTask>,
        reason: TriggerReason,
        timeout: Duration,
    ) {
        let Some(mut running) = task.take() else {
            if self.state() == WorkerState::Faulted {
                self.shared.set_state(WorkerState::Stopped, None);
            }
            return;
        };

        if is_live(&running) {
            let _ = running.stop_tx.send(Some(reason));
            self.shared.set_state(WorkerState::Stopping, None);

            match tokio::time::timeout(timeout, &mut running.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(camera_id = %self.id(), error = %e, "Worker task failed");
                    self.shared
                        .abort_mirrored_session(&format!("worker task failed: {}", e))
                        .await;
                }
                Err(_) => {
                    warn!(
                        camera_id = %self.id(),
                        timeout_ms = timeout.as_millis() as u64,
                        "Worker did not stop in time, aborting"
                    );
                    running.handle.abort();
                    self.shared.abort_mirrored_session("stop timed out").await;
                }
            }
        }

        self.shared.update_status(|s| {
            s.controller_state = ControllerState::Idle;
            s.motion_active = false;
        });
        self.shared.set_state(WorkerState::Stopped, None);
    }
}

fn is_live(task: &RunningTask) -> bool {
    !task.handle.is_finished()
}

enum Exit {
    Stop(TriggerReason),
    Fault(String),
}

type PendingRead = BoxFuture<'static, (Box<dyn FrameSource>, Result<Frame>)>;

/// 读一帧；帧来源随 future 移动，避免跨循环借用
fn next_frame(
    mut source: Box<dyn FrameSource>,
    delay: Duration,
    reopen: bool,
    read_timeout: Duration,
) -> PendingRead {
    async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let timeout_ms = read_timeout.as_millis() as u64;
        if reopen {
            match tokio::time::timeout(read_timeout, source.open()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return (source, Err(e)),
                Err(_) => return (source, Err(VideoError::SourceTimeout(timeout_ms))),
            }
        }
        let result = match tokio::time::timeout(read_timeout, source.read_frame()).await {
            Ok(result) => result,
            Err(_) => Err(VideoError::SourceTimeout(timeout_ms)),
        };
        (source, result)
    }
    .boxed()
}

async fn wait_for_stop(rx: &mut watch::Receiver<Option<TriggerReason>>) -> TriggerReason {
    loop {
        if let Some(reason) = *rx.borrow_and_update() {
            return reason;
        }
        if rx.changed().await.is_err() {
            // 句柄全部丢弃
            return TriggerReason::Stopped;
        }
    }
}

/// 指数退避：initial, 2*initial, 4*initial ... 封顶 max
pub fn backoff_delay(failures: u32, initial: Duration, max: Duration) -> Duration {
    let shift = failures.saturating_sub(1).min(16);
    initial.saturating_mul(1u32 << shift).min(max)
}

struct WorkerLoop {
    shared: Arc<WorkerShared>,
    config_rx: watch::Receiver<Arc<CameraConfig>>,
    config: Arc<CameraConfig>,
    stop_rx: watch::Receiver<Option<TriggerReason>>,
    pipeline: Option<FramePipeline>,
    annotator: Option<AnnotationScheduler>,
    failures: u32,
    last_processed: Option<Instant>,
}

impl WorkerLoop {
    fn new(shared: Arc<WorkerShared>, stop_rx: watch::Receiver<Option<TriggerReason>>) -> Self {
        let mut config_rx = shared.config_tx.subscribe();
        let config = config_rx.borrow_and_update().clone();
        let pipeline = FramePipeline::new(&config, shared.deps.sink_factory.clone());
        let annotator = build_scheduler(&shared.deps, &config);
        Self {
            shared,
            config_rx,
            config,
            stop_rx,
            pipeline: Some(pipeline),
            annotator,
            failures: 0,
            last_processed: None,
        }
    }

    async fn run(mut self, source: Box<dyn FrameSource>) {
        let exit = self.capture(source).await;
        self.shutdown(exit).await;
    }

    async fn capture(&mut self, source: Box<dyn FrameSource>) -> Exit {
        let mut pending = next_frame(source, Duration::ZERO, true, self.read_timeout());
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                reason = wait_for_stop(&mut self.stop_rx) => return Exit::Stop(reason),
                (source, result) = &mut pending => {
                    match result {
                        Ok(frame) => {
                            self.on_frame(frame).await;
                            pending = next_frame(source, Duration::ZERO, false, self.read_timeout());
                        }
                        Err(e) => {
                            match self.on_failure(&e) {
                                Some(delay) => {
                                    pending = next_frame(source, delay, true, self.read_timeout());
                                }
                                None => return Exit::Fault(e.to_string()),
                            }
                            self.on_tick().await;
                        }
                    }
                }
                _ = ticker.tick() => self.on_tick().await,
            }
        }
    }

    fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.config.capture.read_timeout_ms)
    }

    fn on_failure(&mut self, err: &VideoError) -> Option<Duration> {
        self.failures += 1;
        let failures = self.failures;
        let message = err.to_string();
        self.shared.update_status(|s| {
            s.consecutive_failures = failures;
            s.last_error = Some(message.clone());
        });

        let capture = &self.config.capture;
        if failures >= capture.max_consecutive_failures {
            error!(
                camera_id = %self.shared.camera_id,
                failures,
                error = %message,
                "Too many consecutive source failures"
            );
            return None;
        }

        let delay = backoff_delay(
            failures,
            Duration::from_millis(capture.backoff_initial_ms),
            Duration::from_millis(capture.backoff_max_ms),
        );
        warn!(
            camera_id = %self.shared.camera_id,
            failures,
            delay_ms = delay.as_millis() as u64,
            error = %message,
            "Frame read failed, backing off"
        );
        Some(delay)
    }

    async fn on_frame(&mut self, frame: Frame) {
        self.apply_config_changes();
        self.failures = 0;

        // 超过目标帧率的帧直接丢弃
        let min_interval = Duration::from_secs(1) / self.config.recording.target_fps.max(1);
        let now = Instant::now();
        if let Some(last) = self.last_processed {
            if now.duration_since(last) < min_interval.mul_f32(0.8) {
                self.shared.update_status(|s| {
                    s.frames_skipped += 1;
                    s.consecutive_failures = 0;
                });
                return;
            }
        }
        self.last_processed = Some(now);

        match self.with_pipeline(move |p| p.process(frame)).await {
            Some(out) => self.publish_frame(out).await,
            None => self.shared.update_status(|s| s.frames_skipped += 1),
        }
    }

    async fn publish_frame(&mut self, out: ProcessedFrame) {
        if let Some(jpeg) = out.live_jpeg {
            self.shared.snapshot.store(Some(Arc::new(jpeg.clone())));
            self.shared.live_tx.send_replace(Some(jpeg));
        }

        match out.motion_transition {
            Some(MotionTransition::Started) => self.shared.publish(
                CameraEventKind::MotionStarted,
                json!({
                    "regions": out.motion.regions,
                    "total_area": out.motion.total_area(),
                }),
            ),
            Some(MotionTransition::Ended) => {
                self.shared.publish(CameraEventKind::MotionEnded, json!({}))
            }
            None => {}
        }

        if let Some(outcome) = out.recording {
            self.shared.record_outcome(outcome).await;
        }

        self.handle_annotations(Some(&out.frame));

        let controller_state = self.controller_state();
        let detected = out.motion.detected;
        let timestamp = out.motion.timestamp;
        self.shared.update_status(|s| {
            s.last_frame_at = Some(timestamp);
            s.frames_processed += 1;
            s.consecutive_failures = 0;
            s.controller_state = controller_state;
            s.motion_active = detected;
        });
        self.shared.set_state(WorkerState::Running, None);
    }

    fn controller_state(&self) -> ControllerState {
        self.pipeline
            .as_ref()
            .map(|p| p.controller_state())
            .unwrap_or_default()
    }

    fn handle_annotations(&mut self, frame: Option<&Arc<Frame>>) {
        let Some(scheduler) = self.annotator.as_mut() else {
            return;
        };
        let result = scheduler.poll();
        if let Some(frame) = frame {
            scheduler.offer(frame);
        }

        match result {
            Some(Ok(r)) if !r.detections.is_empty() => {
                if let Some(pipeline) = self.pipeline.as_mut() {
                    pipeline.add_detections(r.frame_sequence, r.timestamp, &r.detections);
                }
                self.shared.publish(
                    CameraEventKind::ObjectsDetected,
                    json!({
                        "frame_sequence": r.frame_sequence,
                        "detections": r.detections,
                    }),
                );
            }
            Some(Err(e)) => {
                warn!(camera_id = %self.shared.camera_id, error = %e, "Frame annotation failed")
            }
            _ => {}
        }
    }

    async fn on_tick(&mut self) {
        self.apply_config_changes();
        self.handle_annotations(None);

        if self.controller_state() != ControllerState::Recording {
            return;
        }
        let now = Utc::now();
        if let Some(Some(outcome)) = self.with_pipeline(move |p| p.tick(now)).await {
            self.shared.record_outcome(outcome).await;
            let controller_state = self.controller_state();
            self.shared
                .update_status(|s| s.controller_state = controller_state);
        }
    }

    fn apply_config_changes(&mut self) {
        if !self.config_rx.has_changed().unwrap_or(false) {
            return;
        }
        let config = self.config_rx.borrow_and_update().clone();
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.update_config(&config);
        }

        match (&mut self.annotator, config.annotation.enabled) {
            (Some(scheduler), true) => scheduler.set_cadence(config.annotation.every_n_frames),
            (Some(_), false) => self.annotator = None,
            (None, true) => self.annotator = build_scheduler(&self.shared.deps, &config),
            (None, false) => {}
        }

        debug!(
            camera_id = %self.shared.camera_id,
            version = config.version,
            "Applied configuration update"
        );
        self.config = config;
    }

    /// 在阻塞线程池中操作流水线
    ///
    /// 处理过程 panic 时该帧丢弃，流水线重建，打开的会话记为中止。
    async fn with_pipeline<R, F>(&mut self, f: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut FramePipeline) -> R + Send + 'static,
    {
        let mut pipeline = match self.pipeline.take() {
            Some(p) => p,
            None => FramePipeline::new(&self.config, self.shared.deps.sink_factory.clone()),
        };

        match tokio::task::spawn_blocking(move || {
            let result = f(&mut pipeline);
            (pipeline, result)
        })
        .await
        {
            Ok((pipeline, result)) => {
                self.pipeline = Some(pipeline);
                Some(result)
            }
            Err(e) => {
                let err = VideoError::Processing(e.to_string());
                error!(camera_id = %self.shared.camera_id, error = %err, "Frame processing failed");
                let message = err.to_string();
                self.shared
                    .update_status(|s| s.last_error = Some(message.clone()));
                self.shared.abort_mirrored_session(&message).await;
                self.pipeline = Some(FramePipeline::new(
                    &self.config,
                    self.shared.deps.sink_factory.clone(),
                ));
                None
            }
        }
    }

    async fn shutdown(mut self, exit: Exit) {
        let (reason, fault) = match exit {
            Exit::Stop(reason) => (reason, None),
            Exit::Fault(message) => (TriggerReason::Aborted, Some(message)),
        };

        if let Some(scheduler) = self.annotator.as_mut() {
            scheduler.cancel();
        }

        let now = Utc::now();
        if let Some(Some(outcome)) = self.with_pipeline(move |p| p.force_stop(reason, now)).await {
            self.shared.record_outcome(outcome).await;
        }
        if self.pipeline.as_ref().map(|p| p.motion_active()).unwrap_or(false) {
            self.shared.publish(CameraEventKind::MotionEnded, json!({}));
        }
        self.shared.update_status(|s| {
            s.controller_state = ControllerState::Idle;
            s.motion_active = false;
        });

        match fault {
            Some(message) => {
                self.shared.set_state(WorkerState::Faulted, Some(&message));
                let config = &self.config;
                self.shared.deps.publisher.publish(
                    Alert::new(
                        "camera_faulted",
                        AlertSeverity::Critical,
                        format!("Camera {} stopped responding: {}", config.display_name(), message),
                    )
                    .for_camera(&config.id)
                    .with_data(json!({ "error": message, "failures": self.failures })),
                );
            }
            None => self.shared.set_state(WorkerState::Stopped, None),
        }
    }
}

fn build_scheduler(deps: &WorkerDeps, config: &CameraConfig) -> Option<AnnotationScheduler> {
    if !config.annotation.enabled {
        return None;
    }
    deps.annotator.as_ref().map(|annotator| {
        AnnotationScheduler::new(
            annotator.clone(),
            config.annotation.every_n_frames,
            ANNOTATION_TIMEOUT,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_caps() {
        let initial = Duration::from_secs(1);
        let max = Duration::from_secs(30);
        let delays: Vec<u64> = (1..=7)
            .map(|n| backoff_delay(n, initial, max).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
        assert_eq!(backoff_delay(1000, initial, max), max);
    }
}
