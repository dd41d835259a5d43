// 定时统计推送
use crate::broadcaster::EventBroadcaster;
use chrono::Utc;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use vigil_core::{Event, StatisticsSource, StatisticsUpdate};

/// 默认推送周期
pub const DEFAULT_STATISTICS_INTERVAL: Duration = Duration::from_secs(5);

/// 周期性汇总各统计来源并广播 `statistics_update`，与摄像头是否活跃无关
pub struct StatisticsTask {
    broadcaster: Arc<EventBroadcaster>,
    sources: Vec<Arc<dyn StatisticsSource>>,
    interval: Duration,
}

impl StatisticsTask {
    pub fn new(broadcaster: Arc<EventBroadcaster>, interval: Duration) -> Self {
        Self {
            broadcaster,
            sources: Vec::new(),
            interval,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn StatisticsSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// 单个来源失败时该字段为 null，不影响其他来源
    pub async fn collect(&self) -> StatisticsUpdate {
        let mut data = Map::new();
        for source in &self.sources {
            let value = match source.collect().await {
                Ok(value) => value,
                Err(e) => {
                    warn!(source = source.name(), error = %e, "Statistics source failed");
                    Value::Null
                }
            };
            data.insert(source.name().to_string(), value);
        }
        StatisticsUpdate {
            timestamp: Utc::now(),
            data: Value::Object(data),
        }
    }

    pub async fn run(self, shutdown: impl Future<Output = ()> + Send) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let update = self.collect().await;
                    let delivered = self.broadcaster.broadcast(&Event::Statistics(update)).await;
                    debug!(delivered, "Statistics broadcast");
                }
            }
        }
        debug!("Statistics task stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Outbound;
    use async_trait::async_trait;
    use serde_json::json;
    use uuid::Uuid;
    use vigil_core::CoreError;

    struct Fixed;

    #[async_trait]
    impl StatisticsSource for Fixed {
        fn name(&self) -> &str {
            "storage"
        }

        async fn collect(&self) -> vigil_core::Result<Value> {
            Ok(json!({ "free_bytes": 1024 }))
        }
    }

    struct Broken;

    #[async_trait]
    impl StatisticsSource for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn collect(&self) -> vigil_core::Result<Value> {
            Err(CoreError::ChannelClosed("gone".to_string()))
        }
    }

    #[tokio::test]
    async fn test_collect_merges_sources() {
        let broadcaster = Arc::new(EventBroadcaster::new(8));
        let task = StatisticsTask::new(broadcaster.clone(), DEFAULT_STATISTICS_INTERVAL)
            .with_source(Arc::new(Fixed))
            .with_source(Arc::new(Broken))
            .with_source(broadcaster.clone());

        let update = task.collect().await;
        assert_eq!(update.data["storage"]["free_bytes"], 1024);
        assert!(update.data["broken"].is_null());
        assert_eq!(update.data["broadcaster"]["subscribers"], 0);
    }

    #[tokio::test]
    async fn test_periodic_broadcast_without_camera_activity() {
        let broadcaster = Arc::new(EventBroadcaster::new(8));
        let subscriber = broadcaster.subscribe(Uuid::new_v4(), "alice", &[]).await;
        let task = StatisticsTask::new(broadcaster.clone(), Duration::from_millis(30))
            .with_source(Arc::new(Fixed));

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(task.run(async move {
            let _ = stop_rx.await;
        }));

        for _ in 0..2 {
            let item = tokio::time::timeout(Duration::from_secs(1), subscriber.queue().recv())
                .await
                .unwrap();
            match item {
                Some(Outbound::Text(json)) => {
                    let value: Value = serde_json::from_str(&json).unwrap();
                    assert_eq!(value["type"], "statistics_update");
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        stop_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
