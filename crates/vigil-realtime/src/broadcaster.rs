// 事件广播：采集循环 -> 订阅者出站队列
use crate::queue::{Outbound, OutboundQueue};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock as StdRwLock, Weak};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vigil_core::{Event, EventReceiver, ServerMessage, StatisticsSource};

/// 单个连接的订阅
pub struct Subscriber {
    id: Uuid,
    principal: String,
    event_types: StdRwLock<HashSet<String>>,
    queue: OutboundQueue,
}

impl Subscriber {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    pub fn wants(&self, event: &Event) -> bool {
        let event_types = self
            .event_types
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        event.matches(&event_types)
    }

    /// 追加订阅类型，返回当前订阅集合（排序后）
    pub fn add_types(&self, types: &[String]) -> Vec<String> {
        let mut event_types = self
            .event_types
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        event_types.extend(types.iter().map(|t| t.trim().to_string()).filter(|t| !t.is_empty()));
        sorted(&event_types)
    }

    /// 取消订阅类型；参数为空时清空（恢复为订阅全部）
    pub fn remove_types(&self, types: &[String]) -> Vec<String> {
        let mut event_types = self
            .event_types
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if types.is_empty() {
            event_types.clear();
        } else {
            for t in types {
                event_types.remove(t.trim());
            }
        }
        sorted(&event_types)
    }

    pub fn event_types(&self) -> Vec<String> {
        sorted(
            &self
                .event_types
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    pub fn send(&self, message: &ServerMessage) -> bool {
        match serde_json::to_string(message) {
            Ok(json) => self.queue.push(Outbound::text(json)),
            Err(e) => {
                warn!(connection_id = %self.id, error = %e, "Failed to serialize message");
                false
            }
        }
    }
}

fn sorted(set: &HashSet<String>) -> Vec<String> {
    let mut items: Vec<String> = set.iter().cloned().collect();
    items.sort();
    items
}

/// 尽力而为的事件广播器
///
/// 广播只把报文放入各订阅者的有界队列，慢订阅者只会丢掉自己的旧报文。
/// 只持有订阅者的弱引用，订阅者由连接持有；连接释放后的条目在投递时清理。
pub struct EventBroadcaster {
    subscribers: RwLock<HashMap<Uuid, Weak<Subscriber>>>,
    queue_capacity: usize,
    published: AtomicU64,
}

impl EventBroadcaster {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
            published: AtomicU64::new(0),
        }
    }

    pub async fn subscribe(
        &self,
        connection_id: Uuid,
        principal: &str,
        event_types: &[String],
    ) -> Arc<Subscriber> {
        let subscriber = Arc::new(Subscriber {
            id: connection_id,
            principal: principal.to_string(),
            event_types: StdRwLock::new(HashSet::new()),
            queue: OutboundQueue::new(self.queue_capacity),
        });
        subscriber.add_types(event_types);
        self.subscribers
            .write()
            .await
            .insert(connection_id, Arc::downgrade(&subscriber));
        debug!(connection_id = %connection_id, principal = principal, "Subscriber registered");
        subscriber
    }

    pub async fn unsubscribe(&self, connection_id: Uuid) -> Option<Arc<Subscriber>> {
        let removed = self.subscribers.write().await.remove(&connection_id);
        if removed.is_some() {
            debug!(connection_id = %connection_id, "Subscriber removed");
        }
        removed.and_then(|s| s.upgrade())
    }

    /// 仍被连接持有的订阅者数
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .await
            .values()
            .filter(|s| s.strong_count() > 0)
            .count()
    }

    fn live(subscribers: &HashMap<Uuid, Weak<Subscriber>>) -> Vec<Arc<Subscriber>> {
        subscribers.values().filter_map(Weak::upgrade).collect()
    }

    /// 清理连接已释放的条目，返回清理数
    pub async fn prune(&self) -> usize {
        let mut subscribers = self.subscribers.write().await;
        let before = subscribers.len();
        subscribers.retain(|_, s| s.strong_count() > 0);
        let pruned = before - subscribers.len();
        if pruned > 0 {
            debug!(pruned, "Pruned released subscribers");
        }
        pruned
    }

    /// 投递给所有订阅了该类型的连接，返回投递数
    pub async fn broadcast(&self, event: &Event) -> usize {
        self.deliver(event, |_| true).await
    }

    /// 只投递给指定主体的连接
    pub async fn broadcast_to(&self, principal: &str, event: &Event) -> usize {
        self.deliver(event, |s| s.principal == principal).await
    }

    async fn deliver(&self, event: &Event, target: impl Fn(&Subscriber) -> bool) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);
        let json: Arc<str> = match serde_json::to_string(&event.to_message()) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!(message_type = event.message_type(), error = %e, "Failed to serialize event");
                return 0;
            }
        };

        let (subscribers, released) = {
            let subscribers = self.subscribers.read().await;
            let live = Self::live(&subscribers);
            let released = live.len() < subscribers.len();
            (live, released)
        };
        if released {
            self.prune().await;
        }

        let mut delivered = 0;
        for subscriber in &subscribers {
            if target(subscriber.as_ref()) && subscriber.wants(event) {
                if !subscriber.queue.push(Outbound::Text(json.clone())) {
                    debug!(connection_id = %subscriber.id, "Outbound queue full, dropped oldest");
                }
                delivered += 1;
            }
        }
        delivered
    }

    /// 直接发给某个连接，不经过订阅过滤
    pub async fn send_to(&self, connection_id: Uuid, message: &ServerMessage) -> bool {
        let subscriber = self
            .subscribers
            .read()
            .await
            .get(&connection_id)
            .and_then(Weak::upgrade);
        match subscriber {
            Some(subscriber) => subscriber.send(message),
            None => false,
        }
    }

    /// 消费采集循环的事件通道，直到通道关闭或收到停止信号
    ///
    /// 收到停止信号时先投递完通道中已有的事件。
    pub async fn run_dispatch(
        self: Arc<Self>,
        mut events: EventReceiver,
        shutdown: impl Future<Output = ()> + Send,
    ) {
        info!("Event dispatch started");
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => {
                        self.broadcast(&event).await;
                    }
                    None => break,
                },
                _ = &mut shutdown => break,
            }
        }
        info!("Event dispatch stopped");
    }

    pub async fn statistics(&self) -> Value {
        let subscribers = Self::live(&*self.subscribers.read().await);
        let backpressure_drops: u64 = subscribers.iter().map(|s| s.queue.dropped()).sum();
        let queued: usize = subscribers.iter().map(|s| s.queue.len()).sum();
        json!({
            "subscribers": subscribers.len(),
            "events_published": self.published.load(Ordering::Relaxed),
            "queued_messages": queued,
            "backpressure_drops": backpressure_drops,
        })
    }
}

#[async_trait]
impl StatisticsSource for EventBroadcaster {
    fn name(&self) -> &str {
        "broadcaster"
    }

    async fn collect(&self) -> vigil_core::Result<Value> {
        Ok(self.statistics().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::{Alert, AlertSeverity, CameraEvent, CameraEventKind};

    fn motion(camera: &str) -> Event {
        Event::Camera(CameraEvent::new(
            camera,
            CameraEventKind::MotionStarted,
            json!({}),
        ))
    }

    fn alert() -> Event {
        Event::Alert(Alert::new("camera_faulted", AlertSeverity::Critical, "down"))
    }

    fn drain(subscriber: &Subscriber) -> Vec<Value> {
        let mut out = Vec::new();
        while let Some(item) = subscriber.queue().try_pop() {
            if let Outbound::Text(json) = item {
                out.push(serde_json::from_str(&json).unwrap());
            }
        }
        out
    }

    #[tokio::test]
    async fn test_filters_by_event_type() {
        let broadcaster = EventBroadcaster::new(16);
        let all = broadcaster.subscribe(Uuid::new_v4(), "alice", &[]).await;
        let alerts = broadcaster
            .subscribe(Uuid::new_v4(), "bob", &["alert".to_string()])
            .await;
        let motion_only = broadcaster
            .subscribe(Uuid::new_v4(), "carol", &["motion_started".to_string()])
            .await;

        assert_eq!(broadcaster.broadcast(&motion("cam1")).await, 2);
        assert_eq!(broadcaster.broadcast(&alert()).await, 2);

        assert_eq!(drain(&all).len(), 2);
        let got = drain(&alerts);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["type"], "alert");
        let got = drain(&motion_only);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["event_type"], "motion_started");
    }

    #[tokio::test]
    async fn test_broadcast_to_principal() {
        let broadcaster = EventBroadcaster::new(16);
        let a1 = broadcaster.subscribe(Uuid::new_v4(), "alice", &[]).await;
        let a2 = broadcaster.subscribe(Uuid::new_v4(), "alice", &[]).await;
        let b = broadcaster.subscribe(Uuid::new_v4(), "bob", &[]).await;

        assert_eq!(broadcaster.broadcast_to("alice", &alert()).await, 2);
        assert_eq!(drain(&a1).len(), 1);
        assert_eq!(drain(&a2).len(), 1);
        assert!(drain(&b).is_empty());
    }

    #[tokio::test]
    async fn test_released_subscriber_is_pruned() {
        let broadcaster = EventBroadcaster::new(16);
        let kept = broadcaster.subscribe(Uuid::new_v4(), "alice", &[]).await;
        let released = broadcaster.subscribe(Uuid::new_v4(), "bob", &[]).await;
        assert_eq!(broadcaster.subscriber_count().await, 2);

        // 连接释放订阅者后不再计数，也不再投递
        drop(released);
        assert_eq!(broadcaster.subscriber_count().await, 1);
        assert_eq!(broadcaster.broadcast(&alert()).await, 1);
        assert_eq!(broadcaster.subscribers.read().await.len(), 1);
        assert_eq!(broadcaster.prune().await, 0);
        assert_eq!(drain(&kept).len(), 1);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_stall_others() {
        let broadcaster = Arc::new(EventBroadcaster::new(4));
        let stalled = broadcaster.subscribe(Uuid::new_v4(), "slow", &[]).await;
        let active = broadcaster.subscribe(Uuid::new_v4(), "fast", &[]).await;

        let reader = {
            let active = active.clone();
            tokio::spawn(async move {
                let mut received = 0;
                while let Some(item) = active.queue().recv().await {
                    received += 1;
                    if matches!(&item, Outbound::Text(json) if json.contains("cam99")) {
                        break;
                    }
                }
                received
            })
        };

        for i in 0..100 {
            broadcaster.broadcast(&motion(&format!("cam{}", i))).await;
            tokio::task::yield_now().await;
        }

        // 活跃订阅者拿到了最后一条，没有被卡住
        let received = tokio::time::timeout(std::time::Duration::from_secs(2), reader)
            .await
            .unwrap()
            .unwrap();
        assert!(received > 0);

        // 不读的订阅者只保留最新 4 条
        assert_eq!(stalled.queue().len(), 4);
        assert_eq!(stalled.queue().dropped(), 96);
        let latest = drain(&stalled);
        assert_eq!(latest[3]["camera_id"], "cam99");

        let stats = broadcaster.statistics().await;
        assert_eq!(stats["backpressure_drops"], 96);
    }

    #[tokio::test]
    async fn test_dispatch_consumes_channel() {
        let broadcaster = Arc::new(EventBroadcaster::new(16));
        let subscriber = broadcaster.subscribe(Uuid::new_v4(), "alice", &[]).await;
        let (publisher, receiver) = vigil_core::event_channel(8);

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(broadcaster.clone().run_dispatch(receiver, async move {
            let _ = stop_rx.await;
        }));

        publisher.publish(alert());
        let item = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            subscriber.queue().recv(),
        )
        .await
        .unwrap();
        assert!(matches!(item, Some(Outbound::Text(_))));

        stop_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unsubscribe_and_send_to() {
        let broadcaster = EventBroadcaster::new(16);
        let id = Uuid::new_v4();
        let subscriber = broadcaster.subscribe(id, "alice", &[]).await;

        assert!(broadcaster.send_to(id, &ServerMessage::error("x", "y")).await);
        assert_eq!(drain(&subscriber)[0]["type"], "error");

        assert!(broadcaster.unsubscribe(id).await.is_some());
        assert!(!broadcaster.send_to(id, &ServerMessage::error("x", "y")).await);
        assert_eq!(broadcaster.broadcast(&alert()).await, 0);
    }
}
