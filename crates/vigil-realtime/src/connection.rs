// 实时连接管理：认证、连接数限制、心跳、上行报文处理
use crate::auth::{Principal, TokenVerifier};
use crate::broadcaster::{EventBroadcaster, Subscriber};
use crate::error::{CloseReason, ConnectionError};
use crate::queue::Outbound;
use crate::ratelimit::{RateLimiter, TokenBucket};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vigil_core::{
    Alert, AlertSeverity, ClientMessage, ConnectionPhase, Event, ServerMessage, StatisticsSource,
};

/// 连接相关限制
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// 每个主体的并发连接上限
    pub max_connections_per_principal: usize,
    pub heartbeat_interval_secs: u64,
    /// 连续错过多少个心跳周期后断开
    pub missed_heartbeats: u32,
    pub queue_capacity: usize,
    /// 每个主体每分钟最多建立的连接数
    pub connects_per_minute: u64,
    /// 单连接上行报文：突发上限与每秒补充
    pub message_burst: u64,
    pub messages_per_sec: f64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_connections_per_principal: 5,
            heartbeat_interval_secs: 30,
            missed_heartbeats: 2,
            queue_capacity: 256,
            connects_per_minute: 30,
            message_burst: 20,
            messages_per_sec: 10.0,
        }
    }
}

impl ConnectionSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// 超过该时长没有任何上行数据即视为失联
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval() * self.missed_heartbeats.max(1)
    }
}

struct Connection {
    principal: Principal,
    connected_at: DateTime<Utc>,
    last_seen: Mutex<Instant>,
    subscriber: Arc<Subscriber>,
    inbound: TokenBucket,
}

impl Connection {
    fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        let last_seen = *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner);
        now.saturating_duration_since(last_seen)
    }
}

/// 已建立的连接，传输层据此收发
pub struct ConnectionHandle {
    pub id: Uuid,
    pub principal: Principal,
    subscriber: Arc<Subscriber>,
}

impl ConnectionHandle {
    /// 下一条待发送数据；连接关闭且排空后返回 `None`
    pub async fn next_outbound(&self) -> Option<Outbound> {
        self.subscriber.queue().recv().await
    }
}

pub struct RealtimeConnectionManager {
    verifier: Arc<dyn TokenVerifier>,
    broadcaster: Arc<EventBroadcaster>,
    settings: ConnectionSettings,
    connections: RwLock<HashMap<Uuid, Arc<Connection>>>,
    connect_limiter: RateLimiter,
    shutting_down: AtomicBool,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl RealtimeConnectionManager {
    pub fn new(
        verifier: Arc<dyn TokenVerifier>,
        broadcaster: Arc<EventBroadcaster>,
        settings: ConnectionSettings,
    ) -> Self {
        let connect_limiter =
            RateLimiter::new(settings.connects_per_minute.max(1), Duration::from_secs(60));
        Self {
            verifier,
            broadcaster,
            settings,
            connections: RwLock::new(HashMap::new()),
            connect_limiter,
            shutting_down: AtomicBool::new(false),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.broadcaster
    }

    /// 认证并登记连接
    ///
    /// 认证失败对应关闭码 1008，超出连接数或建连频率对应 1013。
    pub async fn connect(&self, token: Option<&str>) -> Result<ConnectionHandle, ConnectionError> {
        let result = self.try_connect(token).await;
        if let Err(e) = &result {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, code = e.close_reason().code(), "Connection rejected");
            if let ConnectionError::TooManyConnections { principal, limit } = e {
                self.notify_limit_reached(principal, *limit).await;
            }
        }
        result
    }

    /// 告知该主体已有的连接：新连接因数量上限被拒绝
    async fn notify_limit_reached(&self, principal: &str, limit: usize) {
        let alert = Alert::new(
            "connection_limit_reached",
            AlertSeverity::Warning,
            format!("A new connection was rejected: limit of {} reached", limit),
        )
        .with_data(json!({ "principal": principal, "limit": limit }));
        let notified = self
            .broadcaster
            .broadcast_to(principal, &Event::Alert(alert))
            .await;
        debug!(principal = principal, notified, "Connection limit alert sent");
    }

    async fn try_connect(&self, token: Option<&str>) -> Result<ConnectionHandle, ConnectionError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(ConnectionError::ShuttingDown);
        }
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ConnectionError::Unauthorized("missing token".to_string()))?;
        let principal = self
            .verifier
            .verify(token)
            .map_err(|e| ConnectionError::Unauthorized(e.to_string()))?;

        if !self.connect_limiter.check(&principal.id).await {
            return Err(ConnectionError::RateLimited(principal.id));
        }

        let id = Uuid::new_v4();
        let limit = self.settings.max_connections_per_principal;
        let subscriber = {
            // 计数与登记在同一把写锁内完成
            let mut connections = self.connections.write().await;
            let open = connections
                .values()
                .filter(|c| c.principal.id == principal.id)
                .count();
            if open >= limit {
                return Err(ConnectionError::TooManyConnections {
                    principal: principal.id,
                    limit,
                });
            }

            let subscriber = self.broadcaster.subscribe(id, &principal.id, &[]).await;
            connections.insert(
                id,
                Arc::new(Connection {
                    principal: principal.clone(),
                    connected_at: Utc::now(),
                    last_seen: Mutex::new(Instant::now()),
                    subscriber: subscriber.clone(),
                    inbound: TokenBucket::new(
                        self.settings.message_burst,
                        self.settings.messages_per_sec,
                    ),
                }),
            );
            subscriber
        };

        subscriber.send(&ServerMessage::ConnectionStatus {
            status: ConnectionPhase::Connected,
            connection_id: id.to_string(),
            principal: principal.id.clone(),
            message: "connected".to_string(),
        });
        self.accepted.fetch_add(1, Ordering::Relaxed);
        info!(connection_id = %id, principal = %principal.id, "Realtime connection established");

        Ok(ConnectionHandle {
            id,
            principal,
            subscriber,
        })
    }

    async fn connection(&self, id: Uuid) -> Option<Arc<Connection>> {
        self.connections.read().await.get(&id).cloned()
    }

    /// 收到任何上行数据（含协议层 ping/pong）时刷新心跳
    pub async fn touch(&self, id: Uuid) {
        if let Some(connection) = self.connection(id).await {
            connection.touch();
        }
    }

    /// 处理客户端文本报文，应答放入该连接的出站队列
    pub async fn handle_client_text(&self, id: Uuid, text: &str) {
        let Some(connection) = self.connection(id).await else {
            return;
        };
        connection.touch();

        if !connection.inbound.try_acquire(1).await {
            connection.subscriber.send(&ServerMessage::error(
                "rate_limited",
                "too many messages, slow down",
            ));
            return;
        }

        let reply = match ClientMessage::parse(text) {
            Ok(ClientMessage::Ping { timestamp }) => ServerMessage::Pong { timestamp },
            Ok(ClientMessage::Subscribe { event_types }) => {
                let current = connection.subscriber.add_types(&event_types);
                debug!(connection_id = %id, event_types = ?current, "Subscription updated");
                ServerMessage::SubscriptionConfirmed {
                    event_types: current,
                }
            }
            Ok(ClientMessage::Unsubscribe { event_types }) => {
                let current = connection.subscriber.remove_types(&event_types);
                debug!(connection_id = %id, event_types = ?current, "Subscription updated");
                ServerMessage::UnsubscriptionConfirmed {
                    event_types: current,
                }
            }
            Err(e) => {
                debug!(connection_id = %id, error = %e, "Invalid client message");
                ServerMessage::error("invalid_message", e.to_string())
            }
        };
        connection.subscriber.send(&reply);
    }

    /// 注销连接；`reason` 不是客户端主动断开时下发关闭帧
    pub async fn disconnect(&self, id: Uuid, reason: CloseReason) -> bool {
        let Some(connection) = self.connections.write().await.remove(&id) else {
            return false;
        };
        self.broadcaster.unsubscribe(id).await;

        if reason != CloseReason::ClientClosed {
            connection.subscriber.send(&ServerMessage::ConnectionStatus {
                status: ConnectionPhase::Closing,
                connection_id: id.to_string(),
                principal: connection.principal.id.clone(),
                message: reason.as_str().to_string(),
            });
        }
        connection
            .subscriber
            .queue()
            .close_with(reason.code(), reason.as_str());

        let duration = (Utc::now() - connection.connected_at).num_seconds();
        info!(
            connection_id = %id,
            principal = %connection.principal.id,
            reason = reason.as_str(),
            duration_secs = duration,
            "Realtime connection closed"
        );
        true
    }

    /// 断开心跳超时的连接，返回被断开的连接
    pub async fn reap_idle(&self) -> Vec<Uuid> {
        let timeout = self.settings.heartbeat_timeout();
        let now = Instant::now();
        let stale: Vec<Uuid> = self
            .connections
            .read()
            .await
            .iter()
            .filter(|(_, c)| c.idle_for(now) >= timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in &stale {
            self.disconnect(*id, CloseReason::HeartbeatTimeout).await;
        }
        stale
    }

    /// 周期性清理失联连接
    pub async fn run_heartbeat(self: Arc<Self>, shutdown: impl Future<Output = ()> + Send) {
        let mut ticker = tokio::time::interval(self.settings.heartbeat_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let reaped = self.reap_idle().await;
                    if !reaped.is_empty() {
                        info!(count = reaped.len(), "Reaped idle connections");
                    }
                    self.connect_limiter.cleanup(Duration::from_secs(120)).await;
                }
            }
        }
        debug!("Heartbeat reaper stopped");
    }

    /// 停止接受新连接并关闭全部现有连接
    pub async fn shutdown(&self) -> usize {
        self.shutting_down.store(true, Ordering::SeqCst);
        let closed = self.close_all(CloseReason::ServerShutdown).await;
        info!(closed, "Realtime connections closed for shutdown");
        closed
    }

    pub async fn close_all(&self, reason: CloseReason) -> usize {
        let ids: Vec<Uuid> = self.connections.read().await.keys().copied().collect();
        for id in &ids {
            self.disconnect(*id, reason).await;
        }
        ids.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn connections_for(&self, principal: &str) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| c.principal.id == principal)
            .count()
    }

    pub async fn statistics(&self) -> Value {
        let connections = self.connections.read().await;
        let mut per_principal: HashMap<&str, usize> = HashMap::new();
        for connection in connections.values() {
            *per_principal.entry(connection.principal.id.as_str()).or_default() += 1;
        }
        json!({
            "active": connections.len(),
            "per_principal": per_principal,
            "accepted": self.accepted.load(Ordering::Relaxed),
            "rejected": self.rejected.load(Ordering::Relaxed),
        })
    }
}

#[async_trait]
impl StatisticsSource for RealtimeConnectionManager {
    fn name(&self) -> &str {
        "connections"
    }

    async fn collect(&self) -> vigil_core::Result<Value> {
        Ok(self.statistics().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::JwtAuth;

    fn manager(settings: ConnectionSettings) -> (RealtimeConnectionManager, JwtAuth) {
        let auth = JwtAuth::new("secret", 1);
        let manager = RealtimeConnectionManager::new(
            Arc::new(JwtAuth::new("secret", 1)),
            Arc::new(EventBroadcaster::new(32)),
            settings,
        );
        (manager, auth)
    }

    fn drain_json(handle: &ConnectionHandle) -> Vec<Value> {
        let mut out = Vec::new();
        while let Some(item) = handle.subscriber.queue().try_pop() {
            if let Outbound::Text(json) = item {
                out.push(serde_json::from_str(&json).unwrap());
            }
        }
        out
    }

    #[tokio::test]
    async fn test_connect_sends_status() {
        let (manager, auth) = manager(ConnectionSettings::default());
        let token = auth.generate_token("alice", vec![]).unwrap();

        let handle = manager.connect(Some(&token)).await.unwrap();
        assert_eq!(handle.principal.id, "alice");

        let messages = drain_json(&handle);
        assert_eq!(messages[0]["type"], "connection_status");
        assert_eq!(messages[0]["status"], "connected");
        assert_eq!(messages[0]["connection_id"], handle.id.to_string());
    }

    #[tokio::test]
    async fn test_auth_failure_is_policy_violation() {
        let (manager, _) = manager(ConnectionSettings::default());

        let err = manager.connect(None).await.err().unwrap();
        assert_eq!(err.close_reason().code(), 1008);

        let err = manager.connect(Some("garbage")).await.err().unwrap();
        assert!(matches!(err, ConnectionError::Unauthorized(_)));
        assert_eq!(err.close_reason().code(), 1008);
        assert_eq!(manager.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_ping_and_subscription_replies() {
        let (manager, auth) = manager(ConnectionSettings::default());
        let token = auth.generate_token("alice", vec![]).unwrap();
        let handle = manager.connect(Some(&token)).await.unwrap();
        drain_json(&handle);

        manager
            .handle_client_text(handle.id, r#"{"type":"ping","timestamp":1714550400}"#)
            .await;
        manager
            .handle_client_text(
                handle.id,
                r#"{"type":"subscribe","event_types":["alert","motion_started"]}"#,
            )
            .await;
        manager
            .handle_client_text(handle.id, r#"{"type":"unsubscribe","event_types":["alert"]}"#)
            .await;
        manager.handle_client_text(handle.id, "not json").await;

        let replies = drain_json(&handle);
        assert_eq!(replies[0]["type"], "pong");
        assert_eq!(replies[0]["timestamp"], 1714550400);
        assert_eq!(replies[1]["type"], "subscription_confirmed");
        assert_eq!(replies[1]["event_types"], json!(["alert", "motion_started"]));
        assert_eq!(replies[2]["type"], "unsubscription_confirmed");
        assert_eq!(replies[2]["event_types"], json!(["motion_started"]));
        assert_eq!(replies[3]["type"], "error");
        assert_eq!(replies[3]["code"], "invalid_message");
    }

    #[tokio::test]
    async fn test_inbound_message_rate_limit() {
        let settings = ConnectionSettings {
            message_burst: 3,
            messages_per_sec: 0.0,
            ..Default::default()
        };
        let (manager, auth) = manager(settings);
        let token = auth.generate_token("alice", vec![]).unwrap();
        let handle = manager.connect(Some(&token)).await.unwrap();
        drain_json(&handle);

        for _ in 0..5 {
            manager.handle_client_text(handle.id, r#"{"type":"ping"}"#).await;
        }
        let replies = drain_json(&handle);
        let codes: Vec<&str> = replies.iter().map(|r| r["type"].as_str().unwrap()).collect();
        assert_eq!(codes, vec!["pong", "pong", "pong", "error", "error"]);
        assert_eq!(replies[4]["code"], "rate_limited");
    }

    #[tokio::test]
    async fn test_heartbeat_timeout_closes_with_1001() {
        let settings = ConnectionSettings {
            heartbeat_interval_secs: 1,
            missed_heartbeats: 1,
            ..Default::default()
        };
        let (manager, auth) = manager(settings);
        let token = auth.generate_token("alice", vec![]).unwrap();
        let idle = manager.connect(Some(&token)).await.unwrap();
        let lively = manager.connect(Some(&token)).await.unwrap();

        assert!(manager.reap_idle().await.is_empty());

        tokio::time::sleep(Duration::from_millis(700)).await;
        manager.touch(lively.id).await;
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(manager.reap_idle().await, vec![idle.id]);
        assert_eq!(manager.connection_count().await, 1);

        let mut last = None;
        while let Some(item) = idle.subscriber.queue().try_pop() {
            last = Some(item);
        }
        assert_eq!(
            last,
            Some(Outbound::Close {
                code: 1001,
                reason: "heartbeat_timeout".to_string()
            })
        );
        assert_eq!(idle.next_outbound().await, None);
    }

    #[tokio::test]
    async fn test_disconnect_unregisters_subscriber() {
        let (manager, auth) = manager(ConnectionSettings::default());
        let token = auth.generate_token("alice", vec![]).unwrap();
        let handle = manager.connect(Some(&token)).await.unwrap();
        assert_eq!(manager.broadcaster().subscriber_count().await, 1);

        assert!(manager.disconnect(handle.id, CloseReason::ClientClosed).await);
        assert!(!manager.disconnect(handle.id, CloseReason::ClientClosed).await);
        assert_eq!(manager.broadcaster().subscriber_count().await, 0);
        assert_eq!(manager.connections_for("alice").await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_connections() {
        let (manager, auth) = manager(ConnectionSettings::default());
        let token = auth.generate_token("alice", vec![]).unwrap();
        let handle = manager.connect(Some(&token)).await.unwrap();

        assert_eq!(manager.shutdown().await, 1);
        assert!(matches!(
            manager.connect(Some(&token)).await,
            Err(ConnectionError::ShuttingDown)
        ));

        let mut last = None;
        while let Some(item) = handle.next_outbound().await {
            last = Some(item);
        }
        assert!(matches!(last, Some(Outbound::Close { code: 1001, .. })));
    }
}
