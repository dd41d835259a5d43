// vigil-realtime: 实时事件推送
//
// - EventBroadcaster：采集循环事件 -> 各连接的有界出站队列（满时丢最旧）
// - RealtimeConnectionManager：JWT 认证、每主体连接上限、心跳清理、上行报文
// - StatisticsTask：定时推送统计

pub mod auth;
pub mod broadcaster;
pub mod connection;
pub mod error;
pub mod queue;
pub mod ratelimit;
pub mod stats;

// 重新导出常用类型
pub use auth::{JwtAuth, Principal, TokenVerifier};
pub use broadcaster::{EventBroadcaster, Subscriber};
pub use connection::{ConnectionHandle, ConnectionSettings, RealtimeConnectionManager};
pub use error::{CloseReason, ConnectionError, RealtimeError, Result};
pub use queue::{Outbound, OutboundQueue};
pub use stats::{StatisticsTask, DEFAULT_STATISTICS_INTERVAL};
