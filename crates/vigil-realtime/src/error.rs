use thiserror::Error;

#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error("Authentication failed: {0}")]
    Auth(String),
}

pub type Result<T> = std::result::Result<T, RealtimeError>;

/// 建立连接被拒绝的原因，映射到 WebSocket 关闭码
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("too many connections for {principal} (limit {limit})")]
    TooManyConnections { principal: String, limit: usize },

    #[error("connection attempts rate limited for {0}")]
    RateLimited(String),

    #[error("server shutting down")]
    ShuttingDown,
}

impl ConnectionError {
    pub fn close_reason(&self) -> CloseReason {
        match self {
            ConnectionError::Unauthorized(_) => CloseReason::PolicyViolation,
            ConnectionError::TooManyConnections { .. } | ConnectionError::RateLimited(_) => {
                CloseReason::RateLimited
            }
            ConnectionError::ShuttingDown => CloseReason::ServerShutdown,
        }
    }
}

/// 服务端主动关闭连接的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// 认证失败
    PolicyViolation,
    /// 超出连接数或频率限制
    RateLimited,
    HeartbeatTimeout,
    ServerShutdown,
    /// 客户端主动断开
    ClientClosed,
}

impl CloseReason {
    pub fn code(&self) -> u16 {
        match self {
            CloseReason::PolicyViolation => 1008,
            CloseReason::RateLimited => 1013,
            CloseReason::HeartbeatTimeout | CloseReason::ServerShutdown => 1001,
            CloseReason::ClientClosed => 1000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::PolicyViolation => "policy_violation",
            CloseReason::RateLimited => "rate_limited",
            CloseReason::HeartbeatTimeout => "heartbeat_timeout",
            CloseReason::ServerShutdown => "server_shutdown",
            CloseReason::ClientClosed => "client_closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_codes() {
        assert_eq!(
            ConnectionError::Unauthorized("bad token".into()).close_reason().code(),
            1008
        );
        let cap = ConnectionError::TooManyConnections {
            principal: "alice".into(),
            limit: 2,
        };
        assert_eq!(cap.close_reason().code(), 1013);
        assert_eq!(CloseReason::HeartbeatTimeout.code(), 1001);
        assert_eq!(CloseReason::HeartbeatTimeout.as_str(), "heartbeat_timeout");
    }
}
