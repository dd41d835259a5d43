use super::TokenBucket;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// 按键（通常是连接主体）分桶的限流器
#[derive(Clone)]
pub struct RateLimiter {
    max_requests: u64,
    window: Duration,
    buckets: Arc<RwLock<HashMap<String, Arc<TokenBucket>>>>,
}

impl RateLimiter {
    /// 每个键在 `window` 内最多 `max_requests` 次
    pub fn new(max_requests: u64, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            buckets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 检查是否允许请求
    pub async fn check(&self, key: &str) -> bool {
        let bucket = {
            let mut buckets = self.buckets.write().await;
            buckets
                .entry(key.to_string())
                .or_insert_with(|| {
                    Arc::new(TokenBucket::per_window(self.max_requests, self.window))
                })
                .clone()
        };

        let allowed = bucket.try_acquire(1).await;
        if !allowed {
            warn!(key = key, max_requests = self.max_requests, "Rate limit exceeded");
        }
        allowed
    }

    /// 清理补满且长时间未使用的桶
    pub async fn cleanup(&self, idle: Duration) -> usize {
        let snapshot: Vec<(String, Arc<TokenBucket>)> = self
            .buckets
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut idle_keys = Vec::new();
        for (key, bucket) in snapshot {
            if bucket.is_idle(idle).await {
                idle_keys.push(key);
            }
        }

        let mut buckets = self.buckets.write().await;
        for key in &idle_keys {
            buckets.remove(key);
        }
        debug!(removed = idle_keys.len(), remaining = buckets.len(), "Rate limiter buckets cleaned");
        idle_keys.len()
    }

    pub async fn len(&self) -> usize {
        self.buckets.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));

        // 前 5 个请求应该通过
        for i in 0..5 {
            assert!(limiter.check("alice").await, "Request {} should pass", i);
        }

        // 第 6 个请求应该被限流
        assert!(!limiter.check("alice").await, "Request 6 should be rate limited");

        // 其他主体不受影响
        assert!(limiter.check("bob").await);
    }

    #[tokio::test]
    async fn test_cleanup_removes_idle_buckets() {
        let limiter = RateLimiter::new(2, Duration::from_millis(100));
        assert!(limiter.check("alice").await);
        assert!(limiter.check("bob").await);
        assert_eq!(limiter.len().await, 2);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(limiter.check("bob").await);

        assert_eq!(limiter.cleanup(Duration::from_millis(150)).await, 1);
        assert_eq!(limiter.len().await, 1);
    }
}
