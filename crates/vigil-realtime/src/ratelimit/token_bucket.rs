use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// 令牌桶限流器
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: RwLock<TokenState>,
}

struct TokenState {
    current: f64,
    last_refill: Instant,
    last_used: Instant,
}

impl TokenBucket {
    /// `refill_per_sec` 为 0 时不自动补充
    pub fn new(capacity: u64, refill_per_sec: f64) -> Self {
        let now = Instant::now();
        Self {
            capacity: capacity as f64,
            refill_per_sec: refill_per_sec.max(0.0),
            state: RwLock::new(TokenState {
                current: capacity as f64,
                last_refill: now,
                last_used: now,
            }),
        }
    }

    /// 按窗口内最大请求数构造：容量 = max，窗口内匀速补满
    pub fn per_window(max_requests: u64, window: Duration) -> Self {
        let secs = window.as_secs_f64();
        let rate = if secs > 0.0 {
            max_requests as f64 / secs
        } else {
            0.0
        };
        Self::new(max_requests, rate)
    }

    /// 尝试获取指定数量的令牌（非阻塞）
    pub async fn try_acquire(&self, tokens: u64) -> bool {
        let mut state = self.state.write().await;
        self.refill(&mut state);
        state.last_used = state.last_refill;

        let tokens = tokens as f64;
        if state.current >= tokens {
            state.current -= tokens;
            true
        } else {
            debug!(available = state.current, "Insufficient tokens");
            false
        }
    }

    fn refill(&self, state: &mut TokenState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.current = (state.current + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }

    /// 当前可用令牌数（向下取整）
    pub async fn available(&self) -> u64 {
        let mut state = self.state.write().await;
        self.refill(&mut state);
        state.current.floor() as u64
    }

    /// 桶已补满且空闲超过 `idle`，可回收
    pub async fn is_idle(&self, idle: Duration) -> bool {
        let mut state = self.state.write().await;
        self.refill(&mut state);
        state.current >= self.capacity && state.last_used.elapsed() >= idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_bucket_acquire() {
        let bucket = TokenBucket::new(10, 0.0);

        // 应该能获取 5 个令牌
        assert!(bucket.try_acquire(5).await);
        assert_eq!(bucket.available().await, 5);

        assert!(bucket.try_acquire(5).await);
        assert_eq!(bucket.available().await, 0);

        // 不应该能获取更多令牌
        assert!(!bucket.try_acquire(1).await);
    }

    #[tokio::test]
    async fn test_token_bucket_refill() {
        let bucket = TokenBucket::new(10, 100.0); // 每秒补充 100 个

        assert!(bucket.try_acquire(10).await);
        assert!(!bucket.try_acquire(5).await);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(bucket.try_acquire(5).await);

        // 不超过容量
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(bucket.available().await, 10);
    }

    #[tokio::test]
    async fn test_per_window_and_idle() {
        let bucket = TokenBucket::per_window(3, Duration::from_millis(300));
        for _ in 0..3 {
            assert!(bucket.try_acquire(1).await);
        }
        assert!(!bucket.try_acquire(1).await);
        assert!(!bucket.is_idle(Duration::from_millis(50)).await);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(bucket.is_idle(Duration::from_millis(50)).await);
        assert!(bucket.try_acquire(1).await);
    }
}
