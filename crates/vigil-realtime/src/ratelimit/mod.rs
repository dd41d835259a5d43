// 令牌桶限流：连接建立频率、单连接上行报文频率
pub mod limiter;
pub mod token_bucket;

pub use limiter::RateLimiter;
pub use token_bucket::TokenBucket;
