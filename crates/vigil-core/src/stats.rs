use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// 定时统计推送的数据来源
///
/// 每个来源的结果放在统计报文中以 `name()` 为键的字段下。
#[async_trait]
pub trait StatisticsSource: Send + Sync {
    fn name(&self) -> &str;

    async fn collect(&self) -> Result<Value>;
}
