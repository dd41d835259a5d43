use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// 下发给单个连接的数据
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// 已序列化的 JSON 文本，多个订阅者共享
    Text(Arc<str>),
    Close { code: u16, reason: String },
}

impl Outbound {
    pub fn text(json: impl Into<Arc<str>>) -> Self {
        Outbound::Text(json.into())
    }
}

/// 有界出站队列
///
/// 满时丢弃最旧的待发报文并计数，`push` 从不等待。
/// 关闭后仍会把已排队的报文（含关闭帧）交付完。
pub struct OutboundQueue {
    items: Mutex<VecDeque<Outbound>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity: capacity.max(1),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<Outbound>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 入队；返回 false 表示挤掉了一条旧报文或队列已关闭
    pub fn push(&self, item: Outbound) -> bool {
        if self.is_closed() {
            return false;
        }
        let evicted = {
            let mut items = self.items();
            let evicted = if items.len() >= self.capacity {
                items.pop_front();
                true
            } else {
                false
            };
            items.push_back(item);
            evicted
        };
        if evicted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        !evicted
    }

    /// 入队关闭帧并关闭队列，之后的 `push` 都被拒绝
    pub fn close_with(&self, code: u16, reason: impl Into<String>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.items().push_back(Outbound::Close {
            code,
            reason: reason.into(),
        });
        self.notify.notify_one();
    }

    pub fn try_pop(&self) -> Option<Outbound> {
        self.items().pop_front()
    }

    /// 等待下一条报文；队列关闭且已排空时返回 `None`
    pub async fn recv(&self) -> Option<Outbound> {
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
