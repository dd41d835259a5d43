use crate::event::Event;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// 采集循环向广播器投递事件的有界通道
///
/// `publish` 从不等待：通道满时丢弃事件并计数。
#[derive(Clone)]
pub struct EventPublisher {
    sender: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
}

pub type EventReceiver = mpsc::Receiver<Event>;

pub fn event_channel(capacity: usize) -> (EventPublisher, EventReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        EventPublisher {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        receiver,
    )
}

impl EventPublisher {
    pub fn publish(&self, event: impl Into<Event>) -> bool {
        match self.sender.try_send(event.into()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                // 只在 2 的幂次时记日志，避免刷屏
                if dropped.is_power_of_two() {
                    warn!(
                        message_type = event.message_type(),
                        dropped,
                        "Event channel full, dropping event"
                    );
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// 因通道满而丢弃的事件数
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
