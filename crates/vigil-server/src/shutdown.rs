use std::future::Future;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// 关闭信号类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM
    Term,
    /// SIGINT / Ctrl+C
    Interrupt,
    /// 手动触发（测试、内部故障）
    Manual,
}

/// 把系统信号广播给所有后台任务
#[derive(Clone)]
pub struct SignalHandler {
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
}

impl SignalHandler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self { shutdown_tx }
    }

    /// 等待 SIGTERM / SIGINT 并广播；信号处理器安装失败时按 Ctrl+C 处理
    #[cfg(unix)]
    pub async fn wait_for_system_signal(&self) -> ShutdownSignal {
        use signal::unix::{signal, SignalKind};

        let signals = signal(SignalKind::terminate())
            .and_then(|term| signal(SignalKind::interrupt()).map(|int| (term, int)));
        let received = match signals {
            Ok((mut sigterm, mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => ShutdownSignal::Term,
                    _ = sigint.recv() => ShutdownSignal::Interrupt,
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install unix signal handlers, falling back to Ctrl+C");
                wait_ctrl_c().await
            }
        };
        info!(signal = ?received, "Shutdown signal received");
        self.trigger(received);
        received
    }

    #[cfg(not(unix))]
    pub async fn wait_for_system_signal(&self) -> ShutdownSignal {
        let received = wait_ctrl_c().await;
        info!(signal = ?received, "Shutdown signal received");
        self.trigger(received);
        received
    }

    pub fn trigger(&self, signal: ShutdownSignal) {
        let _ = self.shutdown_tx.send(signal);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }

    /// 供后台任务 `select!` 的关闭 future
    ///
    /// 订阅在调用时建立，之后触发的信号一定能收到。
    pub fn signalled(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.subscribe();
        async move {
            // Lagged 或 Closed 也视为关闭
            let _ = rx.recv().await;
        }
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_ctrl_c() -> ShutdownSignal {
    match signal::ctrl_c().await {
        Ok(()) => ShutdownSignal::Interrupt,
        Err(e) => {
            // 无法监听信号时不能阻塞退出路径，只能等手动触发
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
            ShutdownSignal::Manual
        }
    }
}
