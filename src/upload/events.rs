use tokio::sync::broadcast;
use super::types::UploadEvent;

/// Fire-and-forget fan-out of upload events.
///
/// 注意：
/// - 没有订阅者时事件直接丢弃
/// - 如果接收速度跟不上发送速度，可能会丢失事件（lagged error）
/// - 新订阅者收不到之前的事件
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<UploadEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: UploadEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.tx.subscribe()
    }

    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredEventReceiver<F>
    where
        F: Fn(&UploadEvent) -> bool,
    {
        FilteredEventReceiver {
            receiver: self.tx.subscribe(),
            filter,
        }
    }
}

/// 过滤的事件接收器
pub struct FilteredEventReceiver<F> {
    receiver: broadcast::Receiver<UploadEvent>,
    filter: F,
}

impl<F> FilteredEventReceiver<F>
where
    F: Fn(&UploadEvent) -> bool,
{
    pub async fn recv(&mut self) -> Result<UploadEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if (self.filter)(&event) {
                return Ok(event);
            }
        }
    }
}
