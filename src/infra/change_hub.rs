use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::error::{ChatError, Result};
use crate::model::{Conversation, Message, UserOnlineStatus};

/// 行级变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// 变更负载（按表建模）
#[derive(Debug, Clone)]
pub enum ChangePayload {
    Message(Message),
    Conversation(Conversation),
    Presence(UserOnlineStatus),
}

/// 行级变更事件
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub payload: ChangePayload,
}

impl ChangeEvent {
    pub fn message_insert(message: Message) -> Self {
        Self {
            kind: ChangeKind::Insert,
            payload: ChangePayload::Message(message),
        }
    }

    pub fn conversation(kind: ChangeKind, conversation: Conversation) -> Self {
        Self {
            kind,
            payload: ChangePayload::Conversation(conversation),
        }
    }

    pub fn presence_update(status: UserOnlineStatus) -> Self {
        Self {
            kind: ChangeKind::Update,
            payload: ChangePayload::Presence(status),
        }
    }

    /// 事件所属的逻辑表名
    pub fn table(&self) -> &'static str {
        match self.payload {
            ChangePayload::Message(_) => "messages",
            ChangePayload::Conversation(_) => "conversations",
            ChangePayload::Presence(_) => "users",
        }
    }
}

/// 频道握手状态机：Subscribing -> Subscribed -> (ChannelError | Closed)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribing,
    Subscribed,
    ChannelError,
    Closed,
}

/// 握手行为（测试注入用；正常路径总是 Normal）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeMode {
    Normal,
    /// 停留在 Subscribing，不再推进（模拟握手卡死）
    Stalled,
    /// 直接进入 ChannelError（模拟握手失败）
    Failing,
}

/// 进程内变更流中心
///
/// 托管后端行级变更流的进程内形态：服务在写入提交后发布事件，
/// 订阅方以命名频道接入并自行过滤。消息的实时事件因此总是
/// 因果地晚于该消息的写入完成。
pub struct ChangeHub {
    sender: broadcast::Sender<ChangeEvent>,
    handshake: Mutex<HandshakeMode>,
}

impl ChangeHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            handshake: Mutex::new(HandshakeMode::Normal),
        }
    }

    /// 发布事件，返回当前接收者数量（无人订阅时为 0，不视为错误）
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let table = event.table();
        match self.sender.send(event) {
            Ok(receivers) => {
                debug!("📡 变更事件已发布: table={}, receivers={}", table, receivers);
                receivers
            }
            Err(_) => 0,
        }
    }

    /// 按频道名订阅变更流
    ///
    /// 频道名只用于去重与日志；过滤由订阅方任务完成。
    pub fn subscribe(&self, channel: &str) -> ChannelSubscription {
        let (status_tx, status_rx) = watch::channel(ChannelStatus::Subscribing);

        match *self.handshake.lock() {
            HandshakeMode::Normal => {
                let _ = status_tx.send(ChannelStatus::Subscribed);
            }
            HandshakeMode::Stalled => {}
            HandshakeMode::Failing => {
                let _ = status_tx.send(ChannelStatus::ChannelError);
            }
        }

        debug!("📡 打开频道: {}", channel);

        ChannelSubscription {
            channel: channel.to_string(),
            status: status_rx,
            events: self.sender.subscribe(),
            _status_tx: status_tx,
        }
    }

    /// 设置握手行为（仅测试使用）
    pub fn set_handshake_mode(&self, mode: HandshakeMode) {
        *self.handshake.lock() = mode;
    }
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// 一路频道订阅：握手状态 + 事件接收端
pub struct ChannelSubscription {
    pub channel: String,
    pub status: watch::Receiver<ChannelStatus>,
    pub events: broadcast::Receiver<ChangeEvent>,
    _status_tx: watch::Sender<ChannelStatus>,
}

impl ChannelSubscription {
    /// 等待握手确认，超时或失败时返回错误
    pub async fn wait_subscribed(&mut self, timeout: Duration) -> Result<()> {
        let channel = self.channel.clone();
        let wait = async {
            loop {
                match *self.status.borrow() {
                    ChannelStatus::Subscribed => return Ok(()),
                    ChannelStatus::ChannelError => {
                        return Err(ChatError::Subscription(format!(
                            "channel {} handshake failed",
                            channel
                        )));
                    }
                    ChannelStatus::Closed => {
                        return Err(ChatError::Subscription(format!(
                            "channel {} closed before confirmation",
                            channel
                        )));
                    }
                    ChannelStatus::Subscribing => {}
                }
                if self.status.changed().await.is_err() {
                    return Err(ChatError::Subscription(format!(
                        "channel {} status stream dropped",
                        channel
                    )));
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(ChatError::Timeout(format!(
                "channel {} confirmation timed out",
                self.channel
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Message;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let hub = ChangeHub::default();
        let mut sub = hub.subscribe("messages:test");
        sub.wait_subscribed(Duration::from_millis(100))
            .await
            .expect("握手失败");

        let msg = Message::new_text(Uuid::new_v4(), Uuid::new_v4(), "hello".to_string());
        assert_eq!(hub.publish(ChangeEvent::message_insert(msg.clone())), 1);

        let event = sub.events.recv().await.expect("接收失败");
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.table(), "messages");
        match event.payload {
            ChangePayload::Message(m) => assert_eq!(m.message_id, msg.message_id),
            _ => panic!("负载类型不符"),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let hub = ChangeHub::default();
        let msg = Message::new_text(Uuid::new_v4(), Uuid::new_v4(), "hi".to_string());
        // 无订阅者不报错
        assert_eq!(hub.publish(ChangeEvent::message_insert(msg)), 0);
    }

    #[tokio::test]
    async fn test_stalled_handshake_times_out() {
        let hub = ChangeHub::default();
        hub.set_handshake_mode(HandshakeMode::Stalled);

        let mut sub = hub.subscribe("messages:stalled");
        let err = sub
            .wait_subscribed(Duration::from_millis(50))
            .await
            .expect_err("应当超时");
        assert!(matches!(err, ChatError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_failing_handshake_rejects() {
        let hub = ChangeHub::default();
        hub.set_handshake_mode(HandshakeMode::Failing);

        let mut sub = hub.subscribe("messages:failing");
        let err = sub
            .wait_subscribed(Duration::from_millis(50))
            .await
            .expect_err("应当失败");
        assert!(matches!(err, ChatError::Subscription(_)));
    }
}
