//! 实时订阅、聊天状态容器与通知桥的集成测试

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use fuzochat::error::ChatError;
use fuzochat::infra::{
    ChangeHub, HandshakeMode, MessageCallback, SubscriptionManager,
};
use fuzochat::model::{Message, UserProfile};
use fuzochat::repository::{
    MemoryConversationRepository, MemoryMessageRepository, MemoryUserRepository,
};
use fuzochat::service::{AlertCallback, ChatAlert, ConversationService, NotificationBridge};
use fuzochat::session::ChatStore;

struct TestEnv {
    hub: Arc<ChangeHub>,
    users: Arc<MemoryUserRepository>,
    service: Arc<ConversationService>,
    manager: Arc<SubscriptionManager>,
}

fn setup() -> TestEnv {
    let hub = Arc::new(ChangeHub::default());
    let conversations = Arc::new(MemoryConversationRepository::new());
    let messages = Arc::new(MemoryMessageRepository::new());
    let users = Arc::new(MemoryUserRepository::new());

    let service = Arc::new(ConversationService::new(
        conversations.clone(),
        messages,
        users.clone(),
        hub.clone(),
    ));
    let manager = Arc::new(SubscriptionManager::new(
        hub.clone(),
        conversations,
        Duration::from_millis(500),
    ));

    TestEnv {
        hub,
        users,
        service,
        manager,
    }
}

fn message_collector() -> (MessageCallback, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let cb: MessageCallback = Arc::new(move |message: Message| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(message);
        })
    });
    (cb, rx)
}

async fn wait_until(mut cond: impl FnMut() -> bool, millis: u64) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(millis);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

#[tokio::test]
async fn test_sender_sees_own_message_via_realtime_path() {
    let env = setup();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    let conv = env
        .service
        .get_or_create_conversation(a, b, true)
        .await
        .expect("创建失败");

    let store = Arc::new(ChatStore::new(env.service.clone(), env.manager.clone()));
    let sub = store
        .subscribe_to_conversation(conv.conversation_id)
        .await
        .expect("订阅失败");
    assert_eq!(store.active_conversation(), Some(conv.conversation_id));

    // 发送方不直接写本地，消息经实时订阅回流
    store
        .send_message(conv.conversation_id, a, "hello from me".to_string())
        .await
        .expect("发送失败");

    let arrived = wait_until(
        || {
            store
                .messages_for(conv.conversation_id)
                .iter()
                .any(|m| m.content.as_deref() == Some("hello from me"))
        },
        500,
    )
    .await;
    assert!(arrived, "消息应当经订阅路径回到发送方本地状态");

    sub.unsubscribe();
}

#[tokio::test]
async fn test_user_level_subscription_filters_foreign_conversations() {
    let env = setup();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let stranger1 = Uuid::new_v4();
    let stranger2 = Uuid::new_v4();

    let mine = env
        .service
        .get_or_create_conversation(a, b, true)
        .await
        .expect("创建失败");
    let foreign = env
        .service
        .get_or_create_conversation(stranger1, stranger2, true)
        .await
        .expect("创建失败");

    let (cb, mut rx) = message_collector();
    let sub = env
        .manager
        .subscribe_to_user_messages(a, cb)
        .await
        .expect("订阅失败");

    // 别人的会话消息不会投递给 A
    env.service
        .send_message(foreign.conversation_id, stranger1, "not for you".to_string())
        .await
        .expect("发送失败");
    // A 参与的会话消息会投递
    env.service
        .send_message(mine.conversation_id, b, "for you".to_string())
        .await
        .expect("发送失败");

    let got = tokio::time::timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("等待超时")
        .expect("通道关闭");
    assert_eq!(got.content.as_deref(), Some("for you"));
    // 再无第二条
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());

    sub.unsubscribe();
}

#[tokio::test]
async fn test_overlapping_subscriptions_produce_single_alert() {
    let env = setup();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    env.users
        .insert_profile(UserProfile::new(a, "Ana", "ana"))
        .await;

    let conv = env
        .service
        .get_or_create_conversation(a, b, true)
        .await
        .expect("创建失败");

    let alerts: Arc<Mutex<Vec<ChatAlert>>> = Arc::new(Mutex::new(Vec::new()));
    let alerts_ref = Arc::clone(&alerts);
    let on_alert: AlertCallback = Arc::new(move |alert| {
        alerts_ref.lock().push(alert);
    });
    let bridge = Arc::new(NotificationBridge::new(b, env.users.clone(), on_alert));

    // 同一条消息经两路订阅重复到达通知桥
    let sub1 = env
        .manager
        .subscribe_to_user_messages(b, bridge.message_callback())
        .await
        .expect("订阅失败");
    let sub2 = env
        .manager
        .subscribe_to_messages(conv.conversation_id, bridge.message_callback())
        .await
        .expect("订阅失败");

    env.service
        .send_message(conv.conversation_id, a, "ping".to_string())
        .await
        .expect("发送失败");

    let settled = wait_until(|| !alerts.lock().is_empty(), 500).await;
    assert!(settled);
    tokio::time::sleep(Duration::from_millis(150)).await;

    // 至多一次用户可见提醒
    let alerts = alerts.lock();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].conversation_id, conv.conversation_id);
    assert_eq!(alerts[0].sender.username, "ana");
    assert_eq!(alerts[0].preview, "ping");

    drop(alerts);
    sub1.unsubscribe();
    sub2.unsubscribe();
}

#[tokio::test]
async fn test_subscribe_handshake_timeout_and_error() {
    let env = setup();
    let conv = env
        .service
        .get_or_create_conversation(Uuid::new_v4(), Uuid::new_v4(), true)
        .await
        .expect("创建失败");

    // 握手卡死 -> 有界超时
    env.hub.set_handshake_mode(HandshakeMode::Stalled);
    let manager = Arc::new(SubscriptionManager::new(
        env.hub.clone(),
        Arc::new(MemoryConversationRepository::new()),
        Duration::from_millis(50),
    ));
    let (cb, _rx) = message_collector();
    let err = manager
        .subscribe_to_messages(conv.conversation_id, cb)
        .await
        .expect_err("应当超时");
    assert!(matches!(err, ChatError::Timeout(_)));

    // 握手失败 -> 订阅错误
    env.hub.set_handshake_mode(HandshakeMode::Failing);
    let (cb, _rx) = message_collector();
    let err = manager
        .subscribe_to_messages(conv.conversation_id, cb)
        .await
        .expect_err("应当失败");
    assert!(matches!(err, ChatError::Subscription(_)));

    // 恢复正常后订阅成功
    env.hub.set_handshake_mode(HandshakeMode::Normal);
    let (cb, _rx) = message_collector();
    let sub = manager
        .subscribe_to_messages(conv.conversation_id, cb)
        .await
        .expect("订阅失败");
    sub.unsubscribe();
}

#[tokio::test]
async fn test_conversation_updates_trigger_store_refresh() {
    let env = setup();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    env.users
        .insert_profile(UserProfile::new(a, "Ana", "ana"))
        .await;
    env.users
        .insert_profile(UserProfile::new(b, "Ben", "ben"))
        .await;

    let conv = env
        .service
        .get_or_create_conversation(a, b, true)
        .await
        .expect("创建失败");

    let store = Arc::new(ChatStore::new(env.service.clone(), env.manager.clone()));
    store.load_conversations(a).await;
    assert_eq!(store.conversations().len(), 1);
    assert_eq!(store.conversations()[0].unread_count, 0);

    let sub = store
        .subscribe_to_conversation_updates(a)
        .await
        .expect("订阅失败");

    // B 发消息 -> 会话表 update 事件 -> store 自动重拉，未读数变化
    env.service
        .send_message(conv.conversation_id, b, "refresh me".to_string())
        .await
        .expect("发送失败");

    let refreshed = wait_until(
        || {
            store
                .conversations()
                .first()
                .map(|summary| summary.unread_count == 1)
                .unwrap_or(false)
        },
        500,
    )
    .await;
    assert!(refreshed, "会话列表应当在变更事件后自动刷新");

    sub.unsubscribe();
}

#[tokio::test]
async fn test_store_mark_as_read_defers_badge_reset() {
    let env = setup();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    env.users
        .insert_profile(UserProfile::new(a, "Ana", "ana"))
        .await;
    env.users
        .insert_profile(UserProfile::new(b, "Ben", "ben"))
        .await;

    let conv = env
        .service
        .get_or_create_conversation(a, b, true)
        .await
        .expect("创建失败");
    env.service
        .send_message(conv.conversation_id, b, "unread".to_string())
        .await
        .expect("发送失败");

    let store = Arc::new(ChatStore::new(env.service.clone(), env.manager.clone()));
    store.load_conversations(a).await;
    assert_eq!(store.conversations()[0].unread_count, 1);

    // mark_as_read 不乐观清零本地角标
    store
        .mark_as_read(conv.conversation_id, a)
        .await
        .expect("已读失败");
    assert_eq!(store.conversations()[0].unread_count, 1);

    // 下一次加载才看到归零
    store.load_conversations(a).await;
    assert_eq!(store.conversations()[0].unread_count, 0);
}
