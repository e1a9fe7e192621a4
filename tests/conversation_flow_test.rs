//! 会话生命周期与消息收发的集成测试（内存仓库）

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use fuzochat::error::ChatError;
use fuzochat::infra::ChangeHub;
use fuzochat::model::{ConversationStatus, Message, SharedItem, UserProfile};
use fuzochat::repository::{
    MemoryConversationRepository, MemoryMessageRepository, MemoryUserRepository,
    MessageRepository,
};
use fuzochat::service::{ConversationService, UserService};

struct TestEnv {
    service: ConversationService,
    users: Arc<MemoryUserRepository>,
    messages: Arc<MemoryMessageRepository>,
}

fn setup() -> TestEnv {
    let conversations = Arc::new(MemoryConversationRepository::new());
    let messages = Arc::new(MemoryMessageRepository::new());
    let users = Arc::new(MemoryUserRepository::new());
    let hub = Arc::new(ChangeHub::default());

    TestEnv {
        service: ConversationService::new(
            conversations,
            Arc::clone(&messages) as Arc<dyn MessageRepository>,
            users.clone(),
            hub,
        ),
        users,
        messages,
    }
}

async fn seed_profiles(env: &TestEnv, a: Uuid, b: Uuid) {
    env.users
        .insert_profile(UserProfile::new(a, "Ana", "ana"))
        .await;
    env.users
        .insert_profile(UserProfile::new(b, "Ben", "ben"))
        .await;
}

#[tokio::test]
async fn test_canonical_pairing_and_idempotent_creation() {
    let env = setup();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    let first = env
        .service
        .get_or_create_conversation(a, b, false)
        .await
        .expect("创建失败");
    // 参数顺序相反也解析到同一行
    let second = env
        .service
        .get_or_create_conversation(b, a, false)
        .await
        .expect("获取失败");

    assert_eq!(first.conversation_id, second.conversation_id);
    // 第二次调用不改变状态
    assert_eq!(second.status, ConversationStatus::Pending);
    assert!(second.accepted_at.is_none());
    assert_eq!(second.initiator_id, a);
}

#[tokio::test]
async fn test_status_transition_closure() {
    let env = setup();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    // 非好友创建 -> pending
    let conv = env
        .service
        .get_or_create_conversation(a, b, false)
        .await
        .expect("创建失败");
    assert_eq!(conv.status, ConversationStatus::Pending);
    assert!(conv.accepted_at.is_none());

    // 接受 -> active，accepted_at 非空
    let accepted = env
        .service
        .accept_message_request(conv.conversation_id)
        .await
        .expect("接受失败");
    assert_eq!(accepted.status, ConversationStatus::Active);
    assert!(accepted.accepted_at.is_some());

    // 另一对用户走拒绝：pending -> declined，终态
    let c = Uuid::new_v4();
    let conv2 = env
        .service
        .get_or_create_conversation(a, c, false)
        .await
        .expect("创建失败");
    let declined = env
        .service
        .decline_message_request(conv2.conversation_id)
        .await
        .expect("拒绝失败");
    assert_eq!(declined.status, ConversationStatus::Declined);

    // declined 之后没有任何操作能把它带出终态
    assert!(env
        .service
        .accept_message_request(conv2.conversation_id)
        .await
        .is_err());
    let still_declined = env
        .service
        .decline_message_request(conv2.conversation_id)
        .await
        .expect("重复拒绝应当幂等");
    assert_eq!(still_declined.status, ConversationStatus::Declined);
}

#[tokio::test]
async fn test_unread_accounting() {
    let env = setup();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    seed_profiles(&env, a, b).await;

    let conv = env
        .service
        .get_or_create_conversation(a, b, true)
        .await
        .expect("创建失败");

    // B 发 3 条，A 视角未读 3
    for i in 0..3 {
        env.service
            .send_message(conv.conversation_id, b, format!("msg {}", i))
            .await
            .expect("发送失败");
    }

    let list = env.service.fetch_conversations(a).await.expect("拉取失败");
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].unread_count, 3);
    // 发送方自己的视角没有未读
    let list_b = env.service.fetch_conversations(b).await.expect("拉取失败");
    assert_eq!(list_b[0].unread_count, 0);

    // 标记已读 -> 0
    let affected = env
        .service
        .mark_as_read(conv.conversation_id, a)
        .await
        .expect("已读失败");
    assert_eq!(affected, 3);
    let list = env.service.fetch_conversations(a).await.expect("拉取失败");
    assert_eq!(list[0].unread_count, 0);

    // 重复标记没有额外效果（幂等）
    let affected = env
        .service
        .mark_as_read(conv.conversation_id, a)
        .await
        .expect("已读失败");
    assert_eq!(affected, 0);
}

#[tokio::test]
async fn test_pending_requests_never_counted_as_unread() {
    let env = setup();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    seed_profiles(&env, a, b).await;

    let conv = env
        .service
        .get_or_create_conversation(a, b, false)
        .await
        .expect("创建失败");
    env.service
        .send_message(conv.conversation_id, a, "hello?".to_string())
        .await
        .expect("发送失败");
    env.service
        .send_message(conv.conversation_id, a, "anyone there?".to_string())
        .await
        .expect("发送失败");

    // 请求列表里的 unread_count 恒为 0，即使消息行确实存在
    let pending = env
        .service
        .fetch_pending_requests(b)
        .await
        .expect("拉取失败");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].unread_count, 0);
    assert!(pending[0].last_message.is_some());

    // 全局未读计数把 pending 会话也算进去
    let total = env.service.get_unread_count(b).await.expect("计数失败");
    assert_eq!(total, 2);
}

#[tokio::test]
async fn test_message_ordering_and_cursor_pagination() {
    let env = setup();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    let conv = env
        .service
        .get_or_create_conversation(a, b, true)
        .await
        .expect("创建失败");

    // 120 条消息，时间戳严格递增
    let base = Utc::now() - ChronoDuration::hours(1);
    for i in 0..120i64 {
        let mut message = Message::new_text(conv.conversation_id, a, format!("m{}", i));
        message.created_at = base + ChronoDuration::seconds(i);
        env.messages.insert(&message).await.expect("写入失败");
    }

    // 第一页：最近 50 条，升序返回
    let page1 = env
        .service
        .fetch_messages(conv.conversation_id, Some(50), None)
        .await
        .expect("拉取失败");
    assert_eq!(page1.len(), 50);
    assert_eq!(page1.first().unwrap().content.as_deref(), Some("m70"));
    assert_eq!(page1.last().unwrap().content.as_deref(), Some("m119"));
    assert!(page1.windows(2).all(|w| w[0].created_at < w[1].created_at));

    // 以第一页最旧一条为游标翻上一页：严格更早、无重叠、无空洞
    let cursor = page1.first().unwrap().created_at;
    let page2 = env
        .service
        .fetch_messages(conv.conversation_id, Some(50), Some(cursor))
        .await
        .expect("拉取失败");
    assert_eq!(page2.len(), 50);
    assert_eq!(page2.first().unwrap().content.as_deref(), Some("m20"));
    assert_eq!(page2.last().unwrap().content.as_deref(), Some("m69"));
    assert!(page2.last().unwrap().created_at < cursor);
}

#[tokio::test]
async fn test_message_request_flow_end_to_end() {
    let env = setup();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    seed_profiles(&env, a, b).await;

    // A、B 不是好友
    let user_service = UserService::new(env.users.clone());
    let is_friend = user_service.are_friends(a, b).await.expect("查询失败");
    assert!(!is_friend);

    let conv = env
        .service
        .get_or_create_conversation(a, b, is_friend)
        .await
        .expect("创建失败");
    assert_eq!(conv.status, ConversationStatus::Pending);

    env.service
        .send_message(conv.conversation_id, a, "hi".to_string())
        .await
        .expect("发送失败");

    // B 的请求列表里能看到，带最近一条消息
    let pending = env
        .service
        .fetch_pending_requests(b)
        .await
        .expect("拉取失败");
    assert_eq!(pending.len(), 1);
    assert_eq!(
        pending[0].last_message.as_ref().unwrap().content.as_deref(),
        Some("hi")
    );
    assert_eq!(pending[0].other_user.username, "ana");
    // 接受前不出现在会话列表里
    assert!(env
        .service
        .fetch_conversations(b)
        .await
        .expect("拉取失败")
        .is_empty());

    // B 接受后移入会话列表
    let accepted = env
        .service
        .accept_message_request(conv.conversation_id)
        .await
        .expect("接受失败");
    assert_eq!(accepted.status, ConversationStatus::Active);

    let conversations = env.service.fetch_conversations(b).await.expect("拉取失败");
    assert_eq!(conversations.len(), 1);
    assert_eq!(
        conversations[0].conversation.conversation_id,
        conv.conversation_id
    );
    assert!(env
        .service
        .fetch_pending_requests(b)
        .await
        .expect("拉取失败")
        .is_empty());
}

#[tokio::test]
async fn test_friends_skip_request_flow() {
    let env = setup();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    seed_profiles(&env, a, b).await;
    env.users.set_friends(a, b).await;

    let user_service = UserService::new(env.users.clone());
    let is_friend = user_service.are_friends(a, b).await.expect("查询失败");
    let conv = env
        .service
        .get_or_create_conversation(a, b, is_friend)
        .await
        .expect("创建失败");

    // 好友之间直接 active，无需接受步骤
    assert_eq!(conv.status, ConversationStatus::Active);
    assert!(conv.accepted_at.is_some());

    for user in [a, b] {
        let list = env
            .service
            .fetch_conversations(user)
            .await
            .expect("拉取失败");
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].conversation.conversation_id, conv.conversation_id);
    }
}

#[tokio::test]
async fn test_share_item_with_caption() {
    let env = setup();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    seed_profiles(&env, a, b).await;

    let conv = env
        .service
        .get_or_create_conversation(a, b, true)
        .await
        .expect("创建失败");

    let item = SharedItem::Restaurant {
        id: "rest-7".to_string(),
        title: "Golden Wok".to_string(),
        image_url: Some("https://img.example/wok.jpg".to_string()),
        subtitle: Some("Szechuan".to_string()),
        cuisine: Some("sichuan".to_string()),
        rating: Some(4.5),
    };
    let message = env
        .service
        .share_item(conv.conversation_id, a, item.clone(), Some("lunch?".to_string()))
        .await
        .expect("分享失败");

    // 分享项和文字说明共存
    assert_eq!(message.shared_item.as_ref().unwrap().kind(), "restaurant");
    assert_eq!(message.content.as_deref(), Some("lunch?"));

    let fetched = env
        .service
        .fetch_messages(conv.conversation_id, None, None)
        .await
        .expect("拉取失败");
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].shared_item, Some(item));
}

#[tokio::test]
async fn test_conversation_list_sorted_by_recency() {
    let env = setup();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let c = Uuid::new_v4();
    seed_profiles(&env, a, b).await;
    env.users
        .insert_profile(UserProfile::new(c, "Cam", "cam"))
        .await;

    let conv_ab = env
        .service
        .get_or_create_conversation(a, b, true)
        .await
        .expect("创建失败");
    let conv_ac = env
        .service
        .get_or_create_conversation(a, c, true)
        .await
        .expect("创建失败");

    env.service
        .send_message(conv_ac.conversation_id, c, "first".to_string())
        .await
        .expect("发送失败");
    env.service
        .send_message(conv_ab.conversation_id, b, "second".to_string())
        .await
        .expect("发送失败");

    // 最近有消息的排前面
    let list = env.service.fetch_conversations(a).await.expect("拉取失败");
    assert_eq!(list.len(), 2);
    assert_eq!(
        list[0].conversation.conversation_id,
        conv_ab.conversation_id
    );
    assert_eq!(
        list[1].conversation.conversation_id,
        conv_ac.conversation_id
    );
}

#[tokio::test]
async fn test_delete_conversation_cascades_messages() {
    let env = setup();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    let conv = env
        .service
        .get_or_create_conversation(a, b, true)
        .await
        .expect("创建失败");
    env.service
        .send_message(conv.conversation_id, a, "bye".to_string())
        .await
        .expect("发送失败");

    env.service
        .delete_conversation(conv.conversation_id)
        .await
        .expect("删除失败");

    let err = env
        .service
        .send_message(conv.conversation_id, a, "ghost".to_string())
        .await
        .expect_err("会话已删除");
    assert!(matches!(err, ChatError::ConversationNotFound(_)));
    assert!(env
        .service
        .fetch_messages(conv.conversation_id, None, None)
        .await
        .expect("拉取失败")
        .is_empty());
}
