//! Prometheus 指标：消息发送量、通知量、心跳与过期清扫等
//!
//! 通过 `init()` 安装全局 Recorder；sweeper 二进制可改用
//! `init_with_http_listener()` 直接暴露抓取端点。

use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use std::sync::OnceLock;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// 指标名称
const COUNTER_MESSAGES_SENT: &str = "fuzochat_messages_sent_total";
const COUNTER_ITEMS_SHARED: &str = "fuzochat_items_shared_total";
const COUNTER_NOTIFICATIONS: &str = "fuzochat_notifications_emitted_total";
const COUNTER_NOTIFICATIONS_DEDUPED: &str = "fuzochat_notifications_deduped_total";
const COUNTER_HEARTBEATS: &str = "fuzochat_presence_heartbeats_total";
const COUNTER_STALE_SWEPT: &str = "fuzochat_presence_stale_swept_total";
const COUNTER_STREAM_LAGGED: &str = "fuzochat_change_stream_lagged_total";
const GAUGE_LIVE_SESSIONS: &str = "fuzochat_presence_live_sessions";

/// 初始化 Prometheus 指标（安装全局 Recorder，返回 Handle 用于文本渲染）。
/// 仅需在进程内调用一次；重复调用会返回 Err。
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
    HANDLE
        .set(handle)
        .map_err(|_| "metrics already initialized")?;
    Ok(())
}

/// 初始化并在指定端口暴露 HTTP 抓取端点（需要在 tokio 运行时内调用）
pub fn init_with_http_listener(
    port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    Ok(())
}

/// 是否已初始化
pub fn is_initialized() -> bool {
    HANDLE.get().is_some()
}

/// 渲染当前指标为 Prometheus 文本格式
pub fn render_metrics() -> Option<String> {
    HANDLE.get().map(|h| h.render())
}

/// 记录发送消息数 +1
pub fn record_message_sent() {
    metrics::counter!(COUNTER_MESSAGES_SENT).increment(1);
}

/// 记录分享消息数 +1
pub fn record_item_shared(kind: &str) {
    metrics::counter!(COUNTER_ITEMS_SHARED, "kind" => kind.to_string()).increment(1);
}

/// 记录发出的通知数 +1
pub fn record_notification_emitted() {
    metrics::counter!(COUNTER_NOTIFICATIONS).increment(1);
}

/// 记录被去重拦下的通知数 +1
pub fn record_notification_deduped() {
    metrics::counter!(COUNTER_NOTIFICATIONS_DEDUPED).increment(1);
}

/// 记录一次在线心跳
pub fn record_heartbeat() {
    metrics::counter!(COUNTER_HEARTBEATS).increment(1);
}

/// 记录过期清扫标记下线的会话数
pub fn record_stale_swept(count: u64) {
    metrics::counter!(COUNTER_STALE_SWEPT).increment(count);
}

/// 记录变更流接收端落后的事件数
pub fn record_stream_lagged(count: u64) {
    metrics::counter!(COUNTER_STREAM_LAGGED).increment(count);
}

/// 更新当前活跃在线会话数（Gauge）
pub fn record_live_sessions(count: u64) {
    metrics::gauge!(GAUGE_LIVE_SESSIONS).set(count as f64);
}
