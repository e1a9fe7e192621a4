use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 设备类型（从 User-Agent 粗略判断，仅作展示）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
    Unknown,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Desktop => "desktop",
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
            DeviceType::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "desktop" => DeviceType::Desktop,
            "mobile" => DeviceType::Mobile,
            "tablet" => DeviceType::Tablet,
            _ => DeviceType::Unknown,
        }
    }
}

/// 设备信息（信息性字段，不参与在线判定）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub browser: String,
    pub os: String,
    pub device_type: DeviceType,
}

impl DeviceInfo {
    /// 从 User-Agent 字符串粗略识别浏览器/系统/设备类型
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_lowercase();

        let browser = if ua.contains("edg/") {
            "Edge"
        } else if ua.contains("chrome") {
            "Chrome"
        } else if ua.contains("firefox") {
            "Firefox"
        } else if ua.contains("safari") {
            "Safari"
        } else {
            "Unknown"
        };

        let os = if ua.contains("android") {
            "Android"
        } else if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ios") {
            "iOS"
        } else if ua.contains("windows") {
            "Windows"
        } else if ua.contains("mac os") || ua.contains("macos") {
            "macOS"
        } else if ua.contains("linux") {
            "Linux"
        } else {
            "Unknown"
        };

        let device_type = if ua.contains("ipad") || ua.contains("tablet") {
            DeviceType::Tablet
        } else if ua.contains("mobile") || ua.contains("iphone") || ua.contains("android") {
            DeviceType::Mobile
        } else if browser == "Unknown" && os == "Unknown" {
            DeviceType::Unknown
        } else {
            DeviceType::Desktop
        };

        Self {
            browser: browser.to_string(),
            os: os.to_string(),
            device_type,
        }
    }
}

/// 在线跟踪会话：每个浏览器标签/设备一条，进程生命周期内生成一次 session_id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceSession {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub device_info: DeviceInfo,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl PresenceSession {
    pub fn new(user_id: Uuid, device_info: DeviceInfo) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            session_id: Uuid::new_v4(),
            device_info,
            started_at: now,
            last_heartbeat: now,
        }
    }
}

/// 用户在线状态（持久化列的读取视图）
///
/// is_online 是最终一致的：反映最后一次心跳/track，不代表真实存活。
/// 崩溃的客户端在过期清扫把它标记下线之前会一直显示在线。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserOnlineStatus {
    pub user_id: Uuid,
    pub is_online: bool,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl UserOnlineStatus {
    /// 无记录用户的默认离线状态
    pub fn offline(user_id: Uuid) -> Self {
        Self {
            user_id,
            is_online: false,
            last_activity_at: None,
            last_seen: None,
        }
    }
}
