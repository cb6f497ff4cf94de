//! 会话事件
//! 会话不可恢复时通知上层跳转到登录入口

use tokio::sync::broadcast;

/// 会话事件类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// 登录成功
    LoggedIn { username: String },
    /// 令牌已刷新
    Refreshed,
    /// 会话失效，凭证已清除，应跳转到 `login_path`
    Expired { login_path: String, reason: String },
    /// 主动登出
    LoggedOut,
}

impl SessionEvent {
    /// 获取事件类型名称
    pub fn event_type(&self) -> &str {
        match self {
            SessionEvent::LoggedIn { .. } => "logged_in",
            SessionEvent::Refreshed => "refreshed",
            SessionEvent::Expired { .. } => "expired",
            SessionEvent::LoggedOut => "logged_out",
        }
    }
}

/// 会话事件总线
#[derive(Debug, Clone)]
pub struct SessionEvents {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// 发布事件；没有订阅者时直接丢弃
    pub fn publish(&self, event: SessionEvent) {
        let event_type = event.event_type().to_string();
        if self.sender.send(event).is_err() {
            tracing::trace!(event = %event_type, "No session event subscribers");
        }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new(16)
    }
}
