//! 会话生命周期状态
//!
//! `Disconnected → Connecting → Connected → Disconnected`。状态由调度线程独占写入，
//! 其他线程通过 [`AtomicLinkState`] 无锁读取。

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// 链路状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[repr(u8)]
pub enum LinkState {
    /// 初始状态
    #[default]
    Disconnected = 0,
    /// 握手进行中
    Connecting = 1,
    /// 已与对端建立会话
    Connected = 2,
}

impl LinkState {
    /// 是否允许迁移到 `next`
    ///
    /// 同状态迁移不合法；任何失败或断开都回到 `Disconnected`。
    pub fn can_transition_to(self, next: LinkState) -> bool {
        use LinkState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
        )
    }

    /// 从 u8 转换，无效值视为 `Disconnected`
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    /// 面向操作员的状态文本
    pub fn status_text(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.status_text())
    }
}

/// 链路状态（原子版本，用于线程间共享）
#[derive(Debug, Default)]
pub struct AtomicLinkState {
    inner: AtomicU8,
}

impl AtomicLinkState {
    pub fn new(state: LinkState) -> Self {
        Self {
            inner: AtomicU8::new(state.as_u8()),
        }
    }

    pub fn get(&self) -> LinkState {
        LinkState::from_u8(self.inner.load(Ordering::Acquire))
    }

    /// 设置状态并返回旧值
    pub fn swap(&self, state: LinkState) -> LinkState {
        LinkState::from_u8(self.inner.swap(state.as_u8(), Ordering::AcqRel))
    }
}

/// 生命周期通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// 开始连接（`Disconnected → Connecting`）
    Connecting,
    /// 握手完成
    Connected { client_id: String, peer_id: String },
    /// 连接尝试失败（超时、传输错误、被替换或取消）
    Failed(String),
    /// 已建立的会话意外结束（对端 `close_con` 或本地传输断线）
    Lost,
    /// 操作员主动断开
    ClosedByUser,
}

impl LifecycleEvent {
    /// 事件发生后的链路状态
    pub fn resulting_state(&self) -> LinkState {
        match self {
            LifecycleEvent::Connecting => LinkState::Connecting,
            LifecycleEvent::Connected { .. } => LinkState::Connected,
            LifecycleEvent::Failed(_) | LifecycleEvent::Lost | LifecycleEvent::ClosedByUser => {
                LinkState::Disconnected
            },
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::Connecting => write!(f, "connecting"),
            LifecycleEvent::Connected { client_id, peer_id } => {
                write!(f, "connected ({} <-> {})", client_id, peer_id)
            },
            LifecycleEvent::Failed(reason) => write!(f, "connect failed: {}", reason),
            LifecycleEvent::Lost => write!(f, "connection lost"),
            LifecycleEvent::ClosedByUser => write!(f, "closed by user"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use LinkState::*;
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connecting.can_transition_to(Disconnected));
        assert!(Connected.can_transition_to(Disconnected));

        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Connected.can_transition_to(Connected));
        assert!(!Disconnected.can_transition_to(Disconnected));
    }

    #[test]
    fn test_u8_roundtrip() {
        for state in [LinkState::Disconnected, LinkState::Connecting, LinkState::Connected] {
            assert_eq!(LinkState::from_u8(state.as_u8()), state);
        }
        assert_eq!(LinkState::from_u8(200), LinkState::Disconnected);
    }

    #[test]
    fn test_atomic_swap() {
        let state = AtomicLinkState::default();
        assert_eq!(state.get(), LinkState::Disconnected);
        assert_eq!(state.swap(LinkState::Connecting), LinkState::Disconnected);
        assert_eq!(state.get(), LinkState::Connecting);
    }

    #[test]
    fn test_event_resulting_state() {
        assert_eq!(LifecycleEvent::Lost.resulting_state(), LinkState::Disconnected);
        assert_eq!(
            LifecycleEvent::Connected {
                client_id: "a".into(),
                peer_id: "b".into()
            }
            .resulting_state(),
            LinkState::Connected
        );
        assert_eq!(LifecycleEvent::Failed("x".into()).to_string(), "connect failed: x");
    }
}
