//! 驱动层错误类型定义

use rover_bus::BusError;
use rover_protocol::ProtocolError;
use std::time::Duration;
use thiserror::Error;

/// 会话错误类型
///
/// 意外断线与畸形报文不会以 `Err` 形式出现：前者是
/// [`LifecycleEvent::Lost`](crate::LifecycleEvent::Lost) 通知，后者计入指标后丢弃。
#[derive(Error, Debug)]
pub enum SessionError {
    /// 传输层错误（连接、订阅、发布失败）
    #[error("Transport failure: {0}")]
    Transport(#[from] BusError),

    /// 超时前未收到对端的 `con_ok`
    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// 指令校验失败（未产生任何总线 I/O）
    #[error("Validation error: {0}")]
    Validation(#[from] ProtocolError),

    /// 当前没有已建立的会话
    #[error("Not connected")]
    NotConnected,

    /// 连接尝试被更新的连接请求替换
    #[error("Connect attempt superseded by a newer one")]
    Superseded,

    /// 连接尝试被操作员取消
    #[error("Connect attempt cancelled")]
    Cancelled,

    /// 未配置传输工厂
    #[error("No transport factory configured")]
    MissingTransport,

    /// 调度线程已退出
    #[error("Dispatcher thread stopped")]
    DispatcherStopped,
}

impl SessionError {
    /// 是否为需要操作员修正输入的错误
    pub fn is_validation(&self) -> bool {
        matches!(self, SessionError::Validation(_))
    }
}
