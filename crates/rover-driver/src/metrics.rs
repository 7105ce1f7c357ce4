//! 控制器运行指标
//!
//! 原子计数器，由调度线程更新，任何线程都可以无锁读取。

use std::sync::atomic::{AtomicU64, Ordering};

/// 控制器实时指标
///
/// ```rust
/// use rover_driver::ControllerMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = ControllerMetrics::new();
/// metrics.frames_published.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(metrics.snapshot().frames_published, 1);
/// ```
#[derive(Debug, Default)]
pub struct ControllerMetrics {
    /// 控制主题上发布的指令数
    pub frames_published: AtomicU64,

    /// 因与已记录状态相同而未发布的指令数
    pub commands_deduplicated: AtomicU64,

    /// 控制主题上收到的报文数（包括畸形报文）
    pub frames_received: AtomicU64,

    /// 无法解码、已丢弃的报文数
    pub malformed_frames: AtomicU64,

    /// 发起的握手次数
    pub handshakes_started: AtomicU64,

    /// 成功完成的握手次数
    pub handshakes_completed: AtomicU64,

    /// 握手超时次数
    pub handshake_timeouts: AtomicU64,

    /// 已建立会话的意外断开次数
    pub unclean_losses: AtomicU64,
}

impl ControllerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// 读取所有计数器的当前值
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_published: self.frames_published.load(Ordering::Relaxed),
            commands_deduplicated: self.commands_deduplicated.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            handshakes_started: self.handshakes_started.load(Ordering::Relaxed),
            handshakes_completed: self.handshakes_completed.load(Ordering::Relaxed),
            handshake_timeouts: self.handshake_timeouts.load(Ordering::Relaxed),
            unclean_losses: self.unclean_losses.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.frames_published.store(0, Ordering::Relaxed);
        self.commands_deduplicated.store(0, Ordering::Relaxed);
        self.frames_received.store(0, Ordering::Relaxed);
        self.malformed_frames.store(0, Ordering::Relaxed);
        self.handshakes_started.store(0, Ordering::Relaxed);
        self.handshakes_completed.store(0, Ordering::Relaxed);
        self.handshake_timeouts.store(0, Ordering::Relaxed);
        self.unclean_losses.store(0, Ordering::Relaxed);
    }
}

/// 指标快照（不可变）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub frames_published: u64,
    pub commands_deduplicated: u64,
    pub frames_received: u64,
    pub malformed_frames: u64,
    pub handshakes_started: u64,
    pub handshakes_completed: u64,
    pub handshake_timeouts: u64,
    pub unclean_losses: u64,
}

impl MetricsSnapshot {
    /// 畸形报文占比（百分比），未收到报文时为 0
    pub fn malformed_rate(&self) -> f64 {
        if self.frames_received == 0 {
            return 0.0;
        }
        (self.malformed_frames as f64 / self.frames_received as f64) * 100.0
    }

    /// 握手成功率（百分比），未发起握手时为 0
    pub fn handshake_success_rate(&self) -> f64 {
        if self.handshakes_started == 0 {
            return 0.0;
        }
        (self.handshakes_completed as f64 / self.handshakes_started as f64) * 100.0
    }
}
