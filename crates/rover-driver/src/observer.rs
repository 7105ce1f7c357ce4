//! 观察者系统
//!
//! 调度线程在控制状态变化和生命周期事件发生时通知已注册的观察者。
//!
//! 回调在调度线程上同步执行，必须非阻塞：需要耗时处理时使用
//! [`ControlChannel`] / [`LifecycleChannel`]，在其他线程上消费。
//!
//! 通知期间不持有注册表锁，回调内可以调用 `Controller::observe_*`；
//! 但不能调用 `connect`、`update_movement` 等需要调度线程回复的操作，
//! 调度线程会等待自己而死锁。
//!
//! ```rust
//! use rover_driver::observer::{LifecycleChannel, LifecycleObserver, ObserverRegistry};
//! use rover_driver::LifecycleEvent;
//! use std::sync::Arc;
//!
//! let mut registry = ObserverRegistry::new();
//! let (observer, rx) = LifecycleChannel::new();
//! registry.add_lifecycle(Arc::new(observer));
//!
//! registry.notify_lifecycle(&LifecycleEvent::Connecting);
//! assert_eq!(rx.try_recv().unwrap(), LifecycleEvent::Connecting);
//! ```

use crate::lifecycle::LifecycleEvent;
use crate::tracker::ControlSnapshot;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::sync::Arc;

/// 控制状态观察者
pub trait ControlObserver: Send + Sync {
    fn on_control_state_change(&self, snapshot: &ControlSnapshot);
}

/// 生命周期观察者
pub trait LifecycleObserver: Send + Sync {
    fn on_lifecycle_event(&self, event: &LifecycleEvent);
}

impl<F> ControlObserver for F
where
    F: Fn(&ControlSnapshot) + Send + Sync,
{
    fn on_control_state_change(&self, snapshot: &ControlSnapshot) {
        self(snapshot)
    }
}

impl<F> LifecycleObserver for F
where
    F: Fn(&LifecycleEvent) + Send + Sync,
{
    fn on_lifecycle_event(&self, event: &LifecycleEvent) {
        self(event)
    }
}

/// 基于 channel 的控制状态观察者
pub struct ControlChannel {
    tx: Sender<ControlSnapshot>,
}

impl ControlChannel {
    pub fn new() -> (Self, Receiver<ControlSnapshot>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl ControlObserver for ControlChannel {
    fn on_control_state_change(&self, snapshot: &ControlSnapshot) {
        // 接收端已丢弃时静默忽略
        let _ = self.tx.try_send(snapshot.clone());
    }
}

/// 基于 channel 的生命周期观察者
pub struct LifecycleChannel {
    tx: Sender<LifecycleEvent>,
}

impl LifecycleChannel {
    pub fn new() -> (Self, Receiver<LifecycleEvent>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl LifecycleObserver for LifecycleChannel {
    fn on_lifecycle_event(&self, event: &LifecycleEvent) {
        let _ = self.tx.try_send(event.clone());
    }
}

/// 观察者注册表
///
/// 本身不是线程安全的，由外部 `RwLock` 保护。克隆只复制 `Arc`。
#[derive(Default, Clone)]
pub struct ObserverRegistry {
    control: Vec<Arc<dyn ControlObserver>>,
    lifecycle: Vec<Arc<dyn LifecycleObserver>>,
}

impl ObserverRegistry {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            control: Vec::new(),
            lifecycle: Vec::new(),
        }
    }

    pub fn add_control(&mut self, observer: Arc<dyn ControlObserver>) {
        self.control.push(observer);
    }

    pub fn add_lifecycle(&mut self, observer: Arc<dyn LifecycleObserver>) {
        self.lifecycle.push(observer);
    }

    pub fn notify_control(&self, snapshot: &ControlSnapshot) {
        for observer in &self.control {
            observer.on_control_state_change(snapshot);
        }
    }

    pub fn notify_lifecycle(&self, event: &LifecycleEvent) {
        for observer in &self.lifecycle {
            observer.on_lifecycle_event(event);
        }
    }

    pub fn clear(&mut self) {
        self.control.clear();
        self.lifecycle.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.control.len() + self.lifecycle.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{ArmPosture, MovementVector};
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_registry_notifies_all() {
        let mut registry = ObserverRegistry::new();
        assert!(registry.is_empty());

        let count = Arc::new(AtomicU64::new(0));
        let counter = count.clone();
        registry.add_control(Arc::new(move |_: &ControlSnapshot| {
            counter.fetch_add(1, Ordering::Relaxed);
        }));
        let (channel, rx) = ControlChannel::new();
        registry.add_control(Arc::new(channel));
        assert_eq!(registry.len(), 2);

        let snapshot = ControlSnapshot::derive(MovementVector::new(0.5, 0.0), ArmPosture::Up);
        registry.notify_control(&snapshot);

        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(rx.try_recv().unwrap(), snapshot);
    }

    #[test]
    fn test_dropped_receiver_is_harmless() {
        let mut registry = ObserverRegistry::new();
        let (channel, rx) = LifecycleChannel::new();
        registry.add_lifecycle(Arc::new(channel));
        drop(rx);
        registry.notify_lifecycle(&LifecycleEvent::Lost);
    }

    #[test]
    fn test_clear() {
        let mut registry = ObserverRegistry::new();
        let (channel, _rx) = LifecycleChannel::new();
        registry.add_lifecycle(Arc::new(channel));
        registry.clear();
        assert!(registry.is_empty());
    }
}
