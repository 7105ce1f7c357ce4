//! 驱动层模块
//!
//! 控制器与机器人之间的控制会话，包括：
//! - 会话握手（`init_con` / `con_ok` / `close_con`，握手超时）
//! - 生命周期状态机（`Disconnected → Connecting → Connected`）
//! - 控制状态跟踪（去重、快照派生）
//! - 单调度线程（`select!` 同时等待请求、总线事件与握手截止时间）
//! - 观察者与运行指标
//!
//! # 使用场景
//!
//! 大多数用户应该通过 `rover-sdk` 使用本模块，它额外提供日志初始化与 prelude。

mod builder;
pub mod config;
mod controller;
mod dispatcher;
mod error;
pub mod lifecycle;
pub mod metrics;
pub mod observer;
pub mod session;
pub mod tracker;

pub use builder::ControllerBuilder;
pub use config::SessionConfig;
pub use controller::{Controller, PendingConnect};
pub use error::SessionError;
pub use lifecycle::{AtomicLinkState, LifecycleEvent, LinkState};
pub use metrics::{ControllerMetrics, MetricsSnapshot};
pub use observer::{
    ControlChannel, ControlObserver, LifecycleChannel, LifecycleObserver, ObserverRegistry,
};
pub use session::{HandshakeStep, Session, SessionInfo, SessionPhase};
pub use tracker::{
    ArmAction, ArmPosture, CommandSink, ControlSnapshot, ControlTracker, Direction,
    MovementVector, TrackerOutcome,
};
