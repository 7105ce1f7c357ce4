//! Rover SDK - 移动机器人遥操作 Rust SDK
//!
//! 控制台通过发布/订阅消息总线与一台机器人建立控制会话，并驱动其执行机构。
//!
//! # 架构设计
//!
//! 本 SDK 采用分层架构，从底层到高层：
//!
//! - **协议层** (`protocol`): 连接主题报文与 JSON 指令编解码
//! - **总线层** (`bus`): 传输抽象、MQTT 后端、进程内 mock broker
//! - **驱动层** (`driver`): 握手、生命周期状态机、控制状态跟踪、调度线程
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use rover_sdk::prelude::*;
//!
//! rover_sdk::init_logger();
//!
//! let controller = ControllerBuilder::new().build()?;
//! controller.connect(Endpoint::new("192.168.137.1", 1883))?;
//! controller.update_movement(0.0, 0.8)?;
//! controller.dispatch_arm_action(ArmAction::Out)?;
//! # Ok::<(), SessionError>(())
//! ```

pub use rover_bus as bus;
pub use rover_driver as driver;
pub use rover_protocol as protocol;

mod logging;
pub mod prelude;

pub use logging::{init_logger, init_logger_with};

// --- 用户以此为界 ---
// 以下是通过 Facade Pattern 提供的公共 API

pub use bus::{BusError, Endpoint};
pub use driver::{
    ArmAction, ArmPosture, ControlSnapshot, Controller, ControllerBuilder, Direction,
    LifecycleEvent, LinkState, SessionConfig, SessionError, SessionInfo,
};
pub use protocol::{ControllerState, ProtocolError, RobotCommand};
