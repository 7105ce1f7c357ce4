//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use rover_sdk::prelude::*;
//! ```

// 控制器
pub use crate::driver::{Controller, ControllerBuilder, PendingConnect, SessionConfig};

// 观察者
pub use crate::driver::{
    ControlChannel, ControlObserver, LifecycleChannel, LifecycleEvent, LifecycleObserver,
};

// 控制状态
pub use crate::driver::{ArmAction, ArmPosture, ControlSnapshot, Direction, LinkState};
pub use crate::protocol::ControllerState;

// 总线
pub use crate::bus::{Endpoint, TransportFactory};

// 错误类型
pub use crate::bus::BusError;
pub use crate::driver::SessionError;
pub use crate::protocol::ProtocolError;
