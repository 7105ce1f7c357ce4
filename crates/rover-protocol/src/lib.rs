//! # Rover Protocol
//!
//! 控制总线协议定义（无传输层依赖）
//!
//! ## 模块
//!
//! - `constants`: 主题名称、报文前缀、轴范围常量
//! - `connect`: 共享连接主题上的握手报文（`init_con` / `con_ok` / `close_con`）
//! - `command`: 私有控制主题上的 JSON 指令编解码
//!
//! ## 报文格式
//!
//! 连接主题使用纯文本 `前缀:标识符[:标识符]`，控制主题使用 JSON 对象
//! `{"command": <tag>, "metadata": {...}}`，`metadata` 按指令可选。

pub mod command;
pub mod connect;
pub mod constants;

// 重新导出常用类型
pub use command::{ControllerState, RobotCommand, decode_command, encode_command};
pub use connect::ConnectMessage;
pub use constants::*;

use thiserror::Error;

/// 移动向量的坐标轴
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Axis::X => write!(f, "x"),
            Axis::Y => write!(f, "y"),
        }
    }
}

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// 移动分量超出 [-1, 1]
    #[error("The {axis} axis value must be in range [-1, 1], {value} given")]
    AxisOutOfRange { axis: Axis, value: f64 },

    #[error("Payload is not a JSON object")]
    NotAnObject,

    #[error("Payload has no string `command` field")]
    MissingCommand,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Command `{command}` requires a metadata object")]
    MissingMetadata { command: &'static str },

    #[error("Invalid metadata for `{command}`: {reason}")]
    InvalidMetadata {
        command: &'static str,
        reason: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid connect message: {0}")]
    InvalidConnectMessage(String),
}

/// 校验单个轴分量
///
/// NaN 不在任何区间内，因此同样被拒绝。
pub fn validate_axis(axis: Axis, value: f64) -> Result<(), ProtocolError> {
    if (AXIS_MIN..=AXIS_MAX).contains(&value) {
        Ok(())
    } else {
        Err(ProtocolError::AxisOutOfRange { axis, value })
    }
}
