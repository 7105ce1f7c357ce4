//! 控制指令编解码
//!
//! 私有控制主题上的每一帧都是一个 JSON 对象：
//!
//! ```json
//! {"command": "move", "metadata": {"x": -0.4, "y": 0.7}}
//! {"command": "arm_in"}
//! {"command": "switch_state", "metadata": {"state": "roaming"}}
//! {"command": "set_ai_active", "metadata": {"active": true}}
//! ```
//!
//! 编码前先做范围校验，失败时不产生任何负载（调用方因此不会发出半帧）。
//! 解码对任何不认识的内容都返回错误，由上层决定丢弃。

use crate::{Axis, ProtocolError, validate_axis};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;

const TAG_MOVE: &str = "move";
const TAG_ARM_IN: &str = "arm_in";
const TAG_ARM_OUT: &str = "arm_out";
const TAG_ARM_STOP: &str = "arm_stop";
const TAG_ARM_RESET_POSITION: &str = "arm_reset_position";
const TAG_ARM_SAVE_POSITION: &str = "arm_set_position";
const TAG_SWITCH_STATE: &str = "switch_state";
const TAG_SET_AI_ACTIVE: &str = "set_ai_active";

/// 机器人控制器状态（`switch_state` 的目标）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerState {
    /// 抓取模式
    Grabbing,
    /// 自主漫游模式
    Roaming,
    /// 指令模式（手动或 AI 下发指令）
    Commands,
}

impl ControllerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerState::Grabbing => "grabbing",
            ControllerState::Roaming => "roaming",
            ControllerState::Commands => "commands",
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ControllerState {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "grabbing" => Ok(ControllerState::Grabbing),
            "roaming" => Ok(ControllerState::Roaming),
            "commands" => Ok(ControllerState::Commands),
            other => Err(ProtocolError::InvalidMetadata {
                command: TAG_SWITCH_STATE,
                reason: format!("unknown state `{}`", other),
            }),
        }
    }
}

/// 控制指令
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RobotCommand {
    /// 移动向量，两个分量都必须在 [-1, 1]
    Move { x: f64, y: f64 },
    ArmIn,
    ArmOut,
    ArmStop,
    ArmResetPosition,
    ArmSavePosition,
    /// 切换机器人控制器状态
    SwitchState { target: ControllerState },
    /// 开关 AI 控制
    SetAiEnabled { active: bool },
}

impl RobotCommand {
    /// 线上的 `command` 标签
    pub fn tag(&self) -> &'static str {
        match self {
            RobotCommand::Move { .. } => TAG_MOVE,
            RobotCommand::ArmIn => TAG_ARM_IN,
            RobotCommand::ArmOut => TAG_ARM_OUT,
            RobotCommand::ArmStop => TAG_ARM_STOP,
            RobotCommand::ArmResetPosition => TAG_ARM_RESET_POSITION,
            RobotCommand::ArmSavePosition => TAG_ARM_SAVE_POSITION,
            RobotCommand::SwitchState { .. } => TAG_SWITCH_STATE,
            RobotCommand::SetAiEnabled { .. } => TAG_SET_AI_ACTIVE,
        }
    }

    /// 校验数值范围（目前只有 `Move` 需要）
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if let RobotCommand::Move { x, y } = *self {
            validate_axis(Axis::X, x)?;
            validate_axis(Axis::Y, y)?;
        }
        Ok(())
    }

    fn metadata(&self) -> Option<Value> {
        match *self {
            RobotCommand::Move { x, y } => Some(json!(MoveMetadata { x, y })),
            RobotCommand::SwitchState { target } => {
                Some(json!(SwitchStateMetadata { state: target }))
            },
            RobotCommand::SetAiEnabled { active } => Some(json!(AiActiveMetadata { active })),
            _ => None,
        }
    }
}

/// 线上帧
#[derive(Debug, Serialize)]
struct WireFrame<'a> {
    command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MoveMetadata {
    x: f64,
    y: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct SwitchStateMetadata {
    state: ControllerState,
}

#[derive(Debug, Serialize, Deserialize)]
struct AiActiveMetadata {
    active: bool,
}

/// 编码指令
///
/// 先校验再序列化：越界的 `Move` 直接返回 `AxisOutOfRange`。
pub fn encode_command(command: &RobotCommand) -> Result<String, ProtocolError> {
    command.validate()?;

    let frame = WireFrame {
        command: command.tag(),
        metadata: command.metadata(),
    };
    Ok(serde_json::to_string(&frame)?)
}

/// 解码指令
///
/// 要求：顶层为对象、`command` 为已知标签、需要元数据的标签带有 `metadata` 对象。
/// 无元数据的指令会忽略多余的 `metadata` 字段。
pub fn decode_command(payload: &[u8]) -> Result<RobotCommand, ProtocolError> {
    let value: Value = serde_json::from_slice(payload)?;
    let Value::Object(object) = value else {
        return Err(ProtocolError::NotAnObject);
    };

    let tag = object
        .get("command")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingCommand)?;

    match tag {
        TAG_MOVE => {
            let meta: MoveMetadata = metadata_of(&object, TAG_MOVE)?;
            let command = RobotCommand::Move {
                x: meta.x,
                y: meta.y,
            };
            command.validate().map_err(|e| ProtocolError::InvalidMetadata {
                command: TAG_MOVE,
                reason: e.to_string(),
            })?;
            Ok(command)
        },
        TAG_ARM_IN => Ok(RobotCommand::ArmIn),
        TAG_ARM_OUT => Ok(RobotCommand::ArmOut),
        TAG_ARM_STOP => Ok(RobotCommand::ArmStop),
        TAG_ARM_RESET_POSITION => Ok(RobotCommand::ArmResetPosition),
        TAG_ARM_SAVE_POSITION => Ok(RobotCommand::ArmSavePosition),
        TAG_SWITCH_STATE => {
            let meta: SwitchStateMetadata = metadata_of(&object, TAG_SWITCH_STATE)?;
            Ok(RobotCommand::SwitchState { target: meta.state })
        },
        TAG_SET_AI_ACTIVE => {
            let meta: AiActiveMetadata = metadata_of(&object, TAG_SET_AI_ACTIVE)?;
            Ok(RobotCommand::SetAiEnabled {
                active: meta.active,
            })
        },
        other => Err(ProtocolError::UnknownCommand(other.to_string())),
    }
}

fn metadata_of<T: for<'de> Deserialize<'de>>(
    object: &Map<String, Value>,
    command: &'static str,
) -> Result<T, ProtocolError> {
    let meta = match object.get("metadata") {
        Some(meta @ Value::Object(_)) => meta.clone(),
        _ => return Err(ProtocolError::MissingMetadata { command }),
    };
    serde_json::from_value(meta).map_err(|e| ProtocolError::InvalidMetadata {
        command,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Value {
        serde_json::from_str(s).unwrap()
    }

    #[test]
    fn test_encode_move() {
        let json = encode_command(&RobotCommand::Move { x: -0.4, y: 0.7 }).unwrap();
        assert_eq!(
            parse(&json),
            json!({"command": "move", "metadata": {"x": -0.4, "y": 0.7}})
        );
    }

    #[test]
    fn test_encode_arm_commands_have_no_metadata() {
        for (cmd, tag) in [
            (RobotCommand::ArmIn, "arm_in"),
            (RobotCommand::ArmOut, "arm_out"),
            (RobotCommand::ArmStop, "arm_stop"),
            (RobotCommand::ArmResetPosition, "arm_reset_position"),
            (RobotCommand::ArmSavePosition, "arm_set_position"),
        ] {
            let json = encode_command(&cmd).unwrap();
            assert_eq!(parse(&json), json!({ "command": tag }));
        }
    }

    #[test]
    fn test_encode_switch_state_and_ai() {
        let json = encode_command(&RobotCommand::SwitchState {
            target: ControllerState::Roaming,
        })
        .unwrap();
        assert_eq!(
            parse(&json),
            json!({"command": "switch_state", "metadata": {"state": "roaming"}})
        );

        let json = encode_command(&RobotCommand::SetAiEnabled { active: true }).unwrap();
        assert_eq!(
            parse(&json),
            json!({"command": "set_ai_active", "metadata": {"active": true}})
        );
    }

    #[test]
    fn test_encode_rejects_out_of_range_move() {
        match encode_command(&RobotCommand::Move { x: 1.5, y: 0.0 }) {
            Err(ProtocolError::AxisOutOfRange { axis, value }) => {
                assert_eq!(axis, Axis::X);
                assert_eq!(value, 1.5);
            },
            other => panic!("Expected AxisOutOfRange, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_known_commands() {
        assert_eq!(
            decode_command(br#"{"command":"move","metadata":{"x":1,"y":-0.5}}"#).unwrap(),
            RobotCommand::Move { x: 1.0, y: -0.5 }
        );
        assert_eq!(
            decode_command(br#"{"command":"arm_stop"}"#).unwrap(),
            RobotCommand::ArmStop
        );
        assert_eq!(
            decode_command(br#"{"command":"arm_in","metadata":{}}"#).unwrap(),
            RobotCommand::ArmIn
        );
        assert_eq!(
            decode_command(br#"{"command":"switch_state","metadata":{"state":"grabbing"}}"#)
                .unwrap(),
            RobotCommand::SwitchState {
                target: ControllerState::Grabbing
            }
        );
        assert_eq!(
            decode_command(br#"{"command":"set_ai_active","metadata":{"active":false}}"#)
                .unwrap(),
            RobotCommand::SetAiEnabled { active: false }
        );
    }

    #[test]
    fn test_decode_rejects_malformed_payloads() {
        assert!(matches!(
            decode_command(b"not json"),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            decode_command(b"[1, 2]"),
            Err(ProtocolError::NotAnObject)
        ));
        assert!(matches!(
            decode_command(br#"{"metadata":{}}"#),
            Err(ProtocolError::MissingCommand)
        ));
        assert!(matches!(
            decode_command(br#"{"command":"dance"}"#),
            Err(ProtocolError::UnknownCommand(tag)) if tag == "dance"
        ));
        assert!(matches!(
            decode_command(br#"{"command":"move"}"#),
            Err(ProtocolError::MissingMetadata { command: "move" })
        ));
        assert!(matches!(
            decode_command(br#"{"command":"move","metadata":[0,0]}"#),
            Err(ProtocolError::MissingMetadata { command: "move" })
        ));
        assert!(matches!(
            decode_command(br#"{"command":"move","metadata":{"x":"fast","y":0}}"#),
            Err(ProtocolError::InvalidMetadata { command: "move", .. })
        ));
        assert!(matches!(
            decode_command(br#"{"command":"move","metadata":{"x":2,"y":0}}"#),
            Err(ProtocolError::InvalidMetadata { command: "move", .. })
        ));
        assert!(matches!(
            decode_command(br#"{"command":"switch_state","metadata":{"state":"dancing"}}"#),
            Err(ProtocolError::InvalidMetadata {
                command: "switch_state",
                ..
            })
        ));
    }

    #[test]
    fn test_controller_state_from_str() {
        assert_eq!(
            "roaming".parse::<ControllerState>().unwrap(),
            ControllerState::Roaming
        );
        assert!("flying".parse::<ControllerState>().is_err());
    }
}
