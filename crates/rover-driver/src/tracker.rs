//! 控制状态跟踪
//!
//! 记录本地已知的执行状态（移动向量、机械臂姿态），对重复指令去重，
//! 并在每次变化时派生新的 [`ControlSnapshot`]。
//!
//! 跟踪器本身不做 I/O：发布通过 [`CommandSink`] 完成，由调度线程传入当前会话。
//!
//! 本端订阅了自己的控制主题，发布的每条指令都会回显。已发布但尚未回显的指令
//! 按发布顺序记录，回显到达时直接消费，不覆盖本地状态。

use crate::error::SessionError;
use rover_protocol::{ControllerState, RobotCommand};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;

/// 指令发布接口
pub trait CommandSink {
    fn publish_command(&mut self, command: &RobotCommand) -> Result<(), SessionError>;
}

/// 移动向量，两个分量均在 `[-1, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MovementVector {
    pub x: f64,
    pub y: f64,
}

impl MovementVector {
    pub const ZERO: MovementVector = MovementVector { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// 机械臂姿态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum ArmPosture {
    Up,
    Down,
    #[default]
    Neutral,
}

impl fmt::Display for ArmPosture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArmPosture::Up => write!(f, "up"),
            ArmPosture::Down => write!(f, "down"),
            ArmPosture::Neutral => write!(f, "neutral"),
        }
    }
}

/// 操作员的机械臂意图
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArmAction {
    In,
    Out,
    /// 保留动作，不产生任何指令
    Grab,
    Reset,
    Save,
    Stop,
}

impl ArmAction {
    /// 对应的指令与姿态；`Grab` 无映射
    pub fn command(self) -> Option<(RobotCommand, ArmPosture)> {
        match self {
            ArmAction::Stop => Some((RobotCommand::ArmStop, ArmPosture::Neutral)),
            ArmAction::In => Some((RobotCommand::ArmIn, ArmPosture::Up)),
            ArmAction::Out => Some((RobotCommand::ArmOut, ArmPosture::Down)),
            ArmAction::Reset => Some((RobotCommand::ArmResetPosition, ArmPosture::Neutral)),
            ArmAction::Save => Some((RobotCommand::ArmSavePosition, ArmPosture::Neutral)),
            ArmAction::Grab => None,
        }
    }
}

impl FromStr for ArmAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "in" => Ok(ArmAction::In),
            "out" => Ok(ArmAction::Out),
            "grab" => Ok(ArmAction::Grab),
            "reset" => Ok(ArmAction::Reset),
            "save" => Ok(ArmAction::Save),
            "stop" => Ok(ArmAction::Stop),
            other => Err(format!("unknown arm action: {}", other)),
        }
    }
}

/// 快照中的方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    Forward,
    Backward,
    Left,
    Right,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
            Direction::Left => "left",
            Direction::Right => "right",
        };
        f.write_str(name)
    }
}

/// 面向观察者的控制状态快照（不可变）
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ControlSnapshot {
    /// 方向 → 幅值（正数）；每个轴最多一项，分量为 0 时不出现
    pub directions: BTreeMap<Direction, f64>,
    pub arm_posture: ArmPosture,
}

impl ControlSnapshot {
    /// 由移动向量与姿态派生快照（纯函数）
    pub fn derive(vector: MovementVector, arm_posture: ArmPosture) -> Self {
        let mut directions = BTreeMap::new();
        if vector.x < 0.0 {
            directions.insert(Direction::Left, vector.x.abs());
        } else if vector.x > 0.0 {
            directions.insert(Direction::Right, vector.x);
        }
        if vector.y < 0.0 {
            directions.insert(Direction::Backward, vector.y.abs());
        } else if vector.y > 0.0 {
            directions.insert(Direction::Forward, vector.y);
        }
        Self {
            directions,
            arm_posture,
        }
    }

    pub fn magnitude(&self, direction: Direction) -> Option<f64> {
        self.directions.get(&direction).copied()
    }

    pub fn is_idle(&self) -> bool {
        self.directions.is_empty()
    }
}

impl fmt::Display for ControlSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "arm={}", self.arm_posture)?;
        for (direction, magnitude) in &self.directions {
            write!(f, " {}={:.2}", direction, magnitude)?;
        }
        Ok(())
    }
}

/// 一次本地操作的结果
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerOutcome {
    /// 已发布且状态变化，附带新快照
    Published(ControlSnapshot),
    /// 已发布，不影响跟踪状态
    Sent,
    /// 与已记录状态相同，未发布
    Deduplicated,
    /// 定义为空操作的动作
    Ignored,
}

impl TrackerOutcome {
    pub fn snapshot(&self) -> Option<&ControlSnapshot> {
        match self {
            TrackerOutcome::Published(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    pub fn was_published(&self) -> bool {
        matches!(self, TrackerOutcome::Published(_) | TrackerOutcome::Sent)
    }
}

/// 等待回显的指令上限，超出时丢弃最早的记录
const MAX_PENDING_ECHOES: usize = 64;

/// 控制状态跟踪器
#[derive(Debug, Default)]
pub struct ControlTracker {
    vector: MovementVector,
    posture: ArmPosture,
    last_action: Option<ArmAction>,
    pending_echoes: VecDeque<RobotCommand>,
}

impl ControlTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vector(&self) -> MovementVector {
        self.vector
    }

    pub fn posture(&self) -> ArmPosture {
        self.posture
    }

    pub fn last_action(&self) -> Option<ArmAction> {
        self.last_action
    }

    pub fn snapshot(&self) -> ControlSnapshot {
        ControlSnapshot::derive(self.vector, self.posture)
    }

    /// 已发布但尚未收到回显的指令数
    pub fn pending_echoes(&self) -> usize {
        self.pending_echoes.len()
    }

    fn publish(
        &mut self,
        sink: &mut dyn CommandSink,
        command: RobotCommand,
    ) -> Result<(), SessionError> {
        sink.publish_command(&command)?;
        if self.pending_echoes.len() == MAX_PENDING_ECHOES {
            self.pending_echoes.pop_front();
        }
        self.pending_echoes.push_back(command);
        Ok(())
    }

    /// 入站指令是否为本端发布的回显；是则消费它以及之前丢失回显的记录
    fn consume_echo(&mut self, command: &RobotCommand) -> bool {
        match self.pending_echoes.iter().position(|pending| pending == command) {
            Some(index) => {
                self.pending_echoes.drain(..=index);
                true
            },
            None => false,
        }
    }

    /// 新会话开始时清空状态
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// 更新移动向量
    ///
    /// 与已记录向量完全相等时不发布；否则先校验范围再发布，发布成功后才记录。
    pub fn update_movement(
        &mut self,
        sink: &mut dyn CommandSink,
        x: f64,
        y: f64,
    ) -> Result<TrackerOutcome, SessionError> {
        let next = MovementVector::new(x, y);
        if next == self.vector {
            return Ok(TrackerOutcome::Deduplicated);
        }
        let command = RobotCommand::Move { x, y };
        command.validate()?;
        self.publish(sink, command)?;
        self.vector = next;
        Ok(TrackerOutcome::Published(self.snapshot()))
    }

    /// 下发机械臂动作，与上一次下发的动作相同时不发布
    pub fn dispatch_arm_action(
        &mut self,
        sink: &mut dyn CommandSink,
        action: ArmAction,
    ) -> Result<TrackerOutcome, SessionError> {
        if self.last_action == Some(action) {
            return Ok(TrackerOutcome::Deduplicated);
        }
        let Some((command, posture)) = action.command() else {
            return Ok(TrackerOutcome::Ignored);
        };
        self.publish(sink, command)?;
        self.last_action = Some(action);
        self.posture = posture;
        Ok(TrackerOutcome::Published(self.snapshot()))
    }

    /// 开关 AI 控制，总是发布
    pub fn set_ai_enabled(
        &mut self,
        sink: &mut dyn CommandSink,
        active: bool,
    ) -> Result<TrackerOutcome, SessionError> {
        self.publish(sink, RobotCommand::SetAiEnabled { active })?;
        Ok(TrackerOutcome::Sent)
    }

    /// 切换机器人控制器状态；状态切换总是让机器人停下，本地向量同步归零
    pub fn switch_state(
        &mut self,
        sink: &mut dyn CommandSink,
        target: ControllerState,
    ) -> Result<TrackerOutcome, SessionError> {
        self.publish(sink, RobotCommand::SwitchState { target })?;
        self.vector = MovementVector::ZERO;
        Ok(TrackerOutcome::Published(self.snapshot()))
    }

    /// 应用控制主题上的入站状态，状态发生变更时返回新快照
    ///
    /// 本端指令的回显只被消费，不改变状态。
    pub fn handle_control_message(&mut self, command: &RobotCommand) -> Option<ControlSnapshot> {
        if self.consume_echo(command) {
            return None;
        }
        match *command {
            RobotCommand::Move { x, y } => self.vector = MovementVector::new(x, y),
            RobotCommand::ArmIn => self.posture = ArmPosture::Up,
            RobotCommand::ArmOut => self.posture = ArmPosture::Down,
            RobotCommand::ArmStop => self.posture = ArmPosture::Neutral,
            RobotCommand::SwitchState { .. } => self.vector = MovementVector::ZERO,
            RobotCommand::ArmResetPosition
            | RobotCommand::ArmSavePosition
            | RobotCommand::SetAiEnabled { .. } => return None,
        }
        Some(self.snapshot())
    }
}
