//! 会话握手
//!
//! 一个 [`Session`] 对应一次连接尝试，从不复用：
//!
//! 1. 连接传输层并注册遗嘱 `close_con:<clientId>`（发布到连接主题）
//! 2. 订阅连接主题，发布 `init_con:<clientId>`，设置握手截止时间
//! 3. `AwaitingPeerAck` 期间收到单标识的 `con_ok:<peerId>`：清除截止时间，
//!    回复 `con_ok:<clientId>:<peerId>`，订阅私有控制主题，进入 `Established`
//!
//! 截止时间由调度线程的定时器消费，本模块不持有线程或定时器。

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::tracker::CommandSink;
use crossbeam_channel::Sender;
use rover_bus::{BusError, Endpoint, EventSink, LastWill, SessionEvent, Transport};
use rover_protocol::{ConnectMessage, RobotCommand, control_topic, encode_command};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// 会话阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    AwaitingPeerAck,
    Established,
    Closed,
}

/// 连接主题消息的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeStep {
    /// 握手完成
    Established { peer_id: String },
    /// 已建立的会话收到 `close_con`
    PeerClosed { client_id: String },
    /// 与当前阶段无关的消息
    Ignored,
}

/// 握手成功后交给操作员的会话信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub endpoint: Endpoint,
    pub client_id: String,
    pub peer_id: String,
    pub control_topic: String,
}

/// 一次协商的控制链路
pub struct Session {
    id: u64,
    endpoint: Endpoint,
    client_id: String,
    peer_id: Option<String>,
    phase: SessionPhase,
    deadline: Option<Instant>,
    control_topic: String,
    config: SessionConfig,
    transport: Box<dyn Transport>,
}

impl Session {
    /// 创建会话（`Idle`），不产生任何 I/O
    pub fn new(
        id: u64,
        endpoint: Endpoint,
        transport: Box<dyn Transport>,
        config: SessionConfig,
    ) -> Self {
        let client_id = transport.client_id().to_string();
        let control_topic = control_topic(&config.control_topic_base, &client_id);
        Self {
            id,
            endpoint,
            client_id,
            peer_id: None,
            phase: SessionPhase::Idle,
            deadline: None,
            control_topic,
            config,
            transport,
        }
    }

    /// 连接传输层并发起握手（`Idle → AwaitingPeerAck`）
    ///
    /// 传输层连接失败时立即返回错误，不设置截止时间。
    pub fn open(&mut self, events: Sender<SessionEvent>) -> Result<(), SessionError> {
        let last_will = LastWill::new(
            self.config.connect_topic.clone(),
            ConnectMessage::close_for(&self.client_id).encode(),
            self.config.qos,
        );
        self.transport
            .connect(last_will, EventSink::new(self.id, events))?;

        if let Err(e) = self.send_init() {
            self.phase = SessionPhase::Closed;
            if let Err(close_err) = self.transport.disconnect() {
                debug!("session {}: disconnect after failed init: {}", self.id, close_err);
            }
            return Err(e.into());
        }

        self.phase = SessionPhase::AwaitingPeerAck;
        self.deadline = Some(Instant::now() + self.config.handshake_timeout);
        debug!(
            "session {}: init_con sent as {}, waiting up to {:?}",
            self.id, self.client_id, self.config.handshake_timeout
        );
        Ok(())
    }

    fn send_init(&mut self) -> Result<(), BusError> {
        let topic = self.config.connect_topic.clone();
        self.transport.subscribe(&topic, self.config.qos)?;
        let init = ConnectMessage::InitCon {
            client_id: self.client_id.clone(),
        };
        self.publish_connect(&init)
    }

    fn publish_connect(&mut self, message: &ConnectMessage) -> Result<(), BusError> {
        let payload = message.encode();
        trace!("session {}: -> {}", self.id, payload);
        self.transport.publish(
            &self.config.connect_topic,
            payload.as_bytes(),
            self.config.qos,
            false,
        )
    }

    /// 处理连接主题上的消息
    ///
    /// `con_ok` 只在 `AwaitingPeerAck` 阶段生效；`close_con` 只在 `Established`
    /// 阶段生效，且只检查前缀。无法解析的消息记录后忽略。
    pub fn handle_connect_message(&mut self, payload: &str) -> Result<HandshakeStep, SessionError> {
        let message = match ConnectMessage::parse(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("session {}: ignoring connect message {:?}: {}", self.id, payload, e);
                return Ok(HandshakeStep::Ignored);
            },
        };

        match (self.phase, message) {
            (SessionPhase::AwaitingPeerAck, ConnectMessage::PeerOffer { peer_id }) => {
                self.complete_handshake(peer_id)
            },
            (SessionPhase::Established, ConnectMessage::CloseCon { client_id }) => {
                Ok(HandshakeStep::PeerClosed { client_id })
            },
            (phase, message) => {
                trace!("session {}: {:?} ignored in {:?}", self.id, message, phase);
                Ok(HandshakeStep::Ignored)
            },
        }
    }

    fn complete_handshake(&mut self, peer_id: String) -> Result<HandshakeStep, SessionError> {
        self.deadline = None;
        let ack = ConnectMessage::Ack {
            client_id: self.client_id.clone(),
            peer_id: peer_id.clone(),
        };
        self.publish_connect(&ack)?;
        let topic = self.control_topic.clone();
        self.transport.subscribe(&topic, self.config.qos)?;

        self.peer_id = Some(peer_id.clone());
        self.phase = SessionPhase::Established;
        debug!(
            "session {}: established {} <-> {}",
            self.id, self.client_id, peer_id
        );
        Ok(HandshakeStep::Established { peer_id })
    }

    /// 定时器到期
    ///
    /// 仅当仍在等待对端且截止时间已过时返回 `true` 并关闭会话；其他情况为空操作。
    pub fn on_timer(&mut self, now: Instant) -> bool {
        match (self.phase, self.deadline) {
            (SessionPhase::AwaitingPeerAck, Some(deadline)) if now >= deadline => {
                self.deadline = None;
                self.phase = SessionPhase::Closed;
                true
            },
            _ => false,
        }
    }

    /// 结束会话
    ///
    /// `announce` 为 `true` 时先在连接主题发布 `close_con:<clientId>`（与遗嘱相同），
    /// 再正常断开传输层。
    pub fn close(&mut self, announce: bool) {
        if announce && self.transport_usable() {
            let close = ConnectMessage::close_for(&self.client_id);
            if let Err(e) = self.publish_connect(&close) {
                warn!("session {}: failed to publish close_con: {}", self.id, e);
            }
        }
        self.phase = SessionPhase::Closed;
        self.deadline = None;
        if let Err(e) = self.transport.disconnect() {
            debug!("session {}: disconnect: {}", self.id, e);
        }
    }

    fn transport_usable(&self) -> bool {
        matches!(
            self.phase,
            SessionPhase::AwaitingPeerAck | SessionPhase::Established
        )
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn peer_id(&self) -> Option<&str> {
        self.peer_id.as_deref()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn connect_topic(&self) -> &str {
        &self.config.connect_topic
    }

    pub fn control_topic(&self) -> &str {
        &self.control_topic
    }

    pub fn is_established(&self) -> bool {
        self.phase == SessionPhase::Established
    }

    /// 已建立会话的信息
    pub fn info(&self) -> Option<SessionInfo> {
        let peer_id = self.peer_id.clone()?;
        Some(SessionInfo {
            endpoint: self.endpoint.clone(),
            client_id: self.client_id.clone(),
            peer_id,
            control_topic: self.control_topic.clone(),
        })
    }
}

impl CommandSink for Session {
    fn publish_command(&mut self, command: &RobotCommand) -> Result<(), SessionError> {
        if self.phase != SessionPhase::Established {
            return Err(SessionError::NotConnected);
        }
        let payload = encode_command(command)?;
        trace!("session {}: {} -> {}", self.id, self.control_topic, payload);
        self.transport.publish(
            &self.control_topic,
            payload.as_bytes(),
            self.config.qos,
            false,
        )?;
        Ok(())
    }
}
