//! # Rover Bus Adapter Layer
//!
//! 发布/订阅消息总线的抽象层。控制器核心只依赖本模块的 [`Transport`] trait：
//! 连接（附带遗嘱消息）、订阅、发布、断开，入站消息与意外断线通过
//! [`EventSink`] 以 [`BusEvent`] 的形式投递给调度线程。
//!
//! ## 后端
//!
//! - `mqtt`（默认）：基于 `rumqttc` 的 MQTT 客户端
//! - `mock`：进程内 broker，仅实现主题分发与遗嘱消息，用于测试

use crossbeam_channel::Sender;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "mqtt")]
pub mod mqtt;

#[cfg(feature = "mock")]
pub use mock::{MockBroker, MockTransport, PublishedMessage};

#[cfg(feature = "mqtt")]
pub use mqtt::{MqttFactory, MqttTransport};

/// 总线适配层统一错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// 连接 broker 失败（认证、网络等），携带后端给出的原因
    #[error("Connect failed: {0}")]
    ConnectFailed(String),
    #[error("Transport not connected")]
    NotConnected,
    #[error("Publish failed: {0}")]
    Publish(String),
    #[error("Subscribe failed: {0}")]
    Subscribe(String),
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// broker 地址（值类型）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = BusError;

    /// 解析 `address:port`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, port) = s
            .rsplit_once(':')
            .ok_or_else(|| BusError::InvalidEndpoint(s.to_string()))?;
        if address.is_empty() {
            return Err(BusError::InvalidEndpoint(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| BusError::InvalidEndpoint(s.to_string()))?;
        Ok(Endpoint::new(address, port))
    }
}

/// 投递服务质量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    /// 握手与控制指令默认使用
    #[default]
    ExactlyOnce,
}

/// 遗嘱消息
///
/// 连接时交给 broker，客户端非正常消失时由 broker 代为发布。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retained: bool,
}

impl LastWill {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retained: false,
        }
    }
}

/// 传输层投递给核心的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// 已订阅主题上的入站消息
    Message { topic: String, payload: Vec<u8> },
    /// 传输层检测到的意外断线
    ConnectionLost { reason: String },
}

/// 带会话编号的事件
///
/// 调度线程据此丢弃已被替换的旧会话迟到的事件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub session: u64,
    pub event: BusEvent,
}

/// 事件投递端
///
/// 每个会话一个，克隆后可交给后端的接收线程。
#[derive(Debug, Clone)]
pub struct EventSink {
    session: u64,
    tx: Sender<SessionEvent>,
}

impl EventSink {
    pub fn new(session: u64, tx: Sender<SessionEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    /// 投递事件，接收端已关闭时返回 `false`
    pub fn deliver(&self, event: BusEvent) -> bool {
        self.tx
            .send(SessionEvent {
                session: self.session,
                event,
            })
            .is_ok()
    }
}

/// 发布/订阅传输接口
///
/// 客户端标识在构造时确定，在一个会话的生命周期内保持不变。
/// 所有方法只会在调度线程上调用。
pub trait Transport: Send {
    /// 本端客户端标识
    fn client_id(&self) -> &str;

    /// 连接 broker 并注册遗嘱消息
    ///
    /// 成功返回时连接已可用；之后的入站消息与断线通知通过 `events` 投递。
    fn connect(&mut self, last_will: LastWill, events: EventSink) -> Result<(), BusError>;

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), BusError>;

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retained: bool,
    ) -> Result<(), BusError>;

    /// 正常断开（broker 不会发布遗嘱）
    fn disconnect(&mut self) -> Result<(), BusError>;
}

/// 传输工厂
///
/// 每次连接尝试创建一个新的传输实例（会话不复用）。
pub trait TransportFactory: Send + Sync {
    fn create(&self, endpoint: &Endpoint) -> Result<Box<dyn Transport>, BusError>;
}

impl<F> TransportFactory for F
where
    F: Fn(&Endpoint) -> Result<Box<dyn Transport>, BusError> + Send + Sync,
{
    fn create(&self, endpoint: &Endpoint) -> Result<Box<dyn Transport>, BusError> {
        self(endpoint)
    }
}

/// 生成 `{prefix}-{随机后缀}` 形式的客户端标识
pub fn generate_client_id(prefix: &str) -> String {
    format!("{}-{:08x}", prefix, rand::random::<u32>())
}
