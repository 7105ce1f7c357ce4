//! 进程内 Mock broker
//!
//! 只实现控制器需要的 broker 行为：精确主题匹配的分发（包括回送给发布者自己）、
//! 连接时登记的遗嘱消息、以及可注入的连接失败与断线。所有发布都会记录在日志中，
//! 测试可以据此断言“总线上到底发出了什么”。
//!
//! # 使用示例
//!
//! ```rust
//! use rover_bus::{BusEvent, EventSink, LastWill, MockBroker, QoS, Transport};
//!
//! let broker = MockBroker::new();
//! let mut robot = broker.transport("cleanee-rob");
//! let (tx, rx) = crossbeam_channel::unbounded();
//! robot
//!     .connect(LastWill::new("topic/connect", "close_con:cleanee-rob", QoS::ExactlyOnce), EventSink::new(0, tx))
//!     .unwrap();
//! robot.subscribe("topic/connect", QoS::ExactlyOnce).unwrap();
//!
//! broker.inject("topic/connect", "init_con:web-1");
//! let event = rx.recv().unwrap();
//! assert!(matches!(event.event, BusEvent::Message { .. }));
//! ```

use crate::{BusError, BusEvent, EventSink, LastWill, QoS, Transport, TransportFactory};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// broker 记录的一条发布
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// 发布者标识（注入的消息为 `"<broker>"`）
    pub client_id: String,
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retained: bool,
    /// 是否由 broker 代发的遗嘱
    pub from_will: bool,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

struct ClientEntry {
    sink: EventSink,
    subscriptions: HashSet<String>,
    last_will: LastWill,
}

#[derive(Default)]
struct BrokerState {
    clients: HashMap<String, ClientEntry>,
    log: Vec<PublishedMessage>,
    refuse_reason: Option<String>,
}

impl BrokerState {
    fn route(&mut self, message: PublishedMessage) {
        trace!(
            "broker: {} -> {} ({} bytes)",
            message.client_id,
            message.topic,
            message.payload.len()
        );
        for entry in self.clients.values() {
            if entry.subscriptions.contains(&message.topic) {
                entry.sink.deliver(BusEvent::Message {
                    topic: message.topic.clone(),
                    payload: message.payload.clone(),
                });
            }
        }
        self.log.push(message);
    }

    /// 移除客户端并代发遗嘱
    fn vanish(&mut self, client_id: &str) -> Option<EventSink> {
        let entry = self.clients.remove(client_id)?;
        let will = entry.last_will;
        self.route(PublishedMessage {
            client_id: client_id.to_string(),
            topic: will.topic,
            payload: will.payload.into_bytes(),
            qos: will.qos,
            retained: will.retained,
            from_will: true,
        });
        Some(entry.sink)
    }
}

/// 进程内 broker（可克隆，克隆共享同一状态）
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建指定标识的传输实例（尚未连接）
    pub fn transport(&self, client_id: impl Into<String>) -> MockTransport {
        MockTransport {
            broker: self.clone(),
            client_id: client_id.into(),
            connected: false,
        }
    }

    /// 创建传输工厂，依次分配 `{prefix}-1`、`{prefix}-2` ... 标识
    pub fn factory(&self, prefix: impl Into<String>) -> impl TransportFactory + 'static {
        let broker = self.clone();
        let prefix = prefix.into();
        let counter = AtomicU64::new(0);
        move |_endpoint: &crate::Endpoint| -> Result<Box<dyn Transport>, BusError> {
            let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
            Ok(Box::new(broker.transport(format!("{}-{}", prefix, n))))
        }
    }

    /// 之后的连接请求全部以给定原因失败（`None` 恢复正常）
    pub fn refuse_connections(&self, reason: Option<&str>) {
        self.state.lock().refuse_reason = reason.map(str::to_string);
    }

    /// 以 broker 身份向主题注入一条消息
    pub fn inject(&self, topic: &str, payload: impl AsRef<[u8]>) {
        self.state.lock().route(PublishedMessage {
            client_id: "<broker>".to_string(),
            topic: topic.to_string(),
            payload: payload.as_ref().to_vec(),
            qos: QoS::ExactlyOnce,
            retained: false,
            from_will: false,
        });
    }

    /// 模拟网络中断：broker 发布该客户端的遗嘱，客户端本身收到断线通知
    ///
    /// 客户端不存在时返回 `false`。
    pub fn sever(&self, client_id: &str) -> bool {
        let sink = self.state.lock().vanish(client_id);
        match sink {
            Some(sink) => {
                debug!("broker: severed {}", client_id);
                sink.deliver(BusEvent::ConnectionLost {
                    reason: "connection reset by broker".to_string(),
                });
                true
            },
            None => false,
        }
    }

    /// 客户端是否在线
    pub fn is_online(&self, client_id: &str) -> bool {
        self.state.lock().clients.contains_key(client_id)
    }

    /// 在线客户端标识列表
    pub fn online_clients(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().clients.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 客户端当前订阅的主题
    pub fn subscriptions(&self, client_id: &str) -> Vec<String> {
        let state = self.state.lock();
        let mut topics: Vec<String> = state
            .clients
            .get(client_id)
            .map(|entry| entry.subscriptions.iter().cloned().collect())
            .unwrap_or_default();
        topics.sort();
        topics
    }

    /// 全部发布记录（按时间顺序）
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().log.clone()
    }

    /// 某个主题上的全部负载（UTF-8 有损解码）
    pub fn published_on(&self, topic: &str) -> Vec<String> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|m| m.topic == topic)
            .map(PublishedMessage::payload_str)
            .collect()
    }

    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }
}

/// Mock 传输实例
///
/// 未调用 `disconnect()` 就被丢弃时，按非正常消失处理（broker 发布遗嘱）。
pub struct MockTransport {
    broker: MockBroker,
    client_id: String,
    connected: bool,
}

impl MockTransport {
    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

impl Transport for MockTransport {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn connect(&mut self, last_will: LastWill, events: EventSink) -> Result<(), BusError> {
        let mut state = self.broker.state.lock();
        if let Some(reason) = &state.refuse_reason {
            return Err(BusError::ConnectFailed(reason.clone()));
        }
        state.clients.insert(
            self.client_id.clone(),
            ClientEntry {
                sink: events,
                subscriptions: HashSet::new(),
                last_will,
            },
        );
        self.connected = true;
        debug!("broker: {} connected", self.client_id);
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, _qos: QoS) -> Result<(), BusError> {
        let mut state = self.broker.state.lock();
        let entry = state
            .clients
            .get_mut(&self.client_id)
            .ok_or(BusError::NotConnected)?;
        entry.subscriptions.insert(topic.to_string());
        Ok(())
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retained: bool,
    ) -> Result<(), BusError> {
        let mut state = self.broker.state.lock();
        if !state.clients.contains_key(&self.client_id) {
            return Err(BusError::NotConnected);
        }
        state.route(PublishedMessage {
            client_id: self.client_id.clone(),
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retained,
            from_will: false,
        });
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), BusError> {
        self.connected = false;
        match self.broker.state.lock().clients.remove(&self.client_id) {
            Some(_) => Ok(()),
            None => Err(BusError::NotConnected),
        }
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        if self.connected {
            self.broker.state.lock().vanish(&self.client_id);
        }
    }
}
