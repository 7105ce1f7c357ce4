//! MQTT 后端（rumqttc 同步客户端）
//!
//! `connect()` 在调用线程上等待 CONNACK，之后把 `Connection` 移交给独立的接收线程，
//! 接收线程把入站 PUBLISH 转成 [`BusEvent::Message`]，连接错误转成
//! [`BusEvent::ConnectionLost`]。主动 `disconnect()` 之后出现的连接错误不会上报。
//!
//! QoS 1/2 发布只有在确认流程（PUBACK / PUBCOMP）完成后才会投递给订阅者，
//! `disconnect()` 先等待所有在途发布完成（有上限），再发送 DISCONNECT。

use crate::{
    BusError, BusEvent, Endpoint, EventSink, LastWill, QoS, Transport, TransportFactory,
    generate_client_id,
};
use parking_lot::{Condvar, Mutex};
use rumqttc::{Client, ConnectReturnCode, Connection, Event, MqttOptions, Packet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// 请求队列容量
const REQUEST_CAPACITY: usize = 64;

/// 断开前等待在途发布完成的上限
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

fn to_mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

/// 尚未完成确认流程的 QoS 1/2 发布计数
#[derive(Debug, Default)]
struct Inflight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Inflight {
    fn begin(&self) {
        *self.count.lock() += 1;
    }

    fn complete(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    /// 连接结束，不会再有确认到达
    fn clear(&self) {
        *self.count.lock() = 0;
        self.idle.notify_all();
    }

    /// 等待计数归零，超时返回 `false`
    fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count > 0 {
            if self.idle.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}

/// MQTT 传输
pub struct MqttTransport {
    client_id: String,
    endpoint: Endpoint,
    keep_alive: Duration,
    connect_timeout: Duration,
    client: Option<Client>,
    closing: Arc<AtomicBool>,
    inflight: Arc<Inflight>,
    event_thread: Option<JoinHandle<()>>,
}

impl MqttTransport {
    /// 创建 MQTT 传输（尚未连接）
    ///
    /// 客户端标识为 `{client_prefix}-{随机后缀}`。
    pub fn new(endpoint: Endpoint, client_prefix: &str) -> Self {
        Self {
            client_id: generate_client_id(client_prefix),
            endpoint,
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(15),
            client: None,
            closing: Arc::new(AtomicBool::new(false)),
            inflight: Arc::new(Inflight::default()),
            event_thread: None,
        }
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// 等待 CONNACK 的上限
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn client(&mut self) -> Result<&mut Client, BusError> {
        self.client.as_mut().ok_or(BusError::NotConnected)
    }

    /// 在当前线程上等待 CONNACK
    fn await_connack(&self, connection: &mut Connection) -> Result<(), BusError> {
        let deadline = Instant::now() + self.connect_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(BusError::ConnectFailed(format!(
                    "no CONNACK from {} within {:?}",
                    self.endpoint, self.connect_timeout
                )));
            }
            match connection.recv_timeout(remaining) {
                Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                    return if ack.code == ConnectReturnCode::Success {
                        Ok(())
                    } else {
                        Err(BusError::ConnectFailed(format!("{:?}", ack.code)))
                    };
                },
                Ok(Ok(other)) => trace!("mqtt: pre-connack event {:?}", other),
                Ok(Err(e)) => return Err(BusError::ConnectFailed(e.to_string())),
                Err(_) => {
                    return Err(BusError::ConnectFailed(format!(
                        "no CONNACK from {} within {:?}",
                        self.endpoint, self.connect_timeout
                    )));
                },
            }
        }
    }
}

/// 接收线程
fn event_loop(
    mut connection: Connection,
    events: EventSink,
    closing: Arc<AtomicBool>,
    inflight: Arc<Inflight>,
) {
    for notification in connection.iter() {
        match notification {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let delivered = events.deliver(BusEvent::Message {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                });
                if !delivered {
                    break;
                }
            },
            Ok(Event::Incoming(Packet::PubAck(_) | Packet::PubComp(_))) => inflight.complete(),
            Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                if closing.load(Ordering::Acquire) {
                    break;
                }
            },
            Ok(_) => {},
            Err(e) => {
                if !closing.load(Ordering::Acquire) {
                    warn!("mqtt: connection error: {}", e);
                    events.deliver(BusEvent::ConnectionLost {
                        reason: e.to_string(),
                    });
                }
                break;
            },
        }
    }
    inflight.clear();
    debug!("mqtt: event thread exited");
}

impl Transport for MqttTransport {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn connect(&mut self, last_will: LastWill, events: EventSink) -> Result<(), BusError> {
        let mut options =
            MqttOptions::new(&self.client_id, &self.endpoint.address, self.endpoint.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        options.set_last_will(rumqttc::LastWill::new(
            last_will.topic,
            last_will.payload.into_bytes(),
            to_mqtt_qos(last_will.qos),
            last_will.retained,
        ));

        let (client, mut connection) = Client::new(options, REQUEST_CAPACITY);
        self.await_connack(&mut connection)?;
        info!("mqtt: {} connected to {}", self.client_id, self.endpoint);

        self.closing.store(false, Ordering::Release);
        self.inflight.clear();
        let closing = self.closing.clone();
        let inflight = self.inflight.clone();
        let handle = thread::Builder::new()
            .name(format!("mqtt-{}", self.client_id))
            .spawn(move || event_loop(connection, events, closing, inflight))
            .map_err(|e| BusError::ConnectFailed(e.to_string()))?;

        self.client = Some(client);
        self.event_thread = Some(handle);
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), BusError> {
        self.client()?
            .subscribe(topic, to_mqtt_qos(qos))
            .map_err(|e| BusError::Subscribe(e.to_string()))
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retained: bool,
    ) -> Result<(), BusError> {
        let acknowledged = qos != QoS::AtMostOnce;
        let client = self.client.as_mut().ok_or(BusError::NotConnected)?;
        if acknowledged {
            self.inflight.begin();
        }
        let result = client
            .publish(topic, to_mqtt_qos(qos), retained, payload.to_vec())
            .map_err(|e| BusError::Publish(e.to_string()));
        if acknowledged && result.is_err() {
            self.inflight.complete();
        }
        result
    }

    fn disconnect(&mut self) -> Result<(), BusError> {
        if self.client.is_none() {
            return Err(BusError::NotConnected);
        }
        self.closing.store(true, Ordering::Release);
        // close_con 等 QoS 2 发布需要完成 PUBREC/PUBREL/PUBCOMP 才会被投递
        if !self.inflight.wait_idle(FLUSH_TIMEOUT) {
            warn!(
                "mqtt: {} disconnecting with unacknowledged publishes after {:?}",
                self.client_id, FLUSH_TIMEOUT
            );
        }
        let result = self
            .client()?
            .disconnect()
            .map_err(|e| BusError::Publish(e.to_string()));
        self.client = None;
        if let Some(handle) = self.event_thread.take() {
            // 事件线程在发出 DISCONNECT 或连接关闭后退出
            let _ = handle.join();
        }
        result
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if self.client.is_some() {
            let _ = self.disconnect();
        }
    }
}

/// MQTT 传输工厂
#[derive(Debug, Clone)]
pub struct MqttFactory {
    client_prefix: String,
    keep_alive: Duration,
    connect_timeout: Option<Duration>,
}

impl MqttFactory {
    pub fn new(client_prefix: impl Into<String>, keep_alive: Duration) -> Self {
        Self {
            client_prefix: client_prefix.into(),
            keep_alive,
            connect_timeout: None,
        }
    }

    /// 每个传输等待 CONNACK 的上限
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    fn transport(&self, endpoint: &Endpoint) -> MqttTransport {
        let transport = MqttTransport::new(endpoint.clone(), &self.client_prefix)
            .with_keep_alive(self.keep_alive);
        match self.connect_timeout {
            Some(timeout) => transport.with_connect_timeout(timeout),
            None => transport,
        }
    }
}

impl TransportFactory for MqttFactory {
    fn create(&self, endpoint: &Endpoint) -> Result<Box<dyn Transport>, BusError> {
        Ok(Box::new(self.transport(endpoint)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_mapping() {
        assert_eq!(to_mqtt_qos(QoS::AtMostOnce), rumqttc::QoS::AtMostOnce);
        assert_eq!(to_mqtt_qos(QoS::AtLeastOnce), rumqttc::QoS::AtLeastOnce);
        assert_eq!(to_mqtt_qos(QoS::ExactlyOnce), rumqttc::QoS::ExactlyOnce);
    }

    #[test]
    fn test_not_connected_before_connect() {
        let mut transport = MqttTransport::new(Endpoint::new("localhost", 1883), "web");
        assert!(transport.client_id().starts_with("web-"));
        assert_eq!(
            transport.publish("t", b"x", QoS::ExactlyOnce, false),
            Err(BusError::NotConnected)
        );
        assert_eq!(transport.disconnect(), Err(BusError::NotConnected));
    }

    #[test]
    fn test_factory_applies_settings() {
        let endpoint = Endpoint::new("localhost", 1883);
        let factory = MqttFactory::new("web-controller", Duration::from_secs(30))
            .with_connect_timeout(Duration::from_secs(5));

        let transport = factory.transport(&endpoint);
        assert!(transport.client_id().starts_with("web-controller-"));
        assert_eq!(transport.keep_alive, Duration::from_secs(30));
        assert_eq!(transport.connect_timeout, Duration::from_secs(5));

        let default = MqttFactory::new("web", Duration::from_secs(60)).transport(&endpoint);
        assert_eq!(default.connect_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_inflight_waits_for_completion() {
        let inflight = Arc::new(Inflight::default());
        assert!(inflight.wait_idle(Duration::ZERO));

        inflight.begin();
        inflight.begin();
        assert!(!inflight.wait_idle(Duration::from_millis(20)));

        let acks = inflight.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            acks.complete();
            acks.complete();
        });
        assert!(inflight.wait_idle(Duration::from_secs(2)));
        handle.join().unwrap();
    }

    #[test]
    fn test_inflight_cleared_on_connection_end() {
        let inflight = Inflight::default();
        inflight.begin();
        inflight.clear();
        assert!(inflight.wait_idle(Duration::ZERO));

        // 多余的确认不会下溢
        inflight.complete();
        assert!(inflight.wait_idle(Duration::ZERO));
    }

    /// 需要本地 broker（如 mosquitto），默认忽略
    #[test]
    #[ignore]
    fn test_connect_local_broker() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut transport = MqttTransport::new(Endpoint::new("localhost", 1883), "rover-test");
        transport
            .connect(
                LastWill::new("topic/connect", "close_con:x", QoS::ExactlyOnce),
                EventSink::new(1, tx),
            )
            .expect("broker not reachable");
        transport.subscribe("rover/test", QoS::AtLeastOnce).unwrap();
        transport
            .publish("rover/test", b"ping", QoS::AtLeastOnce, false)
            .unwrap();
        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(
            event.event,
            BusEvent::Message {
                topic: "rover/test".into(),
                payload: b"ping".to_vec()
            }
        );
        transport.disconnect().unwrap();
    }

    /// 断开前发布的 QoS 2 消息必须送达订阅者，需要本地 broker，默认忽略
    #[test]
    #[ignore]
    fn test_qos2_publish_delivered_before_disconnect() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let will = || LastWill::new("rover/will", "gone", QoS::ExactlyOnce);

        let mut listener = MqttTransport::new(Endpoint::new("localhost", 1883), "rover-listener");
        listener.connect(will(), EventSink::new(1, tx)).expect("broker not reachable");
        listener.subscribe("rover/close", QoS::ExactlyOnce).unwrap();

        let (closer_tx, _closer_rx) = crossbeam_channel::unbounded();
        let mut closer = MqttTransport::new(Endpoint::new("localhost", 1883), "rover-closer");
        closer.connect(will(), EventSink::new(2, closer_tx)).unwrap();
        // 等订阅生效
        thread::sleep(Duration::from_millis(200));
        closer
            .publish("rover/close", b"close_con:x", QoS::ExactlyOnce, false)
            .unwrap();
        closer.disconnect().unwrap();

        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(
            event.event,
            BusEvent::Message {
                topic: "rover/close".into(),
                payload: b"close_con:x".to_vec()
            }
        );
        listener.disconnect().unwrap();
    }
}
