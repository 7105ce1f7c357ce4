//! 集成测试公共设施
//!
//! 进程内 broker 上的模拟机器人，以及等待观察者通知的辅助函数。

#![allow(dead_code)]

use crossbeam_channel::{Receiver, Sender, select, unbounded};
use rover_sdk::bus::{
    BusEvent, EventSink, LastWill, MockBroker, QoS, SessionEvent, Transport,
};
use rover_sdk::driver::{ControlChannel, LifecycleChannel};
use rover_sdk::protocol::{CONNECT_TOPIC, ConnectMessage};
use rover_sdk::{ControlSnapshot, Controller, ControllerBuilder, LifecycleEvent};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(2);

/// 模拟机器人
///
/// 订阅连接主题，对每个 `init_con:<id>` 回复 `con_ok:<robotId>`，
/// 并把收到的二次确认 `con_ok:<id>:<robotId>` 中的控制器标识转发给测试。
pub struct SimulatedRobot {
    pub id: String,
    pub acks: Receiver<String>,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SimulatedRobot {
    pub fn spawn(broker: &MockBroker, id: &str) -> Self {
        let (events_tx, events_rx) = unbounded::<SessionEvent>();
        let (acks_tx, acks) = unbounded();
        let (stop, stop_rx) = unbounded::<()>();

        let mut transport = broker.transport(id);
        transport
            .connect(
                LastWill::new(CONNECT_TOPIC, format!("close_con:{}", id), QoS::ExactlyOnce),
                EventSink::new(0, events_tx),
            )
            .unwrap();
        transport.subscribe(CONNECT_TOPIC, QoS::ExactlyOnce).unwrap();

        let robot_id = id.to_string();
        let handle = thread::spawn(move || {
            loop {
                select! {
                    recv(stop_rx) -> _ => break,
                    recv(events_rx) -> event => {
                        let Ok(event) = event else { break };
                        let BusEvent::Message { topic, payload } = event.event else { break };
                        if topic != CONNECT_TOPIC {
                            continue;
                        }
                        match ConnectMessage::parse(&String::from_utf8_lossy(&payload)) {
                            Ok(ConnectMessage::InitCon { .. }) => {
                                let offer = ConnectMessage::PeerOffer { peer_id: robot_id.clone() };
                                transport
                                    .publish(CONNECT_TOPIC, offer.encode().as_bytes(), QoS::ExactlyOnce, false)
                                    .unwrap();
                            },
                            Ok(ConnectMessage::Ack { client_id, peer_id }) if peer_id == robot_id => {
                                let _ = acks_tx.send(client_id);
                            },
                            _ => {},
                        }
                    },
                }
            }
            let _ = transport.disconnect();
        });

        Self {
            id: id.to_string(),
            acks,
            stop: Some(stop),
            handle: Some(handle),
        }
    }
}

impl Drop for SimulatedRobot {
    fn drop(&mut self) {
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// 带观察者通道的控制器
pub struct Harness {
    pub broker: MockBroker,
    pub controller: Controller,
    pub lifecycle: Receiver<LifecycleEvent>,
    pub snapshots: Receiver<ControlSnapshot>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_timeout(WAIT)
    }

    pub fn with_timeout(handshake_timeout: Duration) -> Self {
        let broker = MockBroker::new();
        let (lifecycle_observer, lifecycle) = LifecycleChannel::new();
        let (control_observer, snapshots) = ControlChannel::new();
        let controller = ControllerBuilder::new()
            .handshake_timeout(handshake_timeout)
            .transport_factory(broker.factory("ctrl"))
            .observe_lifecycle(Arc::new(lifecycle_observer))
            .observe_control(Arc::new(control_observer))
            .build()
            .unwrap();
        Self {
            broker,
            controller,
            lifecycle,
            snapshots,
        }
    }

    /// 下一个生命周期事件
    pub fn next_event(&self) -> LifecycleEvent {
        self.lifecycle
            .recv_timeout(WAIT)
            .expect("no lifecycle event within timeout")
    }

    /// 在给定时间内没有新的生命周期事件
    pub fn assert_no_event(&self, within: Duration) {
        if let Ok(event) = self.lifecycle.recv_timeout(within) {
            panic!("unexpected lifecycle event: {:?}", event);
        }
    }

    /// 丢弃已收到的事件与快照
    pub fn drain(&self) {
        while self.lifecycle.try_recv().is_ok() {}
        while self.snapshots.try_recv().is_ok() {}
    }

    /// 等待满足条件的快照
    pub fn wait_snapshot(&self, pred: impl Fn(&ControlSnapshot) -> bool) -> ControlSnapshot {
        let deadline = Instant::now() + WAIT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let snapshot = self
                .snapshots
                .recv_timeout(remaining)
                .expect("no matching snapshot within timeout");
            if pred(&snapshot) {
                return snapshot;
            }
        }
    }

    /// 本控制器第 `n` 个会话的私有控制主题
    pub fn control_topic(&self, n: u32) -> String {
        format!("topic/control/ctrl-{}", n)
    }
}

/// 轮询直到条件成立
pub fn wait_until(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}
