//! 调度线程
//!
//! 单线程事件循环，独占会话、跟踪器与生命周期状态。用 `select!` 同时等待：
//!
//! - 操作员请求（来自 [`Controller`](crate::Controller) 句柄）
//! - 传输层事件（带会话编号，旧会话的迟到事件直接丢弃）
//! - 握手截止时间（`at(deadline)`，无截止时间时为 `never()`）
//!
//! 所有入站处理与出站发布都在本线程上串行执行。

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::lifecycle::{AtomicLinkState, LifecycleEvent, LinkState};
use crate::metrics::ControllerMetrics;
use crate::observer::ObserverRegistry;
use crate::session::{HandshakeStep, Session, SessionInfo};
use crate::tracker::{ArmAction, ControlSnapshot, ControlTracker, TrackerOutcome};
use arc_swap::{ArcSwap, ArcSwapOption};
use crossbeam_channel::{Receiver, Sender, select};
use parking_lot::RwLock;
use rover_bus::{BusEvent, Endpoint, SessionEvent, TransportFactory};
use rover_protocol::{ControllerState, decode_command};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

pub(crate) type Reply<T> = Sender<Result<T, SessionError>>;

/// 操作员请求
pub(crate) enum Request {
    Connect {
        endpoint: Endpoint,
        reply: Reply<SessionInfo>,
    },
    Disconnect {
        reply: Reply<()>,
    },
    Movement {
        x: f64,
        y: f64,
        reply: Reply<()>,
    },
    Arm {
        action: ArmAction,
        reply: Reply<()>,
    },
    AiEnabled {
        active: bool,
        reply: Reply<()>,
    },
    SwitchState {
        target: ControllerState,
        reply: Reply<()>,
    },
    Shutdown,
}

/// 调度线程与句柄共享的只读视图
pub(crate) struct Shared {
    pub snapshot: ArcSwap<ControlSnapshot>,
    pub link: AtomicLinkState,
    pub session: ArcSwapOption<SessionInfo>,
    pub metrics: ControllerMetrics,
    pub observers: RwLock<ObserverRegistry>,
}

impl Shared {
    pub fn new(observers: ObserverRegistry) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(ControlSnapshot::default()),
            link: AtomicLinkState::default(),
            session: ArcSwapOption::empty(),
            metrics: ControllerMetrics::new(),
            observers: RwLock::new(observers),
        }
    }
}

pub(crate) struct Dispatcher {
    config: SessionConfig,
    factory: Arc<dyn TransportFactory>,
    shared: Arc<Shared>,
    events_tx: Sender<SessionEvent>,
    session: Option<Session>,
    pending: Option<Reply<SessionInfo>>,
    tracker: ControlTracker,
    next_session: u64,
}

impl Dispatcher {
    pub fn new(
        config: SessionConfig,
        factory: Arc<dyn TransportFactory>,
        shared: Arc<Shared>,
        events_tx: Sender<SessionEvent>,
    ) -> Self {
        Self {
            config,
            factory,
            shared,
            events_tx,
            session: None,
            pending: None,
            tracker: ControlTracker::new(),
            next_session: 0,
        }
    }

    /// 事件循环，收到 `Shutdown` 或请求通道关闭时退出
    pub fn run(mut self, requests: Receiver<Request>, events: Receiver<SessionEvent>) {
        debug!("dispatcher started");
        loop {
            let timer = match self.session.as_ref().and_then(Session::deadline) {
                Some(deadline) => crossbeam_channel::at(deadline),
                None => crossbeam_channel::never(),
            };

            select! {
                recv(requests) -> request => match request {
                    Ok(Request::Shutdown) | Err(_) => break,
                    Ok(request) => self.handle_request(request),
                },
                recv(events) -> event => {
                    if let Ok(event) = event {
                        self.handle_event(event);
                    }
                },
                recv(timer) -> _ => self.handle_timer(),
            }
        }
        self.shutdown();
        debug!("dispatcher stopped");
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Connect { endpoint, reply } => self.connect(endpoint, reply),
            Request::Disconnect { reply } => {
                let _ = reply.send(self.disconnect());
            },
            Request::Movement { x, y, reply } => {
                let result = self.with_tracker(|tracker, session| {
                    tracker.update_movement(session, x, y)
                });
                let _ = reply.send(result);
            },
            Request::Arm { action, reply } => {
                let result = self.with_tracker(|tracker, session| {
                    tracker.dispatch_arm_action(session, action)
                });
                let _ = reply.send(result);
            },
            Request::AiEnabled { active, reply } => {
                let result = self.with_tracker(|tracker, session| {
                    tracker.set_ai_enabled(session, active)
                });
                let _ = reply.send(result);
            },
            Request::SwitchState { target, reply } => {
                let result = self.with_tracker(|tracker, session| {
                    tracker.switch_state(session, target)
                });
                let _ = reply.send(result);
            },
            Request::Shutdown => {},
        }
    }

    /// 在已建立的会话上执行一次跟踪器操作
    fn with_tracker<F>(&mut self, op: F) -> Result<(), SessionError>
    where
        F: FnOnce(&mut ControlTracker, &mut Session) -> Result<TrackerOutcome, SessionError>,
    {
        let session = match self.session.as_mut() {
            Some(session) if session.is_established() => session,
            _ => return Err(SessionError::NotConnected),
        };
        let outcome = op(&mut self.tracker, session)?;
        match outcome {
            TrackerOutcome::Published(snapshot) => {
                ControllerMetrics::incr(&self.shared.metrics.frames_published);
                self.emit_snapshot(snapshot);
            },
            TrackerOutcome::Sent => {
                ControllerMetrics::incr(&self.shared.metrics.frames_published);
            },
            TrackerOutcome::Deduplicated => {
                ControllerMetrics::incr(&self.shared.metrics.commands_deduplicated);
            },
            TrackerOutcome::Ignored => {},
        }
        Ok(())
    }

    fn connect(&mut self, endpoint: Endpoint, reply: Reply<SessionInfo>) {
        self.supersede();

        self.next_session += 1;
        let id = self.next_session;
        info!("connecting to {} (session {})", endpoint, id);
        self.transition(LifecycleEvent::Connecting);
        ControllerMetrics::incr(&self.shared.metrics.handshakes_started);

        let transport = match self.factory.create(&endpoint) {
            Ok(transport) => transport,
            Err(e) => {
                self.fail_attempt(reply, e.into());
                return;
            },
        };

        let mut session = Session::new(id, endpoint, transport, self.config.clone());
        match session.open(self.events_tx.clone()) {
            Ok(()) => {
                self.session = Some(session);
                self.pending = Some(reply);
            },
            Err(e) => self.fail_attempt(reply, e),
        }
    }

    /// 新的连接请求到来时结束当前会话
    fn supersede(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        if session.is_established() {
            info!("closing session {} for a new connect", session.id());
            session.close(true);
            self.transition(LifecycleEvent::ClosedByUser);
        } else {
            session.close(true);
            if let Some(reply) = self.pending.take() {
                self.fail_attempt(reply, SessionError::Superseded);
            }
        }
    }

    fn disconnect(&mut self) -> Result<(), SessionError> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        let established = session.is_established();
        session.close(true);
        if established {
            info!("session {} closed by user", session.id());
            self.transition(LifecycleEvent::ClosedByUser);
        } else if let Some(reply) = self.pending.take() {
            self.fail_attempt(reply, SessionError::Cancelled);
        }
        Ok(())
    }

    fn handle_event(&mut self, event: SessionEvent) {
        let current = self.session.as_ref().map(Session::id);
        if current != Some(event.session) {
            trace!("dropping event for stale session {}", event.session);
            return;
        }

        match event.event {
            BusEvent::Message { topic, payload } => self.handle_message(&topic, &payload),
            BusEvent::ConnectionLost { reason } => self.handle_connection_lost(reason),
        }
    }

    fn handle_message(&mut self, topic: &str, payload: &[u8]) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        trace!("<- {} ({} bytes)", topic, payload.len());

        if topic == session.connect_topic() {
            let text = String::from_utf8_lossy(payload);
            match session.handle_connect_message(&text) {
                Ok(HandshakeStep::Established { peer_id }) => self.on_established(peer_id),
                Ok(HandshakeStep::PeerClosed { client_id }) => {
                    info!("peer announced close_con:{}", client_id);
                    self.on_lost();
                },
                Ok(HandshakeStep::Ignored) => {},
                Err(e) => {
                    warn!("handshake failed: {}", e);
                    if let Some(mut session) = self.session.take() {
                        session.close(false);
                    }
                    if let Some(reply) = self.pending.take() {
                        self.fail_attempt(reply, e);
                    }
                },
            }
        } else if topic == session.control_topic() {
            ControllerMetrics::incr(&self.shared.metrics.frames_received);
            match decode_command(payload) {
                Ok(command) => {
                    if let Some(snapshot) = self.tracker.handle_control_message(&command) {
                        self.emit_snapshot(snapshot);
                    }
                },
                Err(e) => {
                    ControllerMetrics::incr(&self.shared.metrics.malformed_frames);
                    warn!("discarding malformed control frame: {}", e);
                },
            }
        }
    }

    fn on_established(&mut self, peer_id: String) {
        let Some(info) = self.session.as_ref().and_then(Session::info) else {
            return;
        };
        ControllerMetrics::incr(&self.shared.metrics.handshakes_completed);
        info!("connected as {} to peer {}", info.client_id, peer_id);

        self.tracker.reset();
        self.shared.snapshot.store(Arc::new(self.tracker.snapshot()));
        self.shared.session.store(Some(Arc::new(info.clone())));
        self.transition(LifecycleEvent::Connected {
            client_id: info.client_id.clone(),
            peer_id,
        });
        if let Some(reply) = self.pending.take() {
            let _ = reply.send(Ok(info));
        }
    }

    /// 已建立的会话意外结束
    fn on_lost(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close(false);
        }
        ControllerMetrics::incr(&self.shared.metrics.unclean_losses);
        warn!("session lost");
        self.transition(LifecycleEvent::Lost);
    }

    fn handle_connection_lost(&mut self, reason: String) {
        let established = self
            .session
            .as_ref()
            .is_some_and(Session::is_established);
        if established {
            warn!("transport lost: {}", reason);
            self.on_lost();
            return;
        }
        if let Some(mut session) = self.session.take() {
            session.close(false);
        }
        if let Some(reply) = self.pending.take() {
            let error = rover_bus::BusError::ConnectFailed(reason);
            self.fail_attempt(reply, error.into());
        }
    }

    fn handle_timer(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.on_timer(Instant::now()) {
            return;
        }
        ControllerMetrics::incr(&self.shared.metrics.handshake_timeouts);
        if let Some(mut session) = self.session.take() {
            session.close(false);
        }
        let timeout = self.config.handshake_timeout;
        if let Some(reply) = self.pending.take() {
            self.fail_attempt(reply, SessionError::HandshakeTimeout(timeout));
        }
    }

    /// 连接尝试失败：通知 `Failed`，回到 `Disconnected`，回复调用方
    fn fail_attempt(&mut self, reply: Reply<SessionInfo>, error: SessionError) {
        warn!("connect attempt failed: {}", error);
        self.transition(LifecycleEvent::Failed(error.to_string()));
        let _ = reply.send(Err(error));
    }

    fn shutdown(&mut self) {
        if let Some(mut session) = self.session.take() {
            let established = session.is_established();
            session.close(true);
            if established {
                self.transition(LifecycleEvent::ClosedByUser);
            }
        }
        if let Some(reply) = self.pending.take() {
            self.fail_attempt(reply, SessionError::DispatcherStopped);
        }
    }

    /// 更新链路状态并通知观察者
    fn transition(&mut self, event: LifecycleEvent) {
        let next = event.resulting_state();
        let previous = self.shared.link.swap(next);
        if !previous.can_transition_to(next) {
            warn!("unexpected link transition {} -> {}", previous, next);
        }
        if next != LinkState::Connected {
            self.shared.session.store(None);
        }
        if next == LinkState::Disconnected {
            self.clear_control_state();
        }
        debug!("lifecycle: {}", event);
        self.observers().notify_lifecycle(&event);
    }

    /// 会话结束后控制状态回到初始值，快照有变化时通知观察者
    fn clear_control_state(&mut self) {
        self.tracker.reset();
        let idle = self.tracker.snapshot();
        if **self.shared.snapshot.load() != idle {
            self.emit_snapshot(idle);
        }
    }

    fn emit_snapshot(&mut self, snapshot: ControlSnapshot) {
        trace!("control state: {}", snapshot);
        let snapshot = Arc::new(snapshot);
        self.shared.snapshot.store(snapshot.clone());
        self.observers().notify_control(&snapshot);
    }

    /// 复制一份观察者列表，回调期间不持有读锁
    fn observers(&self) -> ObserverRegistry {
        self.shared.observers.read().clone()
    }
}
