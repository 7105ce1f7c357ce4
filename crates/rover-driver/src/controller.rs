//! 控制器句柄（对外 API）
//!
//! 封装调度线程：操作请求经 channel 发往调度线程并同步等待回复，
//! 快照、链路状态、会话信息与指标可在任意线程无锁读取。

use crate::config::SessionConfig;
use crate::dispatcher::{Dispatcher, Reply, Request, Shared};
use crate::error::SessionError;
use crate::lifecycle::LinkState;
use crate::metrics::MetricsSnapshot;
use crate::observer::{ControlObserver, LifecycleObserver, ObserverRegistry};
use crate::session::SessionInfo;
use crate::tracker::{ArmAction, ControlSnapshot};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use rover_bus::{Endpoint, TransportFactory};
use rover_protocol::ControllerState;
use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::error;

/// 带超时的线程 join
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> thread::Result<()> {
        let (tx, rx) = bounded(1);

        // 看门狗线程负责 join，超时后继续在后台运行
        thread::spawn(move || {
            let _ = tx.send(self.join().map(|_| ()));
        });

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

/// 进行中的连接尝试
///
/// 由 [`Controller::begin_connect`] 返回；丢弃它不会取消连接，
/// 取消请使用 [`Controller::disconnect`]。
#[must_use = "the connect result is only observable through wait()"]
pub struct PendingConnect {
    rx: Receiver<Result<SessionInfo, SessionError>>,
}

impl PendingConnect {
    /// 阻塞直到握手完成或失败
    pub fn wait(self) -> Result<SessionInfo, SessionError> {
        self.rx
            .recv()
            .unwrap_or(Err(SessionError::DispatcherStopped))
    }
}

/// 控制器
///
/// 同一时刻最多一个握手在进行、最多一个已建立的会话。新的 `connect` 会先结束
/// 当前会话：进行中的尝试以 [`SessionError::Superseded`] 失败，已建立的会话正常关闭。
///
/// ```no_run
/// use rover_driver::{ArmAction, ControllerBuilder};
/// use rover_bus::Endpoint;
///
/// let controller = ControllerBuilder::new().build()?;
/// let info = controller.connect(Endpoint::new("192.168.137.1", 1883))?;
/// println!("controlling {}", info.peer_id);
///
/// controller.update_movement(0.0, 0.5)?;
/// controller.dispatch_arm_action(ArmAction::In)?;
/// controller.disconnect()?;
/// # Ok::<(), rover_driver::SessionError>(())
/// ```
pub struct Controller {
    /// 请求通道
    ///
    /// Drop 时必须在 join 调度线程之前关闭，否则调度线程收不到 `Disconnected`。
    request_tx: ManuallyDrop<Sender<Request>>,
    shared: Arc<Shared>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Controller {
    const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

    pub(crate) fn spawn(
        config: SessionConfig,
        factory: Arc<dyn TransportFactory>,
        observers: ObserverRegistry,
    ) -> Result<Self, SessionError> {
        let (request_tx, request_rx) = unbounded();
        let (events_tx, events_rx) = unbounded();
        let shared = Arc::new(Shared::new(observers));

        let dispatcher = Dispatcher::new(config, factory, shared.clone(), events_tx);
        let handle = thread::Builder::new()
            .name("rover-dispatch".to_string())
            .spawn(move || dispatcher.run(request_rx, events_rx))
            .map_err(|e| {
                error!("failed to spawn dispatcher thread: {}", e);
                SessionError::DispatcherStopped
            })?;

        Ok(Self {
            request_tx: ManuallyDrop::new(request_tx),
            shared,
            dispatcher: Some(handle),
        })
    }

    fn send(&self, request: Request) -> Result<(), SessionError> {
        self.request_tx
            .send(request)
            .map_err(|_| SessionError::DispatcherStopped)
    }

    fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Request) -> Result<T, SessionError> {
        let (reply, rx) = bounded(1);
        self.send(make(reply))?;
        rx.recv().unwrap_or(Err(SessionError::DispatcherStopped))
    }

    /// 连接并阻塞直到握手完成
    pub fn connect(&self, endpoint: Endpoint) -> Result<SessionInfo, SessionError> {
        self.begin_connect(endpoint)?.wait()
    }

    /// 发起连接，立即返回
    pub fn begin_connect(&self, endpoint: Endpoint) -> Result<PendingConnect, SessionError> {
        let (reply, rx) = bounded(1);
        self.send(Request::Connect { endpoint, reply })?;
        Ok(PendingConnect { rx })
    }

    /// 主动断开；没有会话时为空操作
    ///
    /// 已建立的会话通知 `ClosedByUser`，进行中的尝试以 `Cancelled` 失败。
    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.call(|reply| Request::Disconnect { reply })
    }

    /// 更新移动向量（`x`、`y` ∈ [-1, 1]），与当前向量相同时不发布
    pub fn update_movement(&self, x: f64, y: f64) -> Result<(), SessionError> {
        self.call(|reply| Request::Movement { x, y, reply })
    }

    /// 下发机械臂动作，与上一次相同时不发布
    pub fn dispatch_arm_action(&self, action: ArmAction) -> Result<(), SessionError> {
        self.call(|reply| Request::Arm { action, reply })
    }

    pub fn set_ai_enabled(&self, active: bool) -> Result<(), SessionError> {
        self.call(|reply| Request::AiEnabled { active, reply })
    }

    pub fn switch_state(&self, target: ControllerState) -> Result<(), SessionError> {
        self.call(|reply| Request::SwitchState { target, reply })
    }

    pub fn link_state(&self) -> LinkState {
        self.shared.link.get()
    }

    pub fn is_connected(&self) -> bool {
        self.link_state().is_connected()
    }

    /// 最新的控制状态快照
    pub fn snapshot(&self) -> Arc<ControlSnapshot> {
        self.shared.snapshot.load_full()
    }

    /// 当前已建立会话的信息
    pub fn session_info(&self) -> Option<Arc<SessionInfo>> {
        self.shared.session.load_full()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.shared.metrics.reset();
    }

    /// 运行时注册控制状态观察者
    pub fn observe_control(&self, observer: Arc<dyn ControlObserver>) {
        self.shared.observers.write().add_control(observer);
    }

    /// 运行时注册生命周期观察者
    pub fn observe_lifecycle(&self, observer: Arc<dyn LifecycleObserver>) {
        self.shared.observers.write().add_lifecycle(observer);
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        let _ = self.request_tx.send(Request::Shutdown);

        // SAFETY: request_tx 只在这里释放一次，之后不再访问
        unsafe {
            ManuallyDrop::drop(&mut self.request_tx);
        }

        if let Some(handle) = self.dispatcher.take()
            && let Err(_e) = handle.join_timeout(Self::JOIN_TIMEOUT)
        {
            error!(
                "dispatcher thread panicked or failed to shut down within {:?}",
                Self::JOIN_TIMEOUT
            );
        }
    }
}
