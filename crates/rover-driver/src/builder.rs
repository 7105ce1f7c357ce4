//! Builder 模式实现
//!
//! 提供链式构造 [`Controller`] 的便捷方式。

use crate::config::SessionConfig;
use crate::controller::Controller;
use crate::error::SessionError;
use crate::observer::{ControlObserver, LifecycleObserver, ObserverRegistry};
use rover_bus::TransportFactory;
use std::sync::Arc;
use std::time::Duration;

/// Controller Builder（链式构造）
///
/// 未指定传输工厂时，启用 `mqtt` feature 的构建使用 [`rover_bus::MqttFactory`]，
/// 客户端标识前缀与 keep-alive 取自 [`SessionConfig`]，等待 CONNACK 的上限与握手超时相同。
///
/// # Example
///
/// ```no_run
/// use rover_driver::{ControllerBuilder, LifecycleChannel};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let (lifecycle, events) = LifecycleChannel::new();
/// let controller = ControllerBuilder::new()
///     .handshake_timeout(Duration::from_secs(5))
///     .observe_lifecycle(Arc::new(lifecycle))
///     .build()
///     .unwrap();
/// # drop((controller, events));
/// ```
#[derive(Default)]
pub struct ControllerBuilder {
    config: SessionConfig,
    factory: Option<Arc<dyn TransportFactory>>,
    observers: ObserverRegistry,
}

impl ControllerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 替换整份会话配置
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// 设置握手超时（默认 15 秒）
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// 设置传输工厂（每次连接尝试创建一个新的传输实例）
    pub fn transport_factory(mut self, factory: impl TransportFactory + 'static) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    pub fn observe_control(mut self, observer: Arc<dyn ControlObserver>) -> Self {
        self.observers.add_control(observer);
        self
    }

    pub fn observe_lifecycle(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.observers.add_lifecycle(observer);
        self
    }

    /// 启动调度线程并返回控制器
    pub fn build(self) -> Result<Controller, SessionError> {
        let factory = match self.factory {
            Some(factory) => factory,
            None => default_factory(&self.config)?,
        };
        Controller::spawn(self.config, factory, self.observers)
    }
}

#[cfg(feature = "mqtt")]
fn default_factory(config: &SessionConfig) -> Result<Arc<dyn TransportFactory>, SessionError> {
    Ok(Arc::new(
        rover_bus::MqttFactory::new(config.client_id_prefix.clone(), config.keep_alive)
            .with_connect_timeout(config.handshake_timeout),
    ))
}

#[cfg(not(feature = "mqtt"))]
fn default_factory(_config: &SessionConfig) -> Result<Arc<dyn TransportFactory>, SessionError> {
    Err(SessionError::MissingTransport)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LinkState;
    use rover_bus::MockBroker;

    #[test]
    fn test_builder_overrides() {
        let builder = ControllerBuilder::new()
            .config(SessionConfig {
                connect_topic: "lab/connect".into(),
                ..Default::default()
            })
            .handshake_timeout(Duration::from_millis(250));
        assert_eq!(builder.config.connect_topic, "lab/connect");
        assert_eq!(builder.config.handshake_timeout, Duration::from_millis(250));
        assert!(builder.factory.is_none());
    }

    #[test]
    fn test_build_with_mock_factory() {
        let broker = MockBroker::new();
        let controller = ControllerBuilder::new()
            .transport_factory(broker.factory("ctrl"))
            .build()
            .unwrap();
        assert_eq!(controller.link_state(), LinkState::Disconnected);
        assert!(controller.session_info().is_none());
        assert!(controller.snapshot().is_idle());
    }

    #[cfg(not(feature = "mqtt"))]
    #[test]
    fn test_build_without_factory_fails() {
        assert!(matches!(
            ControllerBuilder::new().build(),
            Err(SessionError::MissingTransport)
        ));
    }
}
