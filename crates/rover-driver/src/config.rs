//! 会话配置

use rover_bus::QoS;
use rover_protocol::{CONNECT_TOPIC, CONTROL_TOPIC_BASE, DEFAULT_HANDSHAKE_TIMEOUT_SECS};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 会话配置（POD，可从 TOML 反序列化）
///
/// 时长字段以秒为单位（允许小数）。
///
/// ```
/// use rover_driver::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig::default();
/// assert_eq!(config.handshake_timeout, Duration::from_secs(15));
/// assert_eq!(config.connect_topic, "topic/connect");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// 等待对端 `con_ok` 的上限
    #[serde(with = "duration_secs")]
    pub handshake_timeout: Duration,
    /// 共享连接主题
    pub connect_topic: String,
    /// 私有控制主题前缀，完整主题为 `{base}/{clientId}`
    pub control_topic_base: String,
    /// 握手与指令的投递质量
    pub qos: QoS,
    /// 传输层 keep-alive
    #[serde(with = "duration_secs")]
    pub keep_alive: Duration,
    /// 客户端标识前缀（由传输工厂追加随机后缀）
    pub client_id_prefix: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            connect_topic: CONNECT_TOPIC.to_string(),
            control_topic_base: CONTROL_TOPIC_BASE.to_string(),
            qos: QoS::ExactlyOnce,
            keep_alive: Duration::from_secs(60),
            client_id_prefix: "web-controller".to_string(),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
