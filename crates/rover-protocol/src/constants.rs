//! 协议常量定义

/// 共享连接主题（握手与断开通知）
pub const CONNECT_TOPIC: &str = "topic/connect";

/// 私有控制主题前缀，完整主题为 `{CONTROL_TOPIC_BASE}/{client_id}`
pub const CONTROL_TOPIC_BASE: &str = "topic/control";

/// 控制器发起握手
pub const INIT_CON_PREFIX: &str = "init_con:";

/// 机器人应答 / 控制器确认
pub const CON_OK_PREFIX: &str = "con_ok:";

/// 断开通知（遗嘱消息与主动断开共用）
pub const CLOSE_CON_PREFIX: &str = "close_con:";

/// 握手超时默认值（秒）
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 15;

/// 移动分量下限
pub const AXIS_MIN: f64 = -1.0;

/// 移动分量上限
pub const AXIS_MAX: f64 = 1.0;

/// 拼接私有控制主题
pub fn control_topic(base: &str, client_id: &str) -> String {
    format!("{}/{}", base, client_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_topic() {
        assert_eq!(
            control_topic(CONTROL_TOPIC_BASE, "web-controller-1"),
            "topic/control/web-controller-1"
        );
    }
}
