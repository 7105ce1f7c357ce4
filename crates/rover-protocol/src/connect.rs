//! 连接主题报文
//!
//! 共享连接主题上只有四种文本报文：
//!
//! ```text
//! Controller                         Robot
//!     │ ── init_con:{client} ──────────► │
//!     │ ◄──────────── con_ok:{peer} ──── │
//!     │ ── con_ok:{client}:{peer} ─────► │
//!     │                                  │
//!     │ ── close_con:{client} ─────────► │   （主动断开或 broker 遗嘱）
//! ```
//!
//! `con_ok:` 的两种形态靠冒号分隔的标识符数量区分：一个标识符是机器人的应答，
//! 两个标识符是控制器的确认（包括本端自己发出后被 broker 回送的那一条）。

use crate::ProtocolError;
use crate::constants::{CLOSE_CON_PREFIX, CON_OK_PREFIX, INIT_CON_PREFIX};
use std::fmt;

/// 连接主题上的报文
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectMessage {
    /// `init_con:{client_id}`
    InitCon { client_id: String },

    /// `con_ok:{peer_id}`（机器人应答）
    PeerOffer { peer_id: String },

    /// `con_ok:{client_id}:{peer_id}`（控制器确认）
    Ack { client_id: String, peer_id: String },

    /// `close_con:{client_id}`
    ///
    /// 接收方只看前缀，标识符仅用于日志。
    CloseCon { client_id: String },
}

impl ConnectMessage {
    /// 构造本端的遗嘱 / 主动断开报文
    pub fn close_for(client_id: &str) -> Self {
        ConnectMessage::CloseCon {
            client_id: client_id.to_string(),
        }
    }

    /// 解析连接主题报文
    pub fn parse(payload: &str) -> Result<Self, ProtocolError> {
        if let Some(rest) = payload.strip_prefix(INIT_CON_PREFIX) {
            if rest.is_empty() || rest.contains(':') {
                return Err(ProtocolError::InvalidConnectMessage(payload.to_string()));
            }
            return Ok(ConnectMessage::InitCon {
                client_id: rest.to_string(),
            });
        }

        if let Some(rest) = payload.strip_prefix(CON_OK_PREFIX) {
            let ids: Vec<&str> = rest.split(':').collect();
            return match ids.as_slice() {
                [peer] if !peer.is_empty() => Ok(ConnectMessage::PeerOffer {
                    peer_id: peer.to_string(),
                }),
                [client, peer] if !client.is_empty() && !peer.is_empty() => {
                    Ok(ConnectMessage::Ack {
                        client_id: client.to_string(),
                        peer_id: peer.to_string(),
                    })
                },
                _ => Err(ProtocolError::InvalidConnectMessage(payload.to_string())),
            };
        }

        if let Some(rest) = payload.strip_prefix(CLOSE_CON_PREFIX) {
            return Ok(ConnectMessage::CloseCon {
                client_id: rest.to_string(),
            });
        }

        Err(ProtocolError::InvalidConnectMessage(payload.to_string()))
    }

    /// 编码为总线负载
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ConnectMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectMessage::InitCon { client_id } => write!(f, "{INIT_CON_PREFIX}{client_id}"),
            ConnectMessage::PeerOffer { peer_id } => write!(f, "{CON_OK_PREFIX}{peer_id}"),
            ConnectMessage::Ack { client_id, peer_id } => {
                write!(f, "{CON_OK_PREFIX}{client_id}:{peer_id}")
            },
            ConnectMessage::CloseCon { client_id } => write!(f, "{CLOSE_CON_PREFIX}{client_id}"),
        }
    }
}
