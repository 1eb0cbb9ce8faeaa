// realtime_models/src/ws_payloads.rs

//! 包含实时推送通道中使用的消息类型标签与负载结构体定义。
//!
//! 每条消息的外层信封 (`type` / `timestamp` / `data`) 由 `realtime_ws_client::message::WsMessage`
//! 定义；本模块只描述 `type` 的取值以及各类型消息 `data` 字段的具体结构。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 客户端定期发送的心跳消息类型。
pub const PING_MESSAGE_TYPE: &str = "ping";
/// 服务端对心跳的确认消息类型。客户端内部消费，永远不会分发给已注册的处理器。
pub const PONG_MESSAGE_TYPE: &str = "pong";
/// 连接打开后客户端发送的一次性通知消息类型。
pub const CONNECTION_ESTABLISHED_MESSAGE_TYPE: &str = "connection_established";
/// 服务端推送的节点流量更新消息类型，由面板的流量视图消费。
pub const NODE_TRAFFIC_UPDATE_MESSAGE_TYPE: &str = "node_traffic_update";

/// 连接建立通知中携带的身份信息。
///
/// 以附加的顶层字段形式随 `connection_established` 消息发送。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConnectionEstablishedPayload {
    /// 调用方提供的主体标识，可能为空字符串。
    pub user_id: String,
    /// 是否以管理员身份连接。
    pub is_admin: bool,
}

/// `node_traffic_update` 消息的 `data` 负载。
///
/// 除 `domain_as_id` 与 `traffic` 外，服务端可能附带其它计数器 (例如上下行分量)，
/// 这些字段原样保留在 `counters` 中。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NodeTrafficUpdatePayload {
    /// 节点对应的域名标识。
    pub domain_as_id: String,
    /// 更新后的累计流量 (字节)。
    #[serde(default)]
    pub traffic: u64,
    /// 其它未建模的计数器字段。
    #[serde(flatten)]
    pub counters: Map<String, Value>,
}
