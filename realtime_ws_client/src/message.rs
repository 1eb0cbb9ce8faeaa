// realtime_ws_client/src/message.rs

//! 定义实时推送通道中使用的消息信封结构。
//!
//! 线上的每条消息都是一个 JSON 对象：`type` 字段是消息类型标签，`timestamp` 是
//! ISO-8601 时间戳 (客户端发出的消息总是携带，服务端消息可以省略)，`data` 是不透明的
//! 业务负载；其余顶层字段原样保留在 `extra` 中，既不丢弃也不改写。

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::WsError;

/// `WsMessage` 代表客户端与服务端之间交换的一条消息。
///
/// 出站形状：`{ "type": "...", "timestamp": "2024-01-01T00:00:00.000Z", ...附加字段 }`；
/// 入站形状：`{ "type": "...", "data": { ... }, ... }`。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WsMessage {
    /// 消息类型标签，例如 `"ping"`、`"node_traffic_update"`。
    /// 处理器注册表按此字段路由消息。
    #[serde(rename = "type")]
    pub message_type: String,

    /// 消息创建时间 (UTC，RFC 3339，毫秒精度)。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// 不透明的业务负载，其结构由 `message_type` 决定。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// 除上述字段外的所有顶层字段。
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WsMessage {
    /// 创建一个不带负载、以当前 UTC 时间打上时间戳的消息。
    pub fn new(message_type: impl Into<String>) -> Self {
        WsMessage {
            message_type: message_type.into(),
            timestamp: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
            data: None,
            extra: Map::new(),
        }
    }

    /// 创建一个携带 `data` 负载的消息。
    ///
    /// 负载无法序列化为 JSON 时返回 `WsError::SerializationError`。这是调用方本地的构造错误，
    /// 与连接状态无关。
    pub fn with_data<T: Serialize>(message_type: impl Into<String>, data: &T) -> Result<Self, WsError> {
        let message_type = message_type.into();
        let value = serde_json::to_value(data).map_err(|e| {
            WsError::SerializationError(format!("创建类型为 '{}' 的消息时序列化负载失败: {}", message_type, e))
        })?;
        let mut message = WsMessage::new(message_type);
        message.data = Some(value);
        Ok(message)
    }

    /// 追加一个顶层附加字段，返回修改后的消息，便于链式构造。
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// 把一个结构体的各字段展开为顶层附加字段，例如连接建立通知中的身份信息。
    ///
    /// `fields` 必须序列化为 JSON 对象，否则返回 `WsError::SerializationError`。
    pub fn with_fields<T: Serialize>(mut self, fields: &T) -> Result<Self, WsError> {
        match serde_json::to_value(fields) {
            Ok(Value::Object(map)) => {
                self.extra.extend(map); // 同名字段以后写入的为准
                Ok(self)
            }
            Ok(other) => Err(WsError::SerializationError(format!(
                "类型为 '{}' 的消息的附加字段必须是 JSON 对象，实际为: {}",
                self.message_type, other
            ))),
            Err(e) => Err(WsError::SerializationError(format!(
                "类型为 '{}' 的消息序列化附加字段失败: {}",
                self.message_type, e
            ))),
        }
    }

    /// 消息类型是否等于给定标签。
    pub fn is_type(&self, message_type: &str) -> bool {
        self.message_type == message_type
    }

    /// 将 `data` 负载反序列化为指定的目标类型 `T`。
    ///
    /// 缺少 `data` 时按 JSON `null` 处理，因此只有能从 `null` 构造的类型 (例如 `Option<_>`) 才会成功。
    pub fn data_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T, WsError> {
        let data = self.data.clone().unwrap_or(Value::Null);
        serde_json::from_value(data).map_err(|e| {
            WsError::DeserializationError(format!(
                "类型为 '{}' 的消息负载反序列化为目标类型失败: {}",
                self.message_type, e
            ))
        })
    }

    /// 将消息序列化为 JSON 文本。
    pub fn to_json(&self) -> Result<String, WsError> {
        serde_json::to_string(self)
            .map_err(|e| WsError::SerializationError(format!("消息序列化为JSON失败: {}", e)))
    }

    /// 从 JSON 文本解析消息。缺少 `type` 字段或不是 JSON 对象时返回错误。
    pub fn from_json(text: &str) -> Result<Self, WsError> {
        serde_json::from_str(text).map_err(|e| {
            WsError::DeserializationError(format!("收到的文本消息反序列化为 WsMessage 失败: {}", e))
        })
    }
}
