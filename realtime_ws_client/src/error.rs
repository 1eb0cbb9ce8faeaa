// realtime_ws_client/src/error.rs

//! 定义实时更新客户端相关的错误类型。
//!
//! 注意：传输层故障 (连接失败、异常关闭等) 不会以错误的形式返回给 `RealtimeClient` 的调用方，
//! 它们只驱动内部状态机并被记录到日志。`WsError` 只出现在调用方本地可处理的场合，
//! 例如构造消息、构造端点 URL，以及 `Connector`/`Transport` 实现的内部返回值。

use thiserror::Error;

/// 实时更新客户端的统一错误类型。
#[derive(Error, Debug)]
pub enum WsError {
    /// 当 serde 序列化失败时返回。
    #[error("序列化错误: {0}")]
    SerializationError(String),

    /// 当 serde 反序列化失败时返回。
    #[error("反序列化错误: {0}")]
    DeserializationError(String),

    /// 当尝试通过一个已关闭的传输通道发送时发生。
    #[error("发送错误: 通道已关闭")]
    SendErrorClosed,

    /// 无效的 URL 格式，或无法从 origin 推导出 WebSocket 端点。
    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    /// 通用消息错误，用于其他未明确分类的错误。
    #[error("消息错误: {0}")]
    Message(String),
}
