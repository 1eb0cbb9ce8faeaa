//! `realtime_ws_client` 是管理面板使用的实时更新客户端 Crate。
//!
//! 它维护一条到服务端 `/ws` 端点的持久双向连接：断线后按指数退避自动重连，
//! 按消息类型把收到的消息分发给已注册的处理器，并在连接期间定时发送心跳。
//! 传输层的断开对使用方透明，使用方只能通过连接状态观察到它。
//!
//! 主要模块包括：
//! - `message`: 定义消息信封结构 `WsMessage`。
//! - `error`: 定义库中使用的错误类型 `WsError`。
//! - `client`: 端点构造、重连策略、处理器注册表、传输层抽象以及客户端本体 `RealtimeClient`。

pub mod client;
pub mod error;
pub mod message;

pub use client::service::{ClientConfig, ConnectionSnapshot, RealtimeClient};
pub use error::WsError;
pub use message::WsMessage;
pub use realtime_models::ConnectionStatus;
