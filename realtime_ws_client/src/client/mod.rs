// realtime_ws_client/src/client/mod.rs

//! 实时更新客户端。
//!
//! - `service`: 对外的 `RealtimeClient` 句柄与内部会话驱动任务；
//! - `transport`: 传输层抽象 (`Connector` / `Transport`) 及基于 `tokio-tungstenite` 的实现；
//! - `registry`: 按消息类型分发的处理器注册表；
//! - `backoff`: 断线重连的指数退避策略；
//! - `endpoint`: 由页面 origin 推导端点 URL。

pub mod backoff;
pub mod endpoint;
pub mod registry;
pub mod service;
pub mod transport;

pub use backoff::ReconnectPolicy;
pub use registry::HandlerId;
pub use transport::{Connector, EventSink, Transport, TransportEvent};
