//! `realtime_models` 实时推送通道的公共模型库 crate。
//!
//! 本 crate 集中定义了管理面板后端与实时更新客户端 (`realtime_ws_client`) 之间
//! 通过 WebSocket 交换的消息词汇：消息类型标签常量、各类消息的 `data` 负载结构体，
//! 以及客户端连接生命周期状态枚举。
//!
//! 主要包含：
//! - **WebSocket 消息负载 (`ws_payloads`)**: 心跳、连接建立通知、节点流量更新等消息的类型标签与负载结构体。
//! - **通用枚举 (`enums`)**: 客户端连接状态 (`ConnectionStatus`)。
//!
//! 所有模型都派生 `serde::Serialize` / `serde::Deserialize`、`Debug` 与 `Clone`，
//! 以便在客户端库、组合应用和测试之间共享。

pub mod enums; // 通用枚举类型定义
pub mod ws_payloads; // WebSocket 通信中使用的消息类型标签与负载结构体

pub use enums::ConnectionStatus;
