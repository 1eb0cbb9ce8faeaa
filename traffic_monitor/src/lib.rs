//! `traffic_monitor` 监视器核心库。
//!
//! 组合 `realtime_ws_client`：从 JSON 配置文件构造客户端，注册节点流量更新处理器，
//! 并把连接状态变化输出为日志 (连接状态指示)。
//!
//! 主要模块包括：
//! - `config`: 配置文件的加载、创建与校验。
//! - `error`: 定义应用特定的错误类型。
//! - `monitor`: 流量更新处理器与连接状态指示任务。

pub mod config;
pub mod error;
pub mod monitor;
