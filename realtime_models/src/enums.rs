//! 通用枚举模块。
//!
//! 本模块定义了实时更新客户端与其使用方之间共享的枚举类型。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 实时更新客户端的连接生命周期状态。
///
/// 状态之间的迁移全部由客户端内部的驱动任务完成，使用方只能读取 (或订阅) 当前状态，
/// 例如用于在界面上显示一个连接状态指示灯。
///
/// 序列化与 `Display` 输出均为小写字符串 (`"disconnected"`、`"connecting"` 等)。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// 初始状态；也是手动断开或重连次数耗尽后的终止状态。
    #[default]
    Disconnected,
    /// 正在建立一次连接尝试，底层传输尚未报告打开。
    Connecting,
    /// 底层传输已打开，心跳正在运行。
    Connected,
    /// 连接意外断开，已安排一次退避延迟后的重连尝试。
    Reconnecting,
}

impl ConnectionStatus {
    /// 返回状态的小写字符串表示，与线上 JSON 表示一致。
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
        }
    }

    /// 是否存在一个打开中或已打开的底层传输 (此时 `connect` 为空操作)。
    pub fn has_live_transport(&self) -> bool {
        matches!(self, ConnectionStatus::Connecting | ConnectionStatus::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
