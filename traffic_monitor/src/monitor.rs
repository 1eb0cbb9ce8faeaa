//! 流量更新处理器与连接状态指示。

use log::{info, warn};
use realtime_models::ws_payloads::{NodeTrafficUpdatePayload, NODE_TRAFFIC_UPDATE_MESSAGE_TYPE};
use realtime_models::ConnectionStatus;
use realtime_ws_client::client::HandlerId;
use realtime_ws_client::{ConnectionSnapshot, RealtimeClient, WsMessage};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// 将一条节点流量更新整理为一行日志文本。
pub fn describe_traffic_update(payload: &NodeTrafficUpdatePayload) -> String {
    let mut line = format!("节点 {} 当前流量 {} 字节", payload.domain_as_id, payload.traffic);
    if !payload.counters.is_empty() {
        let mut counters: Vec<String> = payload
            .counters
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        counters.sort();
        line.push_str(&format!("，其它计数: {}", counters.join(", ")));
    }
    line
}

/// `node_traffic_update` 的处理器：载荷无法解析时返回错误，由注册表记录。
pub fn handle_traffic_update(message: &WsMessage) -> anyhow::Result<()> {
    let payload: NodeTrafficUpdatePayload = message.data_as()?;
    info!("[流量监视] {}", describe_traffic_update(&payload));
    Ok(())
}

pub fn register_handlers(client: &RealtimeClient) -> HandlerId {
    client.on(NODE_TRAFFIC_UPDATE_MESSAGE_TYPE, handle_traffic_update)
}

/// 是否因重连预算耗尽而停止。手动断开时失败计数小于 `max_attempts`，不算放弃。
pub fn gave_up(snapshot: &ConnectionSnapshot, max_attempts: u32) -> bool {
    snapshot.status == ConnectionStatus::Disconnected && max_attempts > 0 && snapshot.reconnect_attempts >= max_attempts
}

/// 连接状态指示文本。
pub fn status_indicator(snapshot: &ConnectionSnapshot, max_attempts: u32) -> String {
    match snapshot.status {
        ConnectionStatus::Connected => "● 已连接".to_string(),
        ConnectionStatus::Connecting => "◐ 连接中".to_string(),
        ConnectionStatus::Reconnecting => format!(
            "◌ 重连中 (第 {} 次失败，当前退避 {:?})",
            snapshot.reconnect_attempts, snapshot.current_delay
        ),
        ConnectionStatus::Disconnected if gave_up(snapshot, max_attempts) => {
            format!("○ 已断开 (连续失败 {} 次后放弃)", snapshot.reconnect_attempts)
        }
        ConnectionStatus::Disconnected => "○ 已断开".to_string(),
    }
}

/// 派生一个任务，在每次状态变化时输出指示文本。客户端停止后任务自动结束。
///
/// `max_attempts` 为客户端重连策略中的同名值，用于区分放弃重连与手动断开。
pub fn spawn_status_indicator(
    mut status_rx: watch::Receiver<ConnectionSnapshot>,
    max_attempts: u32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let initial = *status_rx.borrow_and_update(); // 先输出一次当前状态
        let mut last = initial.status;
        info!("[状态指示] {}", status_indicator(&initial, max_attempts));
        while status_rx.changed().await.is_ok() {
            let snapshot = *status_rx.borrow_and_update();
            if snapshot.status == last {
                continue;
            }
            last = snapshot.status;
            if gave_up(&snapshot, max_attempts) {
                warn!("[状态指示] {}", status_indicator(&snapshot, max_attempts)); // 放弃重连需要人工介入
            } else {
                info!("[状态指示] {}", status_indicator(&snapshot, max_attempts));
            }
        }
        info!("[状态指示] 客户端已停止，状态指示任务结束。");
    })
}
