// realtime_ws_client/src/client/service.rs

//! 实时更新客户端服务。
//!
//! `RealtimeClient` 是使用方持有的句柄，所有方法都立即返回；真正的会话状态由一个独立的
//! 驱动任务 (`SessionDriver`) 独占。驱动任务用 `tokio::select!` 同时等待四类输入：
//! - 调用方命令 (连接、发送、断开、停止)；
//! - 传输层事件 (打开、文本、错误、关闭)，带有连接尝试的纪元号；
//! - 重连定时器；
//! - 心跳定时器。
//!
//! 所有状态迁移都发生在驱动任务的这一个分发点上，状态变化通过 `watch` 通道发布，
//! 使用方可以随时读取 (`status`) 或订阅 (`subscribe_status`)。

use std::sync::Arc; // 注册表在句柄与驱动任务之间共享
use std::time::Duration;

use log::{debug, error, info, warn}; // 日志宏
use realtime_models::ConnectionStatus;
use realtime_models::ws_payloads::{
    CONNECTION_ESTABLISHED_MESSAGE_TYPE, ConnectionEstablishedPayload, PING_MESSAGE_TYPE, PONG_MESSAGE_TYPE,
};
use tokio::sync::{mpsc, watch}; // mpsc 传命令和事件，watch 发布状态快照
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior}; // 使用 tokio 的时钟，测试中可以暂停

use super::backoff::{ReconnectPolicy, ReconnectState};
use super::endpoint::build_endpoint;
use super::registry::{HandlerId, HandlerRegistry};
use super::transport::{
    ABNORMAL_CLOSURE, Connector, EventSink, NORMAL_CLOSURE, Transport, TransportEvent, TungsteniteConnector,
};
use crate::message::WsMessage;

/// 心跳发送间隔的默认值。
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// 因心跳确认超时而主动关闭连接时使用的关闭码。
pub const PONG_TIMEOUT_CLOSE_CODE: u16 = 4000;
/// 心跳间隔的下限。更小的配置值 (包括零) 会被提升到该值。
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

/// 客户端配置。
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// 页面 origin，例如 `https://panel.example.com`。端点 URL 由它推导。
    pub origin: String,
    /// 断线重连策略。
    pub reconnect: ReconnectPolicy,
    /// 连接期间发送 `ping` 的间隔。
    pub heartbeat_interval: Duration,
    /// 超过 `heartbeat_interval + pong_timeout` 没有收到 `pong` 时视为连接静默失效。
    /// `None` 表示不做检测。
    pub pong_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            origin: "http://127.0.0.1:8080".to_string(),
            reconnect: ReconnectPolicy::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            pong_timeout: None,
        }
    }
}

impl ClientConfig {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            ..Self::default()
        }
    }
}

/// 连接状态快照，随每次状态迁移发布。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub status: ConnectionStatus,
    /// 当前连续失败次数；连接成功后归零。
    pub reconnect_attempts: u32,
    /// 下一次失败时将安排的退避延迟。
    pub current_delay: Duration,
}

#[derive(Debug)]
enum Command {
    Connect { user_id: String, is_admin: bool },
    Send(WsMessage),
    Disconnect,
    Shutdown,
}

// 连接身份与 connection_established 通知的附加字段是同一组数据
type Identity = ConnectionEstablishedPayload;

/// 实时更新客户端。
///
/// 由组合应用显式创建 (`start` / `with_connector`) 并显式停止 (`shutdown`)；
/// 句柄被丢弃时驱动任务同样会关闭连接并退出。
pub struct RealtimeClient {
    commands: mpsc::UnboundedSender<Command>,
    registry: Arc<HandlerRegistry>,
    status_rx: watch::Receiver<ConnectionSnapshot>,
    driver: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("snapshot", &*self.status_rx.borrow())
            .field("registry", &self.registry)
            .finish()
    }
}

impl RealtimeClient {
    /// 使用基于 `tokio-tungstenite` 的传输创建客户端。
    ///
    /// # Panics
    /// 必须在 tokio 运行时内调用。
    pub fn start(config: ClientConfig) -> Self {
        Self::with_connector(config, Arc::new(TungsteniteConnector::default()))
    }

    /// 使用自定义传输创建客户端并派生驱动任务。初始状态为 `Disconnected`。
    ///
    /// 小于 `MIN_HEARTBEAT_INTERVAL` 的心跳间隔会被提升到该下限并记录警告。
    ///
    /// # Panics
    /// 必须在 tokio 运行时内调用。
    pub fn with_connector(mut config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        if config.heartbeat_interval < MIN_HEARTBEAT_INTERVAL {
            warn!(
                "[实时客户端] 心跳间隔 {:?} 过小，已调整为 {:?}。",
                config.heartbeat_interval, MIN_HEARTBEAT_INTERVAL
            );
            config.heartbeat_interval = MIN_HEARTBEAT_INTERVAL; // interval_at 不接受零周期
        }
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let reconnect = ReconnectState::new(config.reconnect);
        let (status_tx, status_rx) = watch::channel(ConnectionSnapshot {
            status: ConnectionStatus::Disconnected,
            reconnect_attempts: reconnect.attempts(),
            current_delay: reconnect.current_delay(),
        });
        let registry = Arc::new(HandlerRegistry::new());

        let driver = SessionDriver {
            config,
            connector,
            registry: registry.clone(),
            status_tx,
            commands: commands_rx,
            events_tx,
            events_rx,
            status: ConnectionStatus::Disconnected,
            identity: None,
            reconnect,
            transport: None,
            epoch: 0,
            manual_close: false,
            reconnect_at: None,
            heartbeat: None,
            last_pong: None,
        };
        let handle = tokio::spawn(driver.run());

        Self {
            commands: commands_tx,
            registry,
            status_rx,
            driver: Some(handle),
        }
    }

    fn post(&self, command: Command) {
        if let Err(e) = self.commands.send(command) {
            warn!("[实时客户端] 驱动任务已停止，忽略命令: {:?}", e.0);
        }
    }

    /// 以给定身份连接。已连接或正在连接时为空操作。
    ///
    /// 身份参数会被保存，供之后的自动重连使用。
    pub fn connect(&self, user_id: impl Into<String>, is_admin: bool) {
        self.post(Command::Connect {
            user_id: user_id.into(),
            is_admin,
        });
    }

    /// 为 `message_type` 注册一个处理器，返回用于 `off` 的标识。
    pub fn on<F>(&self, message_type: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(&WsMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.registry.register(message_type, Arc::new(handler))
    }

    /// 注销处理器。找不到时返回 `false`。
    pub fn off(&self, message_type: &str, id: HandlerId) -> bool {
        self.registry.unregister(message_type, id)
    }

    /// 发送一条消息。只有在 `Connected` 状态下才会真正发出；否则丢弃并记录警告。
    pub fn send(&self, message: WsMessage) {
        self.post(Command::Send(message));
    }

    /// 手动断开：取消重连与心跳，以正常关闭码关闭连接。之后不会自动重连，直到再次调用 `connect`。
    pub fn disconnect(&self) {
        self.post(Command::Disconnect);
    }

    /// 当前连接状态。
    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().status
    }

    /// 当前状态快照 (状态、连续失败次数、当前退避延迟)。
    pub fn snapshot(&self) -> ConnectionSnapshot {
        *self.status_rx.borrow()
    }

    /// 订阅状态变化，例如用于驱动界面上的连接状态指示灯。
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.status_rx.clone()
    }

    /// 停止驱动任务并等待其退出。仍然打开的连接会以正常关闭码关闭。
    pub async fn shutdown(mut self) {
        self.post(Command::Shutdown);
        if let Some(handle) = self.driver.take() {
            if let Err(e) = handle.await {
                warn!("[实时客户端] 等待驱动任务结束时发生错误: {:?}", e);
            }
        }
    }
}

/// 会话驱动任务，独占全部会话状态。
struct SessionDriver {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    registry: Arc<HandlerRegistry>,
    status_tx: watch::Sender<ConnectionSnapshot>,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    events_rx: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
    status: ConnectionStatus,
    identity: Option<Identity>,
    reconnect: ReconnectState,
    /// 同一时刻至多一个活动传输。
    transport: Option<Box<dyn Transport>>,
    /// 每次连接尝试递增；事件纪元不等于它即为过期事件。
    epoch: u64,
    manual_close: bool, // 手动断开后不再自动重连
    reconnect_at: Option<Instant>, // 待定的重连时刻
    heartbeat: Option<Interval>, // 仅在 Connected 状态下存在
    last_pong: Option<Instant>,
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

async fn next_tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

impl SessionDriver {
    async fn run(mut self) {
        info!("[实时客户端] 驱动任务已启动，origin: {}", self.config.origin);
        loop {
            tokio::select! {
                biased; // 命令优先，保证 disconnect 先于同一时刻到期的定时器生效
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break, // 句柄被丢弃同样视为停止
                    Some(command) => self.handle_command(command),
                },
                Some((epoch, event)) = self.events_rx.recv() => self.handle_transport_event(epoch, event),
                _ = wait_until(self.reconnect_at) => self.handle_reconnect_timer(),
                _ = next_tick(self.heartbeat.as_mut()) => self.handle_heartbeat_tick(),
            }
        }
        self.manual_close = true; // 之后迟到的关闭事件不会触发重连
        self.detach_transport(NORMAL_CLOSURE, "client shutdown");
        self.set_status(ConnectionStatus::Disconnected);
        info!("[实时客户端] 驱动任务已停止。");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { user_id, is_admin } => self.handle_connect(Identity { user_id, is_admin }),
            Command::Send(message) => {
                if self.status == ConnectionStatus::Connected && self.transport.is_some() {
                    self.transmit(&message);
                } else {
                    warn!(
                        "[实时客户端] 当前状态为 {}，丢弃类型为 '{}' 的出站消息。",
                        self.status, message.message_type
                    );
                }
            }
            Command::Disconnect => {
                info!("[实时客户端] 收到手动断开请求 (当前状态: {})。", self.status);
                self.manual_close = true;
                self.detach_transport(NORMAL_CLOSURE, "client disconnect");
                self.set_status(ConnectionStatus::Disconnected);
            }
            Command::Shutdown => {}
        }
    }

    fn handle_connect(&mut self, identity: Identity) {
        if self.status.has_live_transport() {
            debug!("[实时客户端] 已处于 {} 状态，忽略重复的连接请求。", self.status);
            return;
        }

        match self.status {
            ConnectionStatus::Reconnecting => {
                info!("[实时客户端] 取消待定的重连定时器，立即以新身份发起连接。");
                self.reconnect_at = None;
            }
            _ => self.reconnect.reset(),
        }
        self.identity = Some(identity);
        self.manual_close = false;
        self.open_transport();
    }

    /// 以保存的身份发起一次新的连接尝试。构造失败按异常关闭处理。
    fn open_transport(&mut self) {
        let Some(identity) = self.identity.clone() else {
            warn!("[实时客户端] 没有保存的连接身份，无法发起连接。");
            self.set_status(ConnectionStatus::Disconnected);
            return;
        };

        self.epoch += 1; // 新的连接尝试，旧传输的事件从此过期
        self.set_status(ConnectionStatus::Connecting);

        let url = match build_endpoint(&self.config.origin, &identity.user_id, identity.is_admin) {
            Ok(url) => url,
            Err(e) => {
                error!("[实时客户端] 构造端点 URL 失败: {}", e);
                self.handle_connection_lost(ABNORMAL_CLOSURE, &e.to_string());
                return;
            }
        };

        info!("[实时客户端] 发起连接尝试 (epoch={})，URL: {}", self.epoch, url);
        let sink = EventSink::new(self.epoch, self.events_tx.clone()); // 事件出口绑定当前纪元
        match self.connector.open(&url, sink) {
            Ok(transport) => self.transport = Some(transport),
            Err(e) => {
                error!("[实时客户端] 创建传输失败: {}", e);
                self.handle_connection_lost(ABNORMAL_CLOSURE, &e.to_string());
            }
        }
    }

    fn handle_transport_event(&mut self, epoch: u64, event: TransportEvent) {
        if epoch != self.epoch || self.transport.is_none() {
            debug!("[实时客户端] 忽略过期的传输事件 (epoch={}, 当前={}): {:?}", epoch, self.epoch, event);
            return;
        }

        match event {
            TransportEvent::Opened => self.handle_opened(),
            TransportEvent::Message(text) => self.handle_text(&text),
            TransportEvent::Error(reason) => {
                error!("[实时客户端] 传输层错误 (epoch={}): {}", epoch, reason);
            }
            TransportEvent::Closed { code, reason } => {
                info!("[实时客户端] 连接已关闭 (epoch={}, code={}, reason='{}')", epoch, code, reason);
                self.transport = None; // 传输已结束，无需再关闭
                self.handle_connection_lost(code, &reason);
            }
        }
    }

    fn handle_opened(&mut self) {
        if self.status != ConnectionStatus::Connecting {
            debug!("[实时客户端] 在 {} 状态下收到打开事件，忽略。", self.status);
            return;
        }

        self.reconnect.reset(); // 连接成功，失败计数归零
        self.set_status(ConnectionStatus::Connected);

        let now = Instant::now();
        self.last_pong = Some(now);
        let period = self.config.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(now + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay); // 错过的心跳不补发
        self.heartbeat = Some(heartbeat);

        if let Some(identity) = &self.identity {
            // 身份信息以顶层字段随通知发送，服务端据此登记该连接
            match WsMessage::new(CONNECTION_ESTABLISHED_MESSAGE_TYPE).with_fields(identity) {
                Ok(notice) => self.transmit(&notice),
                Err(e) => error!("[实时客户端] 构造连接建立通知失败: {}", e),
            }
        }
    }

    fn handle_text(&mut self, text: &str) {
        let message = match WsMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("[实时客户端] 丢弃无法解析的入站消息: {}，原始文本: '{}'", e, text);
                return;
            }
        };

        if message.is_type(PONG_MESSAGE_TYPE) {
            debug!("[实时客户端] 收到 Pong 消息。");
            self.last_pong = Some(Instant::now()); // 只刷新静默计时，不分发
            return;
        }

        let report = self.registry.dispatch(&message);
        debug!(
            "[实时客户端] 类型为 '{}' 的消息已分发给 {} 个处理器 ({} 个失败)。",
            message.message_type, report.invoked, report.failed
        );
    }

    /// 连接尝试失败或已建立的连接断开后的统一出口。
    fn handle_connection_lost(&mut self, code: u16, reason: &str) {
        self.heartbeat = None; // 连接已不可用，停止心跳
        self.last_pong = None;

        if self.manual_close {
            self.set_status(ConnectionStatus::Disconnected);
            return;
        }
        if code == NORMAL_CLOSURE {
            info!("[实时客户端] 服务端以正常关闭码结束连接 ('{}')，不再自动重连。", reason);
            self.set_status(ConnectionStatus::Disconnected);
            return;
        }

        match self.reconnect.record_failure() {
            Some(delay) => {
                info!(
                    "[实时客户端] 将在 {:?} 后进行第 {} 次重连 (code={})。",
                    delay,
                    self.reconnect.attempts(),
                    code
                );
                self.reconnect_at = Some(Instant::now() + delay);
                self.set_status(ConnectionStatus::Reconnecting);
            }
            None => {
                warn!(
                    "[实时客户端] 已连续失败 {} 次，放弃自动重连。",
                    self.reconnect.attempts()
                );
                self.reconnect_at = None;
                self.set_status(ConnectionStatus::Disconnected);
            }
        }
    }

    fn handle_reconnect_timer(&mut self) {
        self.reconnect_at = None;
        if self.status != ConnectionStatus::Reconnecting {
            return;
        }
        self.open_transport();
    }

    fn handle_heartbeat_tick(&mut self) {
        if self.status != ConnectionStatus::Connected {
            self.heartbeat = None;
            return;
        }

        if let (Some(pong_timeout), Some(last_pong)) = (self.config.pong_timeout, self.last_pong) {
            let silence = last_pong.elapsed();
            if silence > self.config.heartbeat_interval + pong_timeout {
                warn!("[实时客户端] {:?} 内未收到 Pong，判定连接已静默失效。", silence);
                self.detach_transport(PONG_TIMEOUT_CLOSE_CODE, "pong timeout");
                self.handle_connection_lost(PONG_TIMEOUT_CLOSE_CODE, "pong timeout");
                return;
            }
        }

        debug!("[实时客户端] 发送 Ping 消息...");
        self.transmit(&WsMessage::new(PING_MESSAGE_TYPE));
    }

    fn transmit(&self, message: &WsMessage) {
        let Some(transport) = &self.transport else {
            warn!("[实时客户端] 传输不存在，丢弃类型为 '{}' 的消息。", message.message_type);
            return;
        };
        match message.to_json() {
            Ok(text) => {
                if let Err(e) = transport.send_text(text) {
                    warn!("[实时客户端] 发送类型为 '{}' 的消息失败: {}", message.message_type, e);
                }
            }
            Err(e) => error!("[实时客户端] {}", e),
        }
    }

    /// 取消两个定时器并关闭当前传输；该传输之后的事件都会被当作过期事件忽略。
    fn detach_transport(&mut self, code: u16, reason: &str) {
        self.reconnect_at = None;
        self.heartbeat = None;
        self.last_pong = None;
        if let Some(transport) = self.transport.take() {
            transport.close(code, reason);
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            info!("[实时客户端] 连接状态: {} -> {}", self.status, status);
        }
        self.status = status;
        // 没有订阅者时 send 会失败，send_replace 总是更新值
        self.status_tx.send_replace(ConnectionSnapshot {
            status,
            reconnect_attempts: self.reconnect.attempts(),
            current_delay: self.reconnect.current_delay(),
        });
    }
}
