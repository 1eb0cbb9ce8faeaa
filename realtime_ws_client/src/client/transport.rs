// realtime_ws_client/src/client/transport.rs

//! 客户端 WebSocket 传输层。
//!
//! 传输层被抽象为一个多态能力 {open, send, close}：
//! - `Connector::open` 发起一次连接尝试，立即返回一个 `Transport` 句柄；
//! - 连接过程中以及连接之后发生的一切 (打开、收到文本、错误、关闭) 都以 `TransportEvent`
//!   的形式通过 `EventSink` 投递给客户端的驱动任务，由驱动任务集中推进状态机。
//!
//! `TungsteniteConnector` 是基于 `tokio-tungstenite` 的真实实现：每次连接尝试派生一个 IO 任务，
//! 该任务负责握手、转发出站消息以及把入站帧翻译成事件。

use std::time::Duration;

use futures_util::{SinkExt, StreamExt}; // split 之后的读写两端需要这两个扩展 trait
use log::{debug, error, info, warn}; // 引入日志宏，用于不同级别的日志输出
use tokio::sync::mpsc; // IO 任务与驱动任务之间的通道
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::Error as TungsteniteError,
    tungstenite::protocol::{CloseFrame, Message, frame::coding::CloseCode},
};
use url::Url; // 连接目标

use crate::error::WsError; // 引入本库定义的统一错误类型

/// 正常关闭 (手动断开时使用)。
pub const NORMAL_CLOSURE: u16 = 1000;
/// 对端未给出状态码就关闭。
pub const NO_STATUS_RECEIVED: u16 = 1005;
/// 异常关闭：网络中断、握手失败、未收到关闭帧等。
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// 握手 (TCP 连接 + HTTP 升级) 的默认超时时间。
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// `ClientWsStream` 类型别名，代表一个可能经过 TLS 加密的 TCP WebSocket 流。
pub type ClientWsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// 传输层向驱动任务报告的事件。
///
/// 约定：一次失败的连接尝试可以先发出 `Error`，但最终必须发出 `Closed`；
/// 驱动任务只依据 `Closed` 推进状态机，`Error` 仅用于记录日志。
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// 握手完成，连接已打开。
    Opened,
    /// 收到一条文本帧。
    Message(String),
    /// 发生传输层错误。
    Error(String),
    /// 连接已关闭。`code` 为 WebSocket 关闭码。
    Closed { code: u16, reason: String },
}

/// 交给 `Connector` 的事件出口，每次连接尝试一个。
///
/// 事件携带所属连接尝试的纪元号，驱动任务据此丢弃已被替换或已被手动关闭的旧传输所产生的事件。
#[derive(Debug, Clone)]
pub struct EventSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl EventSink {
    pub fn new(epoch: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { epoch, tx }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// 投递一个事件。驱动任务已经退出时返回 `false`。
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.epoch, event)).is_ok()
    }
}

/// 一次连接尝试的句柄。
///
/// 两个方法都不阻塞；发送失败只意味着 IO 任务已经结束，关闭事件会另行到达。
/// 句柄被丢弃时，实现应当以正常关闭码结束连接。
pub trait Transport: Send {
    fn send_text(&self, text: String) -> Result<(), WsError>;
    fn close(&self, code: u16, reason: &str);
}

/// 创建传输的能力。
pub trait Connector: Send + Sync {
    /// 发起一次到 `url` 的连接尝试。
    ///
    /// 返回 `Err` 表示传输无法构造 (例如 URL 不受支持)，客户端会把它当作一次连接失败处理。
    fn open(&self, url: &Url, events: EventSink) -> Result<Box<dyn Transport>, WsError>;
}

enum Outbound {
    Text(String),
    Close(u16, String),
}

/// 基于 `tokio-tungstenite` 的连接器。
///
/// 握手超过 `handshake_timeout` 仍未完成时按异常关闭 (1006) 上报，由客户端走重连流程。
#[derive(Debug, Clone, Copy)]
pub struct TungsteniteConnector {
    handshake_timeout: Duration,
}

impl Default for TungsteniteConnector {
    fn default() -> Self {
        Self::with_handshake_timeout(DEFAULT_HANDSHAKE_TIMEOUT)
    }
}

impl TungsteniteConnector {
    pub fn with_handshake_timeout(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

/// `TungsteniteConnector` 创建的传输句柄，通过通道把出站请求转交给 IO 任务。
pub struct TungsteniteTransport {
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Transport for TungsteniteTransport {
    fn send_text(&self, text: String) -> Result<(), WsError> {
        self.outbound.send(Outbound::Text(text)).map_err(|_| WsError::SendErrorClosed)
    }

    fn close(&self, code: u16, reason: &str) {
        if self.outbound.send(Outbound::Close(code, reason.to_string())).is_err() {
            debug!("客户端：IO 任务已结束，忽略关闭请求 (code={})", code);
        }
    }
}

impl Connector for TungsteniteConnector {
    /// 派生 IO 任务后立即返回。必须在 tokio 运行时内调用。
    fn open(&self, url: &Url, events: EventSink) -> Result<Box<dyn Transport>, WsError> {
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(WsError::InvalidUrl(format!("不支持的 WebSocket scheme '{}': {}", other, url)));
            }
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel(); // 出站请求通道，发送端交给传输句柄
        tokio::spawn(run_connection(url.to_string(), self.handshake_timeout, events, outbound_rx));
        Ok(Box::new(TungsteniteTransport { outbound: outbound_tx }))
    }
}

/// 单次连接尝试的 IO 任务：握手，然后在出站请求与入站帧之间循环。
async fn run_connection(
    url: String,
    handshake_timeout: Duration,
    events: EventSink,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    info!("客户端：开始尝试连接到 WebSocket 服务器 (epoch={})，URL: {}", events.epoch(), url);

    let handshake = tokio::time::timeout(handshake_timeout, connect_async(url.as_str()));
    tokio::pin!(handshake); // 需要在循环中多次轮询同一个握手 future

    let ws_stream = loop {
        tokio::select! {
            result = &mut handshake => match result {
                Ok(Ok((ws_stream, response))) => {
                    info!("客户端：已成功连接到 {} (HTTP 状态码: {})", url, response.status());
                    break ws_stream;
                }
                Err(_elapsed) => {
                    error!("客户端：连接到 {} 的握手在 {:?} 内未完成，放弃本次连接。", url, handshake_timeout);
                    let reason = format!("握手超时 ({:?})", handshake_timeout);
                    events.emit(TransportEvent::Error(reason.clone()));
                    events.emit(TransportEvent::Closed { code: ABNORMAL_CLOSURE, reason });
                    return;
                }
                Ok(Err(e)) => {
                    error!("客户端：连接到 {} 失败，错误: {}", url, e);
                    events.emit(TransportEvent::Error(e.to_string()));
                    events.emit(TransportEvent::Closed { code: ABNORMAL_CLOSURE, reason: e.to_string() });
                    return;
                }
            },
            request = outbound.recv() => match request {
                Some(Outbound::Text(_)) => {
                    warn!("客户端：握手尚未完成，丢弃出站消息。");
                }
                Some(Outbound::Close(code, reason)) => {
                    debug!("客户端：握手期间收到关闭请求 (code={})，放弃本次连接。", code);
                    events.emit(TransportEvent::Closed { code, reason });
                    return;
                }
                None => {
                    debug!("客户端：传输句柄已丢弃，放弃本次连接。");
                    return;
                }
            },
        }
    };

    events.emit(TransportEvent::Opened);
    let (mut ws_sender, mut ws_receiver) = ws_stream.split(); // 拆分为发送端和接收端

    loop {
        tokio::select! {
            request = outbound.recv() => match request {
                Some(Outbound::Text(text)) => {
                    debug!("客户端：准备发送消息: {}", text);
                    if let Err(e) = ws_sender.send(Message::Text(text)).await {
                        error!("客户端：发送消息失败: {}", e);
                        events.emit(TransportEvent::Error(e.to_string()));
                        events.emit(TransportEvent::Closed { code: ABNORMAL_CLOSURE, reason: e.to_string() });
                        return;
                    }
                }
                Some(Outbound::Close(code, reason)) => {
                    send_close_frame(&mut ws_sender, code, &reason).await;
                    events.emit(TransportEvent::Closed { code, reason });
                    return;
                }
                None => {
                    // 传输句柄被丢弃，以正常关闭码结束连接
                    send_close_frame(&mut ws_sender, NORMAL_CLOSURE, "").await;
                    return;
                }
            },
            frame = ws_receiver.next() => {
                if let Some(event) = translate_frame(frame) {
                    let closing = matches!(event, TransportEvent::Closed { .. });
                    events.emit(event);
                    if closing {
                        return;
                    }
                }
            }
        }
    }
}

async fn send_close_frame(
    ws_sender: &mut futures_util::stream::SplitSink<ClientWsStream, Message>,
    code: u16,
    reason: &str,
) {
    let frame = CloseFrame { code: CloseCode::from(code), reason: reason.to_string().into() };
    if let Err(e) = ws_sender.send(Message::Close(Some(frame))).await {
        debug!("客户端：发送 Close 帧失败 (连接可能已断开): {}", e);
    }
}

/// 把一个入站帧 (或流结束) 翻译成事件。返回 `None` 表示该帧无需上报。
fn translate_frame(frame: Option<Result<Message, TungsteniteError>>) -> Option<TransportEvent> {
    match frame {
        Some(Ok(Message::Text(text))) => {
            debug!("客户端：收到原始文本消息，内容: '{}'", text);
            Some(TransportEvent::Message(text))
        }
        Some(Ok(Message::Binary(bin))) => {
            warn!("客户端：收到非预期的二进制消息 ({} 字节)，已丢弃。", bin.len());
            None
        }
        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {
            // 控制帧由 tungstenite 自动应答
            None
        }
        Some(Ok(Message::Close(close_frame))) => {
            debug!("客户端：收到 Close 控制帧，详细信息: {:?}", close_frame);
            let (code, reason) = match close_frame {
                Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                None => (NO_STATUS_RECEIVED, String::new()),
            };
            Some(TransportEvent::Closed { code, reason })
        }
        Some(Err(TungsteniteError::ConnectionClosed)) | Some(Err(TungsteniteError::AlreadyClosed)) | None => {
            debug!("客户端：WebSocket 接收流已结束，未收到 Close 帧。");
            Some(TransportEvent::Closed { code: ABNORMAL_CLOSURE, reason: "连接意外结束".to_string() })
        }
        Some(Err(e)) => {
            error!("客户端：从 WebSocket 流接收消息时发生底层错误: {}", e);
            Some(TransportEvent::Closed { code: ABNORMAL_CLOSURE, reason: e.to_string() })
        }
    }
}
