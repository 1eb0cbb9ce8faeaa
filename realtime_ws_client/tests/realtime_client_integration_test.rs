// realtime_ws_client/tests/realtime_client_integration_test.rs

use futures_util::{SinkExt, StreamExt};
use log::{LevelFilter, info, warn};
use realtime_models::ws_payloads::{NODE_TRAFFIC_UPDATE_MESSAGE_TYPE, NodeTrafficUpdatePayload};
use realtime_ws_client::client::ReconnectPolicy;
use realtime_ws_client::{ClientConfig, ConnectionStatus, RealtimeClient, WsMessage};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::Message as TungsteniteMessage;

// 辅助函数：初始化日志，仅用于测试，避免多次初始化
fn init_test_logger() {
    let _ = env_logger::builder().filter_level(LevelFilter::Info).is_test(true).try_init();
}

/// 测试服务端观察到的事件。
#[derive(Debug)]
enum ServerEvent {
    Handshake(String),
    Text(String),
    Closed(u16),
}

async fn wait_for_client_status(client: &RealtimeClient, status: ConnectionStatus) {
    let mut rx = client.subscribe_status();
    let result = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.status == status)).await;
    assert!(result.is_ok(), "[Test Main] 等待客户端进入 {} 状态超时，当前为 {}", status, client.status());
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("[Test Main] 等待服务端事件超时")
        .expect("[Test Main] 服务端任务已结束")
}

/// 接受一个连接：记录握手 URI，推送一条流量更新，回应 ping，并把收到的文本与关闭码转发给测试。
async fn serve_one(listener: TcpListener, events: mpsc::UnboundedSender<ServerEvent>) {
    let (stream, peer_addr) = listener.accept().await.expect("接受 TCP 连接失败");
    let handshake_events = events.clone();
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let _ = handshake_events.send(ServerEvent::Handshake(request.uri().to_string()));
        Ok(response)
    };
    let mut ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback)
        .await
        .expect("WebSocket 握手失败");
    info!("[Test Server] 新的 WebSocket 连接来自 {}", peer_addr);

    let update = r#"{"type":"node_traffic_update","data":{"domain_as_id":"x.example.com","traffic":12345}}"#;
    ws_stream
        .send(TungsteniteMessage::Text(update.to_string()))
        .await
        .expect("推送流量更新失败");

    while let Some(frame) = ws_stream.next().await {
        match frame {
            Ok(TungsteniteMessage::Text(text)) => {
                info!("[Test Server] 收到文本消息: {}", text);
                if text.contains(r#""type":"ping""#) {
                    let pong = r#"{"type":"pong","timestamp":"2024-01-01T00:00:00.000Z"}"#;
                    if ws_stream.send(TungsteniteMessage::Text(pong.to_string())).await.is_err() {
                        warn!("[Test Server] 回应 pong 失败");
                    }
                }
                let _ = events.send(ServerEvent::Text(text));
            }
            Ok(TungsteniteMessage::Close(frame)) => {
                let code = frame.map(|f| u16::from(f.code)).unwrap_or(1005);
                info!("[Test Server] 收到关闭帧，code={}", code);
                let _ = events.send(ServerEvent::Closed(code));
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("[Test Server] 读取帧失败: {}", e);
                break;
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_client_connects_dispatches_heartbeats_and_disconnects() {
    init_test_logger();

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("无法绑定到随机端口");
    let addr = listener.local_addr().expect("无法获取本地监听地址");
    let (server_tx, mut server_rx) = mpsc::unbounded_channel();
    let server_handle = tokio::spawn(serve_one(listener, server_tx));

    let mut config = ClientConfig::new(format!("http://{}", addr));
    config.heartbeat_interval = Duration::from_millis(200);
    let client = RealtimeClient::start(config);

    let (update_tx, mut update_rx) = mpsc::unbounded_channel::<WsMessage>();
    client.on(NODE_TRAFFIC_UPDATE_MESSAGE_TYPE, move |msg| {
        update_tx.send(msg.clone())?;
        Ok(())
    });

    client.connect("42", true);
    wait_for_client_status(&client, ConnectionStatus::Connected).await;

    match next_event(&mut server_rx).await {
        ServerEvent::Handshake(uri) => assert_eq!(uri, "/ws?user_id=42&is_admin=true"),
        other => panic!("[Test Main] 期望握手事件，实际为 {:?}", other),
    }
    match next_event(&mut server_rx).await {
        ServerEvent::Text(text) => {
            let message = WsMessage::from_json(&text).expect("连接通知应为合法消息");
            assert_eq!(message.message_type, "connection_established");
            assert_eq!(message.extra.get("user_id"), Some(&serde_json::json!("42")));
            assert_eq!(message.extra.get("is_admin"), Some(&serde_json::json!(true)));
        }
        other => panic!("[Test Main] 期望连接通知，实际为 {:?}", other),
    }

    let update = tokio::time::timeout(Duration::from_secs(5), update_rx.recv())
        .await
        .expect("[Test Main] 等待流量更新超时")
        .expect("处理器通道已关闭");
    let payload: NodeTrafficUpdatePayload = update.data_as().expect("流量更新载荷应可解析");
    assert_eq!(payload.domain_as_id, "x.example.com");
    assert_eq!(payload.traffic, 12345);

    match next_event(&mut server_rx).await {
        ServerEvent::Text(text) => {
            let message = WsMessage::from_json(&text).expect("心跳应为合法消息");
            assert!(message.is_type("ping"), "期望 ping，实际为 {}", text);
        }
        other => panic!("[Test Main] 期望心跳，实际为 {:?}", other),
    }

    client.disconnect();
    wait_for_client_status(&client, ConnectionStatus::Disconnected).await;
    loop {
        match next_event(&mut server_rx).await {
            ServerEvent::Closed(code) => {
                assert_eq!(code, 1000, "手动断开应使用正常关闭码");
                break;
            }
            // 断开之前可能还有在途的心跳
            ServerEvent::Text(_) => continue,
            other => panic!("[Test Main] 期望关闭帧，实际为 {:?}", other),
        }
    }

    client.shutdown().await;
    let _ = server_handle.await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
/// 服务端不经关闭握手直接断开后，客户端按退避延迟重连并恢复为 connected。
async fn test_client_reconnects_after_abrupt_server_drop() {
    init_test_logger();

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("无法绑定到随机端口");
    let addr = listener.local_addr().expect("无法获取本地监听地址");
    let (accepted_tx, mut accepted_rx) = mpsc::unbounded_channel::<usize>();

    let server_handle = tokio::spawn(async move {
        let mut kept = Vec::new();
        for index in 0..2usize {
            let (stream, _) = listener.accept().await.expect("接受 TCP 连接失败");
            let ws_stream = tokio_tungstenite::accept_async(stream).await.expect("WebSocket 握手失败");
            let _ = accepted_tx.send(index);
            if index == 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
                drop(ws_stream);
            } else {
                kept.push(ws_stream);
            }
        }
        // 保持第二条连接直到测试结束
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(kept);
    });

    let mut config = ClientConfig::new(format!("ws://{}", addr));
    config.reconnect = ReconnectPolicy {
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(400),
        max_attempts: 5,
    };
    let client = RealtimeClient::start(config);
    let mut status_rx = client.subscribe_status();

    client.connect("7", false);
    wait_for_client_status(&client, ConnectionStatus::Connected).await;

    let saw_reconnecting = tokio::time::timeout(
        Duration::from_secs(5),
        status_rx.wait_for(|s| s.status == ConnectionStatus::Reconnecting),
    )
    .await;
    assert!(saw_reconnecting.is_ok(), "[Test Main] 服务端断开后客户端应进入 reconnecting");
    drop(saw_reconnecting); // 释放 watch::Ref 读锁，否则客户端更新状态时会阻塞

    let second = tokio::time::timeout(Duration::from_secs(5), async {
        let mut last = None;
        while let Some(index) = accepted_rx.recv().await {
            last = Some(index);
            if index == 1 {
                break;
            }
        }
        last
    })
    .await
    .expect("[Test Main] 等待重连超时");
    assert_eq!(second, Some(1));

    wait_for_client_status(&client, ConnectionStatus::Connected).await;
    assert_eq!(client.snapshot().reconnect_attempts, 0);

    client.shutdown().await;
    server_handle.abort();
    let _ = server_handle.await;
}
