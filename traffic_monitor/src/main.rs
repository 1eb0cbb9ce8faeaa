use log::{error, info, LevelFilter}; // 日志宏与日志级别
use realtime_ws_client::RealtimeClient;
use traffic_monitor::config;
use traffic_monitor::error::AppError;
use traffic_monitor::monitor;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // 初始化日志记录器，RUST_LOG 可覆盖默认级别
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_millis()
        .init();
    info!("[主程序] 日志系统已成功初始化 (env_logger)，默认级别: Info。");

    let config_path = config::config_file_path(); // 环境变量优先，否则为当前目录
    let app_config = config::load_or_create_config(&config_path);
    if let Err(e) = app_config.validate() {
        error!("[主程序] 致命错误：配置 {:?} 无效: {}", config_path, e);
        return Err(e);
    }
    info!(
        "[主程序] 应用配置已加载。origin: {}，user_id: {}，is_admin: {}",
        app_config.connection.origin, app_config.connection.user_id, app_config.connection.is_admin
    );

    let client = RealtimeClient::start(app_config.to_client_config()); // 派生驱动任务，初始状态为 Disconnected
    monitor::register_handlers(&client);
    let indicator = monitor::spawn_status_indicator(client.subscribe_status(), app_config.reconnect.max_attempts);

    client.connect(app_config.connection.user_id.clone(), app_config.connection.is_admin);
    info!("[主程序] 正在监视节点流量更新，按 Ctrl-C 退出...");

    let signal = tokio::signal::ctrl_c().await; // 等待 Ctrl-C；监听失败时同样执行清理
    info!("[主程序] 正在断开连接并停止客户端...");
    client.disconnect();
    client.shutdown().await; // 状态发送端随之关闭，状态指示任务自行结束
    if let Err(e) = indicator.await {
        error!("[主程序] 状态指示任务异常结束: {}", e);
    }
    signal?;
    info!("[主程序] 已退出。");
    Ok(())
}
