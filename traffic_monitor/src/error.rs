use thiserror::Error;

use realtime_ws_client::WsError;

/// 监视器程序的错误类型
#[derive(Error, Debug)]
pub enum AppError {
    #[error("配置文件读写错误: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("配置文件格式错误: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("配置项无效: {0}")]
    InvalidConfig(String),

    #[error("实时客户端错误: {0}")]
    Client(#[from] WsError),
}
