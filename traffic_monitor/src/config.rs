use log::{info, warn}; // 日志宏
use realtime_ws_client::client::endpoint::build_endpoint;
use realtime_ws_client::client::ReconnectPolicy;
use realtime_ws_client::ClientConfig;
use serde::{Deserialize, Serialize}; // 配置文件的序列化与反序列化
use std::env;
use std::fs; // 读写配置文件
use std::path::{Path, PathBuf};
use std::time::Duration; // 转换为客户端配置时使用

use crate::error::AppError;

/// 默认的配置文件名
pub const CONFIG_FILE_NAME: &str = "app_settings.json";
/// 用于覆盖配置文件路径的环境变量
pub const CONFIG_PATH_ENV: &str = "TRAFFIC_MONITOR_CONFIG";

/// 连接目标与身份
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// 管理面板的 origin，例如 `https://panel.example.com`
    pub origin: String,
    /// 连接时携带的用户 ID
    pub user_id: String,
    /// 是否以管理员身份连接
    pub is_admin: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            origin: "http://127.0.0.1:8080".to_string(),
            user_id: "1".to_string(),
            is_admin: true,
        }
    }
}

/// 断线重连配置
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ReconnectConfig {
    /// 初始重连延迟（单位：毫秒）
    pub base_delay_ms: u64,
    /// 最大重连延迟（单位：毫秒）
    pub max_delay_ms: u64,
    /// 连续失败多少次后放弃重连
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            max_attempts: policy.max_attempts,
        }
    }
}

/// 心跳配置
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// 发送 ping 的间隔（单位：秒）
    pub interval_seconds: u64,
    /// 额外等待 pong 的时间（单位：秒），为空表示不检测
    pub pong_timeout_seconds: Option<u64>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            pong_timeout_seconds: None,
        }
    }
}

/// 应用的主配置结构体
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub connection: ConnectionConfig,
    pub reconnect: ReconnectConfig,
    pub heartbeat: HeartbeatConfig,
}

impl AppConfig {
    /// 检查配置能否构造出合法的端点以及合理的时间参数
    pub fn validate(&self) -> Result<(), AppError> {
        build_endpoint(&self.connection.origin, &self.connection.user_id, self.connection.is_admin)?;
        if self.heartbeat.interval_seconds == 0 {
            return Err(AppError::InvalidConfig("heartbeat.interval_seconds 必须大于 0".to_string()));
        }
        if self.reconnect.base_delay_ms > self.reconnect.max_delay_ms {
            return Err(AppError::InvalidConfig(format!(
                "reconnect.base_delay_ms ({}) 不能大于 reconnect.max_delay_ms ({})",
                self.reconnect.base_delay_ms, self.reconnect.max_delay_ms
            )));
        }
        Ok(())
    }

    /// 转换为实时客户端的配置
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            origin: self.connection.origin.clone(),
            reconnect: ReconnectPolicy {
                base_delay: Duration::from_millis(self.reconnect.base_delay_ms),
                max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
                max_attempts: self.reconnect.max_attempts,
            },
            heartbeat_interval: Duration::from_secs(self.heartbeat.interval_seconds),
            pong_timeout: self.heartbeat.pong_timeout_seconds.map(Duration::from_secs),
        }
    }
}

/// 获取配置文件路径：优先使用环境变量 `TRAFFIC_MONITOR_CONFIG`，否则为当前目录下的 `app_settings.json`
pub fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() { // 空字符串视为未设置
            return PathBuf::from(path);
        }
    }
    let current_dir = env::current_dir().unwrap_or_else(|_| PathBuf::from(".")); // 获取当前目录失败时退回到相对路径
    current_dir.join(CONFIG_FILE_NAME)
}

/// 从指定路径读取配置
pub fn read_config(path: &Path) -> Result<AppConfig, AppError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str::<AppConfig>(&content)?)
}

/// 加载配置文件；文件不存在或已损坏时使用默认配置并尝试写回
pub fn load_or_create_config(path: &Path) -> AppConfig {
    match read_config(path) {
        Ok(config) => { // 读取并反序列化成功
            info!("[配置模块] 已成功从配置文件 {:?} 加载应用配置。", path);
            config
        }
        Err(AppError::ConfigParse(e)) => { // 文件存在但内容已损坏
            warn!(
                "[配置模块] 警告：从 {:?} 反序列化配置失败: {}. 文件可能已损坏。将使用默认配置并尝试覆盖。",
                path, e
            );
            save_default(path)
        }
        Err(e) => { // 文件不存在或无法读取
            info!(
                "[配置模块] 未在 {:?} 找到配置文件或读取时发生错误 ({}). 将使用默认配置并尝试创建新文件。",
                path, e
            );
            save_default(path)
        }
    }
}

fn save_default(path: &Path) -> AppConfig {
    let default_config = AppConfig::default();
    if let Err(e) = save_config(&default_config, path) {
        warn!("[配置模块] 错误：保存默认配置到 {:?} 失败: {}", path, e);
    }
    default_config
}

/// 保存配置到文件
pub fn save_config(config: &AppConfig, path: &Path) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    let content = serde_json::to_string_pretty(config)?; // 美化输出，便于手工编辑
    fs::write(path, content)?;
    info!("[配置模块] 已成功将当前配置保存到 {:?}.", path);
    Ok(())
}
