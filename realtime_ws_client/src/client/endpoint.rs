// realtime_ws_client/src/client/endpoint.rs

//! 由页面 origin 推导实时推送端点 URL。

use url::Url;

use crate::error::WsError;

/// 端点路径。
pub const WS_ENDPOINT_PATH: &str = "/ws";

/// 根据 `origin` 构造 WebSocket 端点 URL。
///
/// - `http` 升级为 `ws`，`https` 升级为 `wss`；已经是 `ws`/`wss` 的保持不变；
/// - 路径固定为 `/ws`，origin 自带的路径、查询串和片段全部丢弃；
/// - 查询参数 `user_id` (URL 编码，可以为空) 与 `is_admin` (`"true"`/`"false"`)。
///
/// 其它 scheme 或无法解析的 origin 返回 `WsError::InvalidUrl`。
pub fn build_endpoint(origin: &str, user_id: &str, is_admin: bool) -> Result<Url, WsError> {
    let mut url = Url::parse(origin)
        .map_err(|e| WsError::InvalidUrl(format!("无法解析 origin '{}': {}", origin, e)))?;

    let ws_scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(WsError::InvalidUrl(format!(
                "origin '{}' 的 scheme '{}' 无法映射为 WebSocket scheme",
                origin, other
            )));
        }
    };
    if !url.has_host() {
        return Err(WsError::InvalidUrl(format!("origin '{}' 缺少主机名", origin)));
    }

    url.set_scheme(ws_scheme)
        .map_err(|_| WsError::InvalidUrl(format!("无法为 '{}' 设置 scheme '{}'", origin, ws_scheme)))?;
    url.set_path(WS_ENDPOINT_PATH);
    url.set_fragment(None);
    url.set_query(None); // origin 自带的查询串全部丢弃
    url.query_pairs_mut()
        .append_pair("user_id", user_id)
        .append_pair("is_admin", if is_admin { "true" } else { "false" });

    Ok(url)
}
