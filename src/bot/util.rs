// Backend endpoint helpers

/// socket.io path for the Engine.IO v3 WebSocket transport
const SOCKET_IO_PATH: &str = "/socket.io/?EIO=3&transport=websocket";

pub(crate) const FUNC_SEND_MSG: &str = "SendMsgV2";
pub(crate) const FUNC_RECALL_MSG: &str = "PbMessageSvc.PbMsgWithDraw";

/// `<base>/v1/LuaApiCaller?funcname=<func>&qq=<account>`
pub(crate) fn api_url(base: &str, func: &str, account_id: i64) -> String {
    format!(
        "{}/v1/LuaApiCaller?funcname={}&qq={}",
        base.trim_end_matches('/'),
        func,
        account_id
    )
}

/// Map the HTTP base address onto the socket.io WebSocket endpoint.
pub(crate) fn ws_endpoint(base: &str) -> String {
    let base = base.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        format!("ws://{}", base)
    };
    format!("{}{}", ws_base, SOCKET_IO_PATH)
}
