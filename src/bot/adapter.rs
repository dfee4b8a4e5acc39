// Outbound HTTP seam for the OPQ LuaApiCaller endpoints.
// The send pipeline and message recall only need "POST this JSON, return the
// body", so the backend call sits behind a trait tests and embedders replace.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use super::error::TransportError;
use crate::config::{self, ProxySettings};
use crate::ulog_warn;

pub type TransportResult<T> = Result<T, TransportError>;

pub trait ApiTransport: Send + Sync + 'static {
    /// POST `body` as JSON to `url`; returns the response text on 2xx.
    fn post_json(
        &self,
        url: &str,
        body: &Value,
    ) -> impl std::future::Future<Output = TransportResult<String>> + Send;
}

/// `reqwest` backed transport
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration, proxy: Option<&ProxySettings>) -> TransportResult<Self> {
        let builder = Client::builder().timeout(timeout);
        let client = match config::build_client(builder, proxy) {
            Ok(client) => client,
            Err(e) => {
                ulog_warn!("[opq] Failed to build client with proxy: {}, falling back to direct", e);
                Client::builder().timeout(timeout).no_proxy().build()?
            }
        };
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

impl ApiTransport for HttpTransport {
    async fn post_json(&self, url: &str, body: &Value) -> TransportResult<String> {
        let resp = self.client.post(url).json(body).send().await?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::util::{api_url, FUNC_SEND_MSG};
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// Request head and body as seen by the backend
    struct Captured {
        head: String,
        body: Value,
    }

    /// Plain HTTP/1.1 responder; answers one connection per entry in `replies`.
    async fn spawn_backend(replies: Vec<(u16, &'static str)>) -> (String, mpsc::UnboundedReceiver<Captured>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            for (status, reply) in replies {
                let (mut tcp, _) = listener.accept().await.unwrap();
                let mut raw = Vec::new();
                let mut buf = [0u8; 1024];
                let head_end = loop {
                    let n = tcp.read(&mut buf).await.unwrap();
                    assert!(n > 0, "client closed before sending headers");
                    raw.extend_from_slice(&buf[..n]);
                    if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                };
                let head = String::from_utf8_lossy(&raw[..head_end]).to_string();
                let length = head
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().unwrap())
                    })
                    .unwrap_or(0);
                while raw.len() < head_end + length {
                    let n = tcp.read(&mut buf).await.unwrap();
                    raw.extend_from_slice(&buf[..n]);
                }
                let body = serde_json::from_slice(&raw[head_end..head_end + length]).unwrap();
                tx.send(Captured { head, body }).unwrap();

                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reply.len(),
                    reply
                );
                tcp.write_all(response.as_bytes()).await.unwrap();
                tcp.shutdown().await.unwrap();
            }
        });
        (base, rx)
    }

    fn direct_transport() -> HttpTransport {
        HttpTransport::from_client(Client::builder().no_proxy().build().unwrap())
    }

    #[tokio::test]
    async fn test_post_json_returns_body_on_success() {
        let (base, mut seen) = spawn_backend(vec![(200, r#"{"Ret":0}"#)]).await;
        let transport = direct_transport();
        let url = api_url(&base, FUNC_SEND_MSG, 4242);
        let body = json!({ "ToUserUid": 10001, "SendMsgType": "TextMsg", "SendToType": 2, "Content": "hi" });

        let text = transport.post_json(&url, &body).await.unwrap();
        assert_eq!(text, r#"{"Ret":0}"#);

        let captured = seen.recv().await.unwrap();
        assert!(captured
            .head
            .starts_with("POST /v1/LuaApiCaller?funcname=SendMsgV2&qq=4242 HTTP/1.1\r\n"));
        assert!(captured
            .head
            .to_ascii_lowercase()
            .contains("content-type: application/json"));
        assert_eq!(captured.body, body);
    }

    #[tokio::test]
    async fn test_post_json_maps_non_success_status() {
        let (base, mut seen) = spawn_backend(vec![(500, "backend down")]).await;
        let transport = direct_transport();
        let url = api_url(&base, FUNC_SEND_MSG, 1);

        let err = transport
            .post_json(&url, &json!({ "ToUserUid": 1 }))
            .await
            .unwrap_err();
        match err {
            TransportError::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "backend down");
            }
            other => panic!("expected status error, got {other}"),
        }
        assert_eq!(seen.recv().await.unwrap().body, json!({ "ToUserUid": 1 }));
    }

    #[tokio::test]
    async fn test_post_json_reports_connection_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = direct_transport()
            .post_json(&api_url(&base, FUNC_SEND_MSG, 1), &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Http(_)));
    }

    #[test]
    fn test_new_falls_back_when_proxy_is_invalid() {
        let bad = ProxySettings {
            enabled: true,
            protocol: Some("ftp".into()),
            host: None,
            port: None,
        };
        assert!(HttpTransport::new(Duration::from_secs(5), Some(&bad)).is_ok());
    }
}
