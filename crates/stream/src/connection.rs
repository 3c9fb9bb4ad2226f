//! Streaming connection establishment.
//!
//! Opens the persistent websocket-framed connection to the event stream
//! endpoint, attaching the caller's authorization token and a fixed
//! Origin header. When a proxy selector is configured the connection is
//! tunneled through an HTTP CONNECT proxy before the TLS/websocket
//! handshake.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, client_async_tls_with_config};
use tracing::debug;
use url::Url;

use crate::error::ConsumerError;

/// Chooses a proxy for a target URL; `None` means connect directly.
pub type ProxySelector = Arc<dyn Fn(&Url) -> Option<Url> + Send + Sync>;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a websocket connection to `endpoint` + `path`.
///
/// A 401 handshake response is classified as [`ConsumerError::Unauthorized`]
/// carrying the server's body; every other dial/tunnel/handshake failure
/// is wrapped with guidance naming the configured endpoint.
pub(crate) async fn establish(
    endpoint: &Url,
    path: &str,
    auth_token: &str,
    proxy: Option<&ProxySelector>,
) -> Result<WsStream, ConsumerError> {
    let target = endpoint.join(path).map_err(|e| ConsumerError::InvalidEndpoint {
        url: endpoint.to_string(),
        detail: e.to_string(),
    })?;

    let dial_error = |detail: String| ConsumerError::Dial {
        endpoint: endpoint.to_string(),
        detail,
    };

    let host = target
        .host_str()
        .ok_or_else(|| dial_error("endpoint has no host".into()))?
        .to_string();
    let port = target
        .port_or_known_default()
        .ok_or_else(|| dial_error("endpoint has no port".into()))?;

    let mut request = target
        .as_str()
        .into_client_request()
        .map_err(|e| dial_error(e.to_string()))?;
    request
        .headers_mut()
        .insert(header::ORIGIN, "http://localhost".parse().expect("static header"));
    if !auth_token.is_empty() {
        request.headers_mut().insert(
            header::AUTHORIZATION,
            auth_token.parse().map_err(|_| dial_error("authorization token is not a valid header value".into()))?,
        );
    }

    let tcp = match proxy.and_then(|selector| selector(&target)) {
        Some(proxy_url) => {
            let proxy_host = proxy_url
                .host_str()
                .ok_or_else(|| dial_error("proxy URL has no host".into()))?
                .to_string();
            let proxy_port = proxy_url.port_or_known_default().unwrap_or(8080);
            debug!(proxy = %proxy_url, target = %target, "tunneling through HTTP proxy");
            let mut stream = TcpStream::connect((proxy_host.as_str(), proxy_port))
                .await
                .map_err(|e| dial_error(e.to_string()))?;
            proxy_connect(&mut stream, &host, port).await?;
            stream
        }
        None => TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| dial_error(e.to_string()))?,
    };

    match client_async_tls_with_config(request, tcp, None, None).await {
        Ok((ws, _response)) => Ok(ws),
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            let body = response
                .body()
                .as_ref()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            if response.status() == 401 {
                Err(ConsumerError::Unauthorized { message: body })
            } else {
                Err(dial_error(format!("handshake rejected with {}", response.status())))
            }
        }
        Err(e) => Err(dial_error(e.to_string())),
    }
}

/// Issue an HTTP CONNECT for `host:port` on an open proxy stream.
///
/// A non-200 response fails with the proxy's status line as the message.
pub(crate) async fn proxy_connect<S>(
    stream: &mut S,
    host: &str,
    port: u16,
) -> Result<(), ConsumerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    // Read exactly the response head; anything past the blank line
    // belongs to the tunneled protocol.
    let mut head = Vec::with_capacity(128);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() > 8 * 1024 {
            return Err(ConsumerError::ProxyConnect {
                status_line: "oversized CONNECT response".into(),
            });
        }
        let read = stream.read(&mut byte).await?;
        if read == 0 {
            return Err(ConsumerError::ProxyConnect {
                status_line: "connection closed during CONNECT".into(),
            });
        }
        head.push(byte[0]);
    }

    let head = String::from_utf8_lossy(&head);
    let status_line = head.lines().next().unwrap_or_default();
    let status = status_line.split_once(' ').map(|(_, rest)| rest.trim()).unwrap_or_default();
    if status.starts_with("200") {
        Ok(())
    } else {
        Err(ConsumerError::ProxyConnect { status_line: status.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn proxy_connect_tunnels_on_200() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let server_task = tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            let read = server.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..read]).into_owned();
            server
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                .await
                .unwrap();
            request
        });

        proxy_connect(&mut client, "app.example.com", 443).await.unwrap();

        let request = server_task.await.unwrap();
        assert!(request.starts_with("CONNECT app.example.com:443 HTTP/1.1\r\n"));
        assert!(request.contains("Host: app.example.com:443"));
    }

    #[tokio::test]
    async fn proxy_connect_surfaces_non_200_status_line() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            let _ = server.read(&mut buf).await.unwrap();
            server
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                .await
                .unwrap();
        });

        let err = proxy_connect(&mut client, "app.example.com", 443).await.unwrap_err();
        match err {
            ConsumerError::ProxyConnect { status_line } => {
                assert_eq!(status_line, "407 Proxy Authentication Required");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn proxy_connect_fails_on_early_close() {
        let (mut client, server) = tokio::io::duplex(1024);
        drop(server);

        let err = proxy_connect(&mut client, "app.example.com", 443).await.unwrap_err();
        assert!(matches!(err, ConsumerError::ProxyConnect { .. } | ConsumerError::Io(_)));
    }
}
