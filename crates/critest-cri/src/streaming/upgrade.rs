//! HTTP/1.1 upgrade of a streaming URL to a SPDY/3.1 session.

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::header::{CONNECTION, HOST, UPGRADE};
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;

use super::connection::Connection;
use crate::error::StreamError;

/// Header carrying the offered and negotiated sub-protocols.
pub const PROTOCOL_HEADER: &str = "X-Stream-Protocol-Version";

/// Host and port of a plain-HTTP streaming URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Host without IPv6 brackets.
    pub host: String,
    /// TCP port, 80 when the URL carries none.
    pub port: u16,
    /// `host[:port]` as written in the URL.
    pub authority: String,
    /// Path and query sent in the upgrade request.
    pub path: String,
}

impl Target {
    /// Parses a streaming URL returned by `Exec`, `Attach`, or `PortForward`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Url`] for malformed URLs and for `https`, which
    /// this client does not speak.
    pub fn parse(url: &str) -> Result<Self, StreamError> {
        let invalid = |message: &str| StreamError::Url {
            url: url.to_string(),
            message: message.to_string(),
        };
        let uri = url.parse::<Uri>().map_err(|e| invalid(&e.to_string()))?;
        match uri.scheme_str() {
            Some("http") => {}
            Some("https") => return Err(invalid("TLS streaming endpoints are not supported")),
            _ => return Err(invalid("expected an http URL")),
        }
        let authority = uri.authority().ok_or_else(|| invalid("missing host"))?;
        let host = authority
            .host()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        Ok(Self {
            host,
            port: authority.port_u16().unwrap_or(80),
            authority: authority.as_str().to_string(),
            path: uri
                .path_and_query()
                .map_or_else(|| "/".to_string(), |p| p.as_str().to_string()),
        })
    }
}

/// Dials `url`, offers `protocols`, and upgrades the socket to SPDY/3.1.
///
/// Returns the session and the sub-protocol the server picked, if it named one.
///
/// # Errors
///
/// Returns an error if the URL is unusable, the socket cannot be opened, or
/// the server answers with anything but `101 Switching Protocols`.
pub async fn dial(url: &str, protocols: &[&str]) -> Result<(Connection, Option<String>), StreamError> {
    let target = Target::parse(url)?;
    let tcp = TcpStream::connect((target.host.as_str(), target.port)).await?;
    tcp.set_nodelay(true)?;

    let upgrade_err = |e: hyper::Error| StreamError::Upgrade(e.to_string());
    let (mut sender, conn) = hyper::client::conn::http1::handshake::<_, Empty<Bytes>>(TokioIo::new(tcp))
        .await
        .map_err(upgrade_err)?;
    let _driver = tokio::spawn(async move {
        if let Err(e) = conn.with_upgrades().await {
            tracing::debug!(error = %e, "upgrade connection ended");
        }
    });

    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(target.path.as_str())
        .header(HOST, target.authority.as_str())
        .header(CONNECTION, "Upgrade")
        .header(UPGRADE, "SPDY/3.1");
    for protocol in protocols {
        builder = builder.header(PROTOCOL_HEADER, *protocol);
    }
    let request = builder
        .body(Empty::new())
        .map_err(|e| StreamError::Upgrade(e.to_string()))?;

    tracing::debug!(url, ?protocols, "requesting spdy upgrade");
    let response = sender.send_request(request).await.map_err(upgrade_err)?;
    let status = response.status();
    if status != StatusCode::SWITCHING_PROTOCOLS {
        let body = response
            .into_body()
            .collect()
            .await
            .map(|b| String::from_utf8_lossy(&b.to_bytes()).trim().to_string())
            .unwrap_or_default();
        return Err(StreamError::Upgrade(format!("{status}: {body}")));
    }
    let negotiated = response
        .headers()
        .get(PROTOCOL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let upgraded = hyper::upgrade::on(response).await.map_err(upgrade_err)?;
    Ok((Connection::new(TokioIo::new(upgraded))?, negotiated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kubelet_style_urls() {
        let target = Target::parse("http://127.0.0.1:10010/exec/Xq3bUp1e").unwrap();
        assert_eq!(target.host, "127.0.0.1");
        assert_eq!(target.port, 10010);
        assert_eq!(target.authority, "127.0.0.1:10010");
        assert_eq!(target.path, "/exec/Xq3bUp1e");
    }

    #[test]
    fn ipv6_hosts_lose_their_brackets() {
        let target = Target::parse("http://[::1]:33337/portforward/abc?x=1").unwrap();
        assert_eq!(target.host, "::1");
        assert_eq!(target.path, "/portforward/abc?x=1");
    }

    #[test]
    fn default_port_and_path() {
        let target = Target::parse("http://localhost").unwrap();
        assert_eq!(target.port, 80);
        assert_eq!(target.path, "/");
    }

    #[test]
    fn tls_and_garbage_are_rejected() {
        assert!(matches!(
            Target::parse("https://127.0.0.1:10250/exec/x"),
            Err(StreamError::Url { .. })
        ));
        assert!(Target::parse("not a url").is_err());
        assert!(Target::parse("ws://host/x").is_err());
    }

    #[tokio::test]
    async fn refused_upgrade_reports_the_status() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 9\r\n\r\nno stream")
                .await
                .unwrap();
        });
        let err = dial(&format!("http://{addr}/exec/missing"), &["v4.channel.k8s.io"])
            .await
            .unwrap_err();
        let message = match err {
            StreamError::Upgrade(message) => message,
            other => panic!("expected an upgrade error, got {other:?}"),
        };
        assert!(message.contains("404"));
        assert!(message.contains("no stream"));
        server.await.unwrap();
    }
}
