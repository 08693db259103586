//! The `portforward.k8s.io` protocol: local TCP connections relayed to a
//! sandbox port over one SPDY session.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

use super::connection::Connection;
use super::header::HeaderBlock;
use super::upgrade;
use crate::error::StreamError;

/// The only sub-protocol offered.
pub const PROTOCOL: &str = "portforward.k8s.io";

fn headers(kind: &str, port: u16, request_id: u64) -> HeaderBlock {
    HeaderBlock::new()
        .with("streamType", kind)
        .with("port", port.to_string())
        .with("requestID", request_id.to_string())
}

/// Upgrades `url` to a port-forward session.
///
/// # Errors
///
/// Returns an error if the upgrade fails.
pub async fn open(url: &str) -> Result<Arc<Connection>, StreamError> {
    let (conn, negotiated) = upgrade::dial(url, &[PROTOCOL]).await?;
    if let Some(protocol) = negotiated.as_deref().filter(|p| *p != PROTOCOL) {
        return Err(StreamError::Upgrade(format!(
            "server negotiated unexpected protocol {protocol:?}"
        )));
    }
    tracing::debug!(url, "port-forward session established");
    Ok(Arc::new(conn))
}

/// Accepts local connections forever, relaying each to `port` in the sandbox.
///
/// Relays run in a task set owned by this future, so dropping or aborting
/// it tears every relay down.
pub async fn serve(listener: TcpListener, conn: Arc<Connection>, port: u16) {
    let mut relays = JoinSet::new();
    let mut request_id = 0_u64;
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    tracing::debug!(%peer, port, request_id, "forwarding connection");
                    let _ = relays.spawn(relay(conn.clone(), port, request_id, socket));
                    request_id += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "port-forward listener failed");
                    return;
                }
            },
            Some(done) = relays.join_next(), if !relays.is_empty() => {
                if let Ok(Err(e)) = done {
                    tracing::warn!(error = %e, port, "port-forward relay failed");
                }
            }
        }
    }
}

/// Relays one local connection through a fresh error/data stream pair.
///
/// # Errors
///
/// Returns the first error on either direction, or the message the server
/// wrote on the error stream.
pub async fn relay(
    conn: Arc<Connection>,
    port: u16,
    request_id: u64,
    socket: TcpStream,
) -> Result<(), StreamError> {
    let mut error = conn.open_stream(headers("error", port, request_id)).await?;
    error.close_write().await?;
    let data = conn.open_stream(headers("data", port, request_id)).await?;
    let (mut from_remote, to_remote) = data.split();
    let (mut from_local, mut to_local) = socket.into_split();

    let upstream = async {
        let mut buf = vec![0_u8; 32 * 1024];
        loop {
            let n = from_local.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            to_remote.write(&buf[..n]).await?;
        }
        to_remote.close_write().await?;
        Ok::<(), StreamError>(())
    };
    let downstream = async {
        while let Some(chunk) = from_remote.read().await? {
            to_local.write_all(&chunk).await?;
        }
        to_local.shutdown().await?;
        Ok::<(), StreamError>(())
    };
    let (up, down, remote) = tokio::join!(upstream, downstream, error.read_to_end());

    let remote = remote?;
    if !remote.is_empty() {
        return Err(StreamError::Remote {
            message: String::from_utf8_lossy(&remote).trim().to_string(),
            exit_code: None,
        });
    }
    down?;
    up
}
