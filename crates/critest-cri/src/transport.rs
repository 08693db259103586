//! Endpoint parsing and channel construction.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tokio::runtime::Runtime;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

use crate::error::{ErrorKind, RuntimeError};

/// Where a CRI service listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceAddr {
    /// A Unix domain socket path.
    Unix(PathBuf),
    /// A plaintext HTTP/2 endpoint, as an `http://host:port` URI.
    Tcp(String),
}

impl ServiceAddr {
    /// Parses `unix://`, `tcp://`, and `http://` endpoints; a bare absolute
    /// path is taken as a Unix socket.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidArgument` error for empty endpoints and
    /// unsupported schemes.
    pub fn parse(endpoint: &str) -> Result<Self, RuntimeError> {
        let invalid = |message: String| RuntimeError::new(ErrorKind::InvalidArgument, "connect", message);
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(invalid("endpoint is not set".to_string()));
        }
        if let Some(path) = endpoint.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(invalid(format!("endpoint {endpoint:?} has no socket path")));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        if endpoint.starts_with('/') {
            return Ok(Self::Unix(PathBuf::from(endpoint)));
        }
        if let Some(authority) = endpoint.strip_prefix("tcp://") {
            return Ok(Self::Tcp(format!("http://{authority}")));
        }
        if endpoint.starts_with("http://") {
            return Ok(Self::Tcp(endpoint.to_string()));
        }
        let scheme = endpoint.split("://").next().unwrap_or(endpoint);
        Err(invalid(format!(
            "unsupported endpoint scheme {scheme:?} in {endpoint:?}; expected unix, tcp or http"
        )))
    }
}

/// Builds the multi-threaded runtime that drives every client call and
/// background streaming task.
///
/// # Errors
///
/// Returns an error if the runtime cannot be started.
pub fn new_runtime() -> Result<Arc<Runtime>, RuntimeError> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("critest-io")
        .enable_all()
        .build()
        .map(Arc::new)
        .map_err(|e| RuntimeError::new(ErrorKind::Other, "runtime", e.to_string()))
}

/// Connects to `endpoint`, failing if no connection is made within `timeout`.
///
/// # Errors
///
/// Returns `InvalidArgument` for malformed endpoints, `Unavailable` if the
/// connection is refused, and `Deadline` if `timeout` elapses.
pub async fn connect(endpoint: &str, timeout: Duration) -> Result<Channel, RuntimeError> {
    let addr = ServiceAddr::parse(endpoint)?;
    tracing::debug!(endpoint, ?addr, "connecting");
    match tokio::time::timeout(timeout, dial(addr, timeout)).await {
        Ok(Ok(channel)) => Ok(channel),
        Ok(Err(e)) => Err(RuntimeError::new(
            ErrorKind::Unavailable,
            "connect",
            format!("{endpoint}: {e}"),
        )),
        Err(_) => Err(RuntimeError::deadline("connect", timeout)),
    }
}

async fn dial(addr: ServiceAddr, timeout: Duration) -> Result<Channel, tonic::transport::Error> {
    match addr {
        ServiceAddr::Unix(path) => {
            // The authority is ignored; every connection dials the socket.
            Endpoint::try_from("http://[::]:50051")?
                .connect_timeout(timeout)
                .connect_with_connector(service_fn(move |_: Uri| {
                    let path = path.clone();
                    async move {
                        Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(path).await?))
                    }
                }))
                .await
        }
        ServiceAddr::Tcp(uri) => {
            Endpoint::from_shared(uri)?
                .connect_timeout(timeout)
                .connect()
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_endpoints() {
        assert_eq!(
            ServiceAddr::parse("unix:///run/containerd/containerd.sock").unwrap(),
            ServiceAddr::Unix(PathBuf::from("/run/containerd/containerd.sock"))
        );
        assert_eq!(
            ServiceAddr::parse("/var/run/crio/crio.sock").unwrap(),
            ServiceAddr::Unix(PathBuf::from("/var/run/crio/crio.sock"))
        );
    }

    #[test]
    fn tcp_endpoints_become_http() {
        assert_eq!(
            ServiceAddr::parse("tcp://127.0.0.1:3735").unwrap(),
            ServiceAddr::Tcp("http://127.0.0.1:3735".into())
        );
        assert_eq!(
            ServiceAddr::parse("http://localhost:1234").unwrap(),
            ServiceAddr::Tcp("http://localhost:1234".into())
        );
    }

    #[test]
    fn rejects_unsupported_and_empty() {
        let err = ServiceAddr::parse("npipe:////./pipe/containerd").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        assert!(err.message.contains("\"npipe\""));
        assert!(ServiceAddr::parse("").is_err());
        assert!(ServiceAddr::parse("unix://").is_err());
        assert!(ServiceAddr::parse("https://host:1").is_err());
    }

    #[test]
    fn connect_to_missing_socket_is_unavailable() {
        let runtime = new_runtime().unwrap();
        let dir = std::env::temp_dir().join(format!("critest-missing-{}", std::process::id()));
        let endpoint = format!("unix://{}/cri.sock", dir.display());
        let err = runtime
            .block_on(connect(&endpoint, Duration::from_secs(2)))
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Unavailable | ErrorKind::Deadline));
    }
}
