//! Client side of the placement protocol.

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::{Instant, timeout_at};

use canary_core::Location;

use crate::error::ClientError;

/// A parsed placement response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub assignment: f64,
    pub location: Location,
}

/// Ask the server at `path` to place `input`.
///
/// `input` is sent as one line; pass an empty string to let the server draw
/// the assignment.
pub async fn query(
    path: impl AsRef<Path>,
    input: &str,
    timeout: Duration,
) -> Result<Placement, ClientError> {
    let raw = request_raw(path, input, timeout).await?;
    parse_response(&raw)
}

/// Send one request line and return the response verbatim.
pub async fn request_raw(
    path: impl AsRef<Path>,
    input: &str,
    timeout: Duration,
) -> Result<String, ClientError> {
    if input.contains('\n') {
        return Err(ClientError::InvalidInput);
    }
    let path = path.as_ref();
    let deadline = Instant::now() + timeout;

    let exchange = async {
        let mut stream =
            UnixStream::connect(path)
                .await
                .map_err(|source| ClientError::Connect {
                    path: path.to_path_buf(),
                    source,
                })?;
        stream.write_all(input.as_bytes()).await?;
        stream.write_all(b"\n").await?;

        let mut response = String::new();
        stream.read_to_string(&mut response).await?;
        Ok::<_, ClientError>(response)
    };

    let response = timeout_at(deadline, exchange)
        .await
        .map_err(|_| ClientError::Timeout)??;
    if response.is_empty() {
        return Err(ClientError::NoResponse);
    }
    Ok(response)
}

/// Parse `<assignment>\n<location>\n`.
pub fn parse_response(text: &str) -> Result<Placement, ClientError> {
    let malformed = || ClientError::Malformed(text.to_string());

    let body = text.strip_suffix('\n').ok_or_else(malformed)?;
    let (assignment, location) = body.split_once('\n').ok_or_else(malformed)?;
    if location.contains('\n') {
        return Err(malformed());
    }

    Ok(Placement {
        assignment: assignment.parse().map_err(|_| malformed())?,
        location: location.parse().map_err(|_| malformed())?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use canary_metrics::CountingMonitor;
    use canary_rollout::ConstantRollout;

    use crate::canary::CanaryHandler;
    use crate::handler::EchoHandler;
    use crate::random::SeededRandom;
    use crate::server::{ServerOptions, UnixServer};

    #[test]
    fn parses_well_formed_response() {
        let p = parse_response("0.3\ncanary\n").unwrap();
        assert_eq!(p.assignment, 0.3);
        assert_eq!(p.location, Location::Canary);

        let p = parse_response("0.7\nmaster\n").unwrap();
        assert_eq!(p.location, Location::Master);
    }

    #[test]
    fn rejects_malformed_responses() {
        for text in [
            "",
            "0.3\ncanary",
            "0.3\n",
            "canary\n0.3\n",
            "0.3\nbeta\n",
            "0.3\ncanary\nextra\n",
        ] {
            assert!(
                matches!(parse_response(text), Err(ClientError::Malformed(_))),
                "accepted {text:?}"
            );
        }
    }

    #[tokio::test]
    async fn rejects_embedded_line_feed() {
        let err = query("/nonexistent.sock", "0.1\n0.2", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidInput));
    }

    #[tokio::test]
    async fn missing_socket_is_connect_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = query(dir.path().join("none.sock"), "0.1", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Connect { .. }));
    }

    #[tokio::test]
    async fn queries_running_server() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("canaryd.sock");
        let monitor = Arc::new(CountingMonitor::new());
        let handler = CanaryHandler::new(monitor.clone(), Arc::new(ConstantRollout::new(0.25)))
            .with_random(Arc::new(SeededRandom::new(1)));
        let server =
            UnixServer::start(monitor, Arc::new(handler), &path, ServerOptions::default()).unwrap();

        let p = query(&path, "0.1", Duration::from_secs(1)).await.unwrap();
        assert_eq!(p.assignment, 0.1);
        assert_eq!(p.location, Location::Canary);

        let p = query(&path, "", Duration::from_secs(1)).await.unwrap();
        assert!((0.0..1.0).contains(&p.assignment));
        assert_eq!(p.location == Location::Canary, p.assignment < 0.25);

        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn raw_request_returns_response_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("echo.sock");
        let server = UnixServer::start(
            Arc::new(CountingMonitor::new()),
            Arc::new(EchoHandler),
            &path,
            ServerOptions::default(),
        )
        .unwrap();

        let raw = request_raw(&path, "ping", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(raw, "ping\n");
        // An echo is not a placement.
        assert!(matches!(
            query(&path, "ping", Duration::from_secs(1)).await,
            Err(ClientError::Malformed(_))
        ));

        server.close().await.unwrap();
    }
}
