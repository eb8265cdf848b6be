//! DogStatsD sink.
//!
//! Each notification becomes one or two datagrams in the DogStatsD line
//! format (`<prefix>.server.success:1|c`). The target is resolved once at
//! construction and every datagram goes out through one non-blocking socket,
//! so a notification never waits on name resolution or the network. Send
//! failures are logged at debug and otherwise dropped.

use std::error::Error;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use tracing::debug;

use canary_core::Location;

use crate::monitor::Monitor;

pub struct StatsdMonitor {
    target: SocketAddr,
    prefix: String,
    socket: UdpSocket,
}

impl StatsdMonitor {
    /// Create a monitor sending to `target` (e.g. `127.0.0.1:8125`).
    ///
    /// Host names are resolved here, once; this call may block.
    pub fn new(target: &str, prefix: impl Into<String>) -> io::Result<Self> {
        let addrs: Vec<SocketAddr> = target.to_socket_addrs()?.collect();
        let target = addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("statsd target {target:?} resolved to no address"),
                )
            })?;
        let bind: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            target,
            prefix: prefix.into(),
            socket,
        })
    }

    /// The resolved destination.
    pub fn target(&self) -> SocketAddr {
        self.target
    }

    fn send(&self, line: &str) {
        match self.socket.send_to(line.as_bytes(), self.target) {
            Ok(n) if n == line.len() => {}
            Ok(n) => debug!(written = n, expected = line.len(), "short statsd write"),
            Err(e) => debug!(target_addr = %self.target, error = %e, "statsd write failed"),
        }
    }

    fn outcome(&self, metric: &str, failed: bool, success_tags: &str) {
        let (success, failure) = if failed { (0, 1) } else { (1, 0) };
        self.send(&format!(
            "{}.{metric}.success:{success}|c{success_tags}\n",
            self.prefix
        ));
        self.send(&format!("{}.{metric}.failure:{failure}|c\n", self.prefix));
    }
}

impl Monitor for StatsdMonitor {
    fn record_serve(&self, error: Option<&dyn Error>) {
        self.outcome("server", error.is_some(), "");
    }

    fn record_serving_time(&self, elapsed: Duration) {
        self.send(&format!(
            "{}.server.delay:{}|h\n",
            self.prefix,
            elapsed.as_millis()
        ));
    }

    fn record_handling(&self, location: Location, error: Option<&dyn Error>) {
        let tags = if error.is_none() {
            format!("|#location:{location}")
        } else {
            String::new()
        };
        self.outcome("handler", error.is_some(), &tags);
    }

    fn record_rollout_update(&self, error: Option<&dyn Error>) {
        self.outcome("rollout.update", error.is_some(), "");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receiver() -> (UdpSocket, String) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let addr = socket.local_addr().unwrap().to_string();
        (socket, addr)
    }

    fn recv_line(socket: &UdpSocket) -> String {
        let mut buf = [0u8; 512];
        let n = socket.recv(&mut buf).unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    #[test]
    fn emits_handler_success_with_location_tag() {
        let (socket, addr) = receiver();
        let monitor = StatsdMonitor::new(&addr, "canaryd").unwrap();

        monitor.record_handling(Location::Canary, None);

        assert_eq!(
            recv_line(&socket),
            "canaryd.handler.success:1|c|#location:canary\n"
        );
        assert_eq!(recv_line(&socket), "canaryd.handler.failure:0|c\n");
    }

    #[test]
    fn emits_serving_delay_histogram() {
        let (socket, addr) = receiver();
        let monitor = StatsdMonitor::new(&addr, "canaryd").unwrap();

        monitor.record_serving_time(Duration::from_millis(42));

        assert_eq!(recv_line(&socket), "canaryd.server.delay:42|h\n");
    }

    #[test]
    fn invalid_target_fails_at_construction() {
        assert!(StatsdMonitor::new("not-a-host:notaport", "canaryd").is_err());
        assert!(StatsdMonitor::new("no-port-here", "canaryd").is_err());
    }

    #[test]
    fn host_name_is_resolved_once_up_front() {
        let (socket, addr) = receiver();
        let port = addr.rsplit(':').next().unwrap();
        let monitor = StatsdMonitor::new(&format!("localhost:{port}"), "canaryd").unwrap();
        assert!(monitor.target().ip().is_loopback());

        monitor.record_serving_time(Duration::from_millis(7));
        assert_eq!(recv_line(&socket), "canaryd.server.delay:7|h\n");
    }

    #[test]
    fn unreachable_target_never_blocks() {
        let closed = UdpSocket::bind("127.0.0.1:0").unwrap();
        let dead = closed.local_addr().unwrap().to_string();
        drop(closed);
        let monitor = StatsdMonitor::new(&dead, "canaryd").unwrap();

        let started = std::time::Instant::now();
        for _ in 0..20 {
            monitor.record_serve(None);
            monitor.record_handling(Location::Master, Some(&io::Error::other("boom")));
        }
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
