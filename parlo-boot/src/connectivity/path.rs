//! Passive network path sources

use parlo_common::events::ConnectivityState;
use parlo_common::{Error, Result};
use std::sync::Mutex;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Result of one path observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStatus {
    Satisfied,
    Unsatisfied,
}

impl From<PathStatus> for ConnectivityState {
    fn from(status: PathStatus) -> Self {
        match status {
            PathStatus::Satisfied => ConnectivityState::Connected,
            PathStatus::Unsatisfied => ConnectivityState::Disconnected,
        }
    }
}

/// Source of passive path observations
///
/// `observe` hands out a stream of updates; an `Err` means the facility is
/// unavailable on this platform and the monitor stays `Unknown`.
pub trait NetworkPathSource: Send + Sync {
    fn observe(&self) -> Result<mpsc::Receiver<PathStatus>>;
}

/// Path source for platforms without a usable facility
pub struct UnsupportedPathSource;

impl NetworkPathSource for UnsupportedPathSource {
    fn observe(&self) -> Result<mpsc::Receiver<PathStatus>> {
        Err(Error::InvalidState(
            "no network path facility on this platform".to_string(),
        ))
    }
}

/// Path source fed by a host platform (or a test) through a channel
///
/// The receiving end can be handed out once.
pub struct ChannelPathSource {
    rx: Mutex<Option<mpsc::Receiver<PathStatus>>>,
}

impl ChannelPathSource {
    pub fn new(buffer: usize) -> (Self, mpsc::Sender<PathStatus>) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            Self {
                rx: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

impl NetworkPathSource for ChannelPathSource {
    fn observe(&self) -> Result<mpsc::Receiver<PathStatus>> {
        self.rx
            .lock()
            .map_err(|_| Error::Internal("path source lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| Error::InvalidState("path source already observed".to_string()))
    }
}

/// Generic path reachability by periodic TCP connect
///
/// Says nothing about whether the backend answers; it only tells whether
/// packets get out at all.
pub struct TcpPathSource {
    addr: String,
    poll_interval: Duration,
    connect_timeout: Duration,
}

impl TcpPathSource {
    pub fn new(addr: impl Into<String>, poll_interval: Duration, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            poll_interval,
            connect_timeout,
        }
    }

    /// `host:port` of a base URL, using the scheme's default port
    pub fn addr_from_url(base_url: &str) -> Result<String> {
        let url = reqwest::Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid backend URL {}: {}", base_url, e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::Config(format!("Backend URL {} has no host", base_url)))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::Config(format!("Backend URL {} has no port", base_url)))?;
        Ok(format!("{}:{}", host, port))
    }
}

impl NetworkPathSource for TcpPathSource {
    fn observe(&self) -> Result<mpsc::Receiver<PathStatus>> {
        if self.addr.is_empty() {
            return Err(Error::Config("empty path probe address".to_string()));
        }

        let (tx, rx) = mpsc::channel(8);
        let addr = self.addr.clone();
        let poll_interval = self.poll_interval;
        let connect_timeout = self.connect_timeout;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let status =
                    match tokio::time::timeout(connect_timeout, TcpStream::connect(&addr)).await {
                        Ok(Ok(_)) => PathStatus::Satisfied,
                        Ok(Err(e)) => {
                            trace!(addr = %addr, error = %e, "Path connect failed");
                            PathStatus::Unsatisfied
                        }
                        Err(_) => PathStatus::Unsatisfied,
                    };
                if tx.send(status).await.is_err() {
                    debug!(addr = %addr, "Path observer dropped, stopping TCP polling");
                    break;
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_from_url_default_ports() {
        assert_eq!(
            TcpPathSource::addr_from_url("https://db.parlo.test").unwrap(),
            "db.parlo.test:443"
        );
        assert_eq!(
            TcpPathSource::addr_from_url("http://127.0.0.1:54321/rest").unwrap(),
            "127.0.0.1:54321"
        );
        assert!(TcpPathSource::addr_from_url("not a url").is_err());
    }

    #[test]
    fn test_channel_source_hands_out_once() {
        let (source, _tx) = ChannelPathSource::new(4);
        assert!(source.observe().is_ok());
        assert!(matches!(source.observe(), Err(Error::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_tcp_source_sees_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let source = TcpPathSource::new(addr, Duration::from_millis(20), Duration::from_secs(1));
        let mut rx = source.observe().unwrap();
        assert_eq!(rx.recv().await, Some(PathStatus::Satisfied));
    }
}
