//! TCP transport implementation

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{DEFAULT_DEVICE_PORT, Transport, TransportError, TransportResult};

/// TCP link configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Device address, `host:port`
    pub address: String,
    #[serde(rename = "connect_timeout_ms", with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Upper bound on one `receive` call
    #[serde(rename = "read_timeout_ms", with = "duration_ms")]
    pub read_timeout: Duration,
    #[serde(rename = "write_timeout_ms", with = "duration_ms")]
    pub write_timeout: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{}", DEFAULT_DEVICE_PORT),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(2),
        }
    }
}

/// Device link over a TCP stream
pub struct TcpTransport {
    stream: TcpStream,
    config: TcpConfig,
}

impl TcpTransport {
    /// Connect to the configured address, trying each resolved candidate
    pub fn connect(config: TcpConfig) -> TransportResult<Self> {
        let candidates: Vec<SocketAddr> = config
            .address
            .to_socket_addrs()
            .map_err(|e| TransportError::AddressParse(format!("{}: {}", config.address, e)))?
            .collect();

        if candidates.is_empty() {
            return Err(TransportError::AddressParse(format!(
                "{}: no addresses resolved",
                config.address
            )));
        }

        let mut last_error = None;
        for addr in candidates {
            debug!("Connecting to {}", addr);
            match TcpStream::connect_timeout(&addr, config.connect_timeout) {
                Ok(stream) => {
                    info!("Connected to device at {}", addr);
                    return Self::from_stream(stream, config);
                }
                Err(e) => {
                    warn!("Connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(TransportError::ConnectionFailed(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no candidates".to_string()),
        ))
    }

    /// Wrap an already-connected stream
    pub fn from_stream(stream: TcpStream, config: TcpConfig) -> TransportResult<Self> {
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(config.write_timeout))?;
        Ok(Self { stream, config })
    }

    /// Throw away whatever is already buffered on the socket
    ///
    /// A reply that arrived after its read deadline would otherwise be read
    /// as the answer to the next request.
    fn discard_pending(&mut self) -> TransportResult<usize> {
        self.stream.set_nonblocking(true)?;

        let mut scratch = [0u8; 256];
        let mut discarded = 0;
        let result = loop {
            match self.stream.read(&mut scratch) {
                Ok(0) => break Ok(()),
                Ok(n) => discarded += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(TransportError::Receive(e.to_string())),
            }
        };

        self.stream.set_nonblocking(false)?;
        result?;

        if discarded > 0 {
            warn!(discarded, "dropped stale bytes before send");
        }
        Ok(discarded)
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, data: &[u8]) -> TransportResult<()> {
        self.discard_pending()?;

        self.stream
            .write_all(data)
            .and_then(|_| self.stream.flush())
            .map_err(|e| TransportError::Send(e.to_string()))?;

        debug!(len = data.len(), "sent frame");
        Ok(())
    }

    fn receive(&mut self, exact: usize) -> TransportResult<Vec<u8>> {
        let deadline = Instant::now() + self.config.read_timeout;
        let mut buf = vec![0u8; exact];
        let mut filled = 0;

        while filled < exact {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.stream.set_read_timeout(Some(remaining))?;

            match self.stream.read(&mut buf[filled..]) {
                Ok(0) => return Err(TransportError::ConnectionClosed),
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => break,
                Err(e) => return Err(TransportError::Receive(e.to_string())),
            }
        }

        if filled < exact {
            debug!(expected = exact, received = filled, "read deadline passed");
        }

        buf.truncate(filled);
        Ok(buf)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
