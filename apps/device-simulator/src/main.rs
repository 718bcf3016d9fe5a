//! devlink Device Simulator
//!
//! Serves the device side of the session protocol over TCP so the client can
//! be exercised without hardware. One client is served at a time; a new
//! connection always starts from a fresh handshake.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use net_transport::DEFAULT_DEVICE_PORT;
use secure_channel::SharedSecret;
use secure_channel::device::{Device, DeviceConfig, Peripherals, SimulatedPeripherals};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// devlink device simulator
#[derive(Parser)]
#[command(name = "device-simulator")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Pre-shared passphrase
    #[arg(short, long, env = "DEVLINK_SECRET")]
    secret: Option<String>,

    /// Largest accepted gap between requests, in seconds
    #[arg(long)]
    session_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
struct SimulatorConfig {
    listen: String,
    passphrase: String,
    device: DeviceConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            listen: format!("0.0.0.0:{}", DEFAULT_DEVICE_PORT),
            passphrase: String::new(),
            device: DeviceConfig::default(),
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("device_simulator=debug".parse()?)
                .add_directive("secure_channel=debug".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    if config.passphrase.is_empty() {
        anyhow::bail!("No passphrase given; use --secret, DEVLINK_SECRET or the config file");
    }

    info!("Starting devlink device simulator");

    let mut device = Device::new(
        SharedSecret::from_passphrase(&config.passphrase),
        config.device.clone(),
        SimulatedPeripherals::new(config.device.initial_led),
    );

    let listener = TcpListener::bind(&config.listen)
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    info!("Listening on {}", listener.local_addr()?);

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Accept failed: {}", e);
                continue;
            }
        };

        let peer = stream.peer_addr().ok();
        info!("Client connected: {:?}", peer);

        if let Err(e) = serve(&mut device, stream) {
            warn!("Connection {:?} ended with error: {}", peer, e);
        }
        device.reset();
    }

    Ok(())
}

fn resolve_config(cli: &Cli) -> anyhow::Result<SimulatorConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        }
        None => SimulatorConfig::default(),
    };

    if let Some(listen) = &cli.listen {
        config.listen = listen.clone();
    }
    if let Some(secret) = &cli.secret {
        config.passphrase = secret.clone();
    }
    if let Some(secs) = cli.session_timeout_secs {
        config.device.session_timeout_secs = secs;
    }

    Ok(config)
}

/// Feed frames from one client into the device until it disconnects
fn serve<P: Peripherals>(device: &mut Device<P>, mut stream: TcpStream) -> anyhow::Result<()> {
    stream.set_nodelay(true)?;

    loop {
        let timeout = device
            .is_handshaking()
            .then(|| device.config().handshake_timeout())
            .filter(|timeout| !timeout.is_zero());
        stream.set_read_timeout(timeout)?;

        let mut frame = vec![0u8; device.expected_frame_len()];
        match stream.read_exact(&mut frame) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                info!("Client disconnected");
                return Ok(());
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                // read_exact may have consumed part of a frame; the stream
                // can no longer be realigned
                device.abort_handshake();
                info!("Dropping client after handshake timeout");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        match device.handle_frame(&frame) {
            Some(reply) => {
                stream.write_all(&reply)?;
                stream.flush()?;
            }
            None => debug!(len = frame.len(), "frame dropped without reply"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    use crypto_session::{KEY_SIZE, seal};
    use net_transport::{TcpConfig, TcpTransport};
    use secure_channel::{ResponseStatus, SecureChannel, SessionId, SessionState};
    use shared_protocol::{KeyOffer, SESSION_GRANT_FRAME_LEN};
    use zeroize::Zeroizing;

    #[test]
    fn test_client_session_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let mut device = Device::new(
                SharedSecret::from_passphrase("tcp test"),
                DeviceConfig::default(),
                SimulatedPeripherals::new(true).with_temperature(30.0),
            );
            let (stream, _) = listener.accept().unwrap();
            serve(&mut device, stream).unwrap();
            device.is_active()
        });

        let transport = TcpTransport::connect(TcpConfig {
            address: addr.to_string(),
            read_timeout: Duration::from_millis(500),
            ..Default::default()
        })
        .unwrap();
        let mut channel = SecureChannel::new(transport, SharedSecret::from_passphrase("tcp test"));

        assert!(channel.establish().success);
        let temperature = channel.get_temperature();
        assert_eq!(temperature.status, ResponseStatus::Ok);
        assert_eq!(temperature.payload, 30.0);

        let led = channel.toggle_led();
        assert_eq!(led.status, ResponseStatus::Ok);
        assert!(!led.payload);

        assert_eq!(channel.close().status, ResponseStatus::Ok);
        assert_eq!(channel.state(), SessionState::Uninitialized);

        drop(channel);
        assert!(!server.join().unwrap());
    }

    #[test]
    fn test_late_reply_does_not_desync_channel() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let mut device = Device::new(
                SharedSecret::from_passphrase("slow device"),
                DeviceConfig::default(),
                SimulatedPeripherals::new(false).with_temperature(22.0),
            );
            let (mut stream, _) = listener.accept().unwrap();

            // two handshake frames, then the first request is answered late
            for frame_no in 0..5 {
                let mut frame = vec![0u8; device.expected_frame_len()];
                stream.read_exact(&mut frame).unwrap();
                let reply = device.handle_frame(&frame).unwrap();
                if frame_no == 2 {
                    thread::sleep(Duration::from_millis(300));
                }
                stream.write_all(&reply).unwrap();
            }
        });

        let transport = TcpTransport::connect(TcpConfig {
            address: addr.to_string(),
            read_timeout: Duration::from_millis(150),
            ..Default::default()
        })
        .unwrap();
        let mut channel =
            SecureChannel::new(transport, SharedSecret::from_passphrase("slow device"));
        assert!(channel.establish().success);

        assert_eq!(channel.get_temperature().status, ResponseStatus::Error);
        thread::sleep(Duration::from_millis(250));

        let temperature = channel.get_temperature();
        assert_eq!(temperature.status, ResponseStatus::Ok);
        assert_eq!(temperature.payload, 22.0);
        assert_eq!(channel.toggle_led().status, ResponseStatus::Ok);

        server.join().unwrap();
    }

    #[test]
    fn test_handshake_timeout_drops_client() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let secret = SharedSecret::from_passphrase("stalled");

        let device_secret = secret.clone();
        let server = thread::spawn(move || {
            let config = DeviceConfig {
                handshake_timeout_ms: 100,
                ..Default::default()
            };
            let mut device =
                Device::new(device_secret, config, SimulatedPeripherals::default());
            let (stream, _) = listener.accept().unwrap();
            serve(&mut device, stream).unwrap();
            device.is_handshaking()
        });

        let mut stream = TcpStream::connect(addr).unwrap();
        let offer = KeyOffer {
            key: Zeroizing::new([5; KEY_SIZE]),
            challenge: [6; 8],
        };
        let frame = seal(secret.as_bytes(), &offer.encode(), SessionId::NONE.as_bytes()).unwrap();
        stream.write_all(&frame.to_bytes()).unwrap();

        let mut grant = [0u8; SESSION_GRANT_FRAME_LEN];
        stream.read_exact(&mut grant).unwrap();

        // half a clock sync, then silence
        stream.write_all(&[0xAB; 10]).unwrap();
        assert!(!server.join().unwrap());

        let mut rest = Vec::new();
        assert_eq!(stream.read_to_end(&mut rest).unwrap(), 0);
    }

    #[test]
    fn test_config_overrides() {
        let cli = Cli {
            config: None,
            listen: Some("127.0.0.1:4000".to_string()),
            secret: Some("from flag".to_string()),
            session_timeout_secs: Some(5),
        };
        let config = resolve_config(&cli).unwrap();

        assert_eq!(config.listen, "127.0.0.1:4000");
        assert_eq!(config.passphrase, "from flag");
        assert_eq!(config.device.session_timeout_secs, 5);
        assert_eq!(config.device.handshake_timeout_ms, 2000);
    }
}
