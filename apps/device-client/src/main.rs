//! devlink Device Client
//!
//! Interactive console for a devlink device: opens a secure session, reads
//! the temperature, toggles the LED and closes the session again.

mod config;
mod console;
mod worker;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use net_transport::{TcpTransport, Transport};
use secure_channel::device::{Device, DeviceConfig, SimulatedPeripherals};
use secure_channel::loopback::DeviceLoopback;
use secure_channel::{SecureChannel, SessionState, SharedSecret};
use tracing::{info, warn};

use config::ClientConfig;
use console::Action;
use worker::{ChannelWorker, Command};

/// devlink device client
#[derive(Parser)]
#[command(name = "device-client")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Device address, host:port
    #[arg(long)]
    connect: Option<String>,

    /// Pre-shared passphrase
    #[arg(short, long, env = "DEVLINK_SECRET")]
    secret: Option<String>,

    /// Per-read timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Talk to an in-process simulated device instead of the network
    #[arg(long)]
    simulate: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("device_client=info".parse()?)
                .add_directive("secure_channel=info".parse()?)
                .add_directive("net_transport=info".parse()?),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    if config.passphrase.is_empty() {
        anyhow::bail!("No passphrase given; use --secret, DEVLINK_SECRET or the config file");
    }

    info!("Starting devlink device client");

    let secret = SharedSecret::from_passphrase(&config.passphrase);
    let transport: Box<dyn Transport + Send> = if cli.simulate {
        info!("Using in-process simulated device");
        let device = Device::new(
            secret.clone(),
            DeviceConfig::default(),
            SimulatedPeripherals::default(),
        );
        Box::new(DeviceLoopback::new(device))
    } else {
        let transport = TcpTransport::connect(config.transport.clone())
            .with_context(|| format!("Failed to connect to {}", config.transport.address))?;
        Box::new(transport)
    };

    let worker = ChannelWorker::spawn(SecureChannel::new(transport, secret))?;
    run_console(&worker)?;

    if worker.state() == SessionState::Active {
        info!("Closing active session before exit");
        let event = worker.request(Command::Close)?;
        println!("{}", console::render(&event));
    }

    Ok(())
}

fn resolve_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };

    if let Some(address) = &cli.connect {
        config.transport.address = address.clone();
    }
    if let Some(secret) = &cli.secret {
        config.passphrase = secret.clone();
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.transport.read_timeout = Duration::from_millis(timeout_ms);
    }

    Ok(config)
}

fn run_console(worker: &ChannelWorker) -> anyhow::Result<()> {
    println!("{}", console::HELP);

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("{}> ", worker.state());
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            return Ok(());
        };
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        match console::parse(&line) {
            Some(Action::Quit) => return Ok(()),
            Some(Action::Help) => println!("{}", console::HELP),
            Some(Action::Status) => println!("Session {}", worker.state()),
            Some(Action::Run(command)) => {
                if let Err(reason) = console::check_allowed(command, worker.state()) {
                    println!("{}", reason);
                    continue;
                }
                let event = worker.request(command)?;
                println!("{}", console::render(&event));
            }
            None => warn!("Unknown command: {}", line.trim()),
        }
    }
}
