//! Background thread that owns the secure channel
//!
//! The console never blocks on the link directly: it posts a [`Command`],
//! waits for the matching [`Event`], and reads the session state from a
//! shared snapshot in between.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use net_transport::Transport;
use parking_lot::RwLock;
use secure_channel::{Established, Outcome, SecureChannel, SessionState};
use tracing::{debug, info};

/// Error type for worker requests
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Channel worker has stopped")]
    Stopped,
    #[error("Failed to spawn channel worker: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Establish,
    GetTemperature,
    ToggleLed,
    Close,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Established(Established),
    Temperature(Outcome<f32>),
    Led(Outcome<bool>),
    Closed(Outcome<()>),
}

pub struct ChannelWorker {
    commands: Option<Sender<Command>>,
    events: Receiver<Event>,
    state: Arc<RwLock<SessionState>>,
    handle: Option<JoinHandle<()>>,
}

impl ChannelWorker {
    pub fn spawn<T>(channel: SecureChannel<T>) -> WorkerResult<Self>
    where
        T: Transport + Send + 'static,
    {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let state = Arc::new(RwLock::new(channel.state()));
        let snapshot = Arc::clone(&state);

        let handle = thread::Builder::new()
            .name("channel-worker".to_string())
            .spawn(move || run(channel, command_rx, event_tx, snapshot))?;

        Ok(Self {
            commands: Some(command_tx),
            events: event_rx,
            state,
            handle: Some(handle),
        })
    }

    /// Session state as of the last completed command
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Run one command and wait for its result
    pub fn request(&self, command: Command) -> WorkerResult<Event> {
        self.commands
            .as_ref()
            .ok_or(WorkerError::Stopped)?
            .send(command)
            .map_err(|_| WorkerError::Stopped)?;
        self.events.recv().map_err(|_| WorkerError::Stopped)
    }
}

impl Drop for ChannelWorker {
    fn drop(&mut self) {
        self.commands.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run<T: Transport>(
    mut channel: SecureChannel<T>,
    commands: Receiver<Command>,
    events: Sender<Event>,
    state: Arc<RwLock<SessionState>>,
) {
    info!("Channel worker started");

    for command in commands.iter() {
        debug!(?command, "worker command");
        let event = match command {
            Command::Establish => Event::Established(channel.establish()),
            Command::GetTemperature => Event::Temperature(channel.get_temperature()),
            Command::ToggleLed => Event::Led(channel.toggle_led()),
            Command::Close => Event::Closed(channel.close()),
        };

        *state.write() = channel.state();

        if events.send(event).is_err() {
            break;
        }
    }

    info!("Channel worker stopped");
}
