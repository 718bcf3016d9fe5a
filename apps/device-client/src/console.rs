//! Console commands and log line rendering

use secure_channel::{ResponseStatus, SessionState};

use crate::worker::{Command, Event};

pub const HELP: &str = "\
Commands:
  establish   run the handshake and open a session
  temp        read the device temperature
  led         toggle the device LED
  close       close the session
  status      show the session state
  help        show this text
  quit        close any open session and exit";

/// One parsed console line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Run(Command),
    Status,
    Help,
    Quit,
}

pub fn parse(line: &str) -> Option<Action> {
    let action = match line.trim().to_ascii_lowercase().as_str() {
        "establish" | "open" => Action::Run(Command::Establish),
        "temp" | "temperature" => Action::Run(Command::GetTemperature),
        "led" | "toggle" => Action::Run(Command::ToggleLed),
        "close" => Action::Run(Command::Close),
        "status" => Action::Status,
        "help" | "?" => Action::Help,
        "quit" | "exit" => Action::Quit,
        _ => return None,
    };
    Some(action)
}

/// Refuse commands the current state does not allow
pub fn check_allowed(command: Command, state: SessionState) -> Result<(), &'static str> {
    match (command, state) {
        (Command::Establish, SessionState::Active) => {
            Err("A session is already active; close it first")
        }
        (Command::Establish, SessionState::Uninitialized) => Ok(()),
        (_, SessionState::Uninitialized) => Err("No active session; run `establish` first"),
        (_, SessionState::Active) => Ok(()),
    }
}

/// `[<server time>]    <message>`
pub fn log_line(server_time: &str, message: &str) -> String {
    format!("[{}]    {}", server_time, message)
}

pub fn render(event: &Event) -> String {
    match event {
        Event::Established(result) => {
            let message = if result.success {
                "Session established"
            } else {
                "Session establishment failed"
            };
            log_line(&result.server_time_string(), message)
        }
        Event::Temperature(outcome) => {
            let message = match outcome.status {
                ResponseStatus::Ok => format!("Temperature: {:.2} °C", outcome.payload),
                ResponseStatus::Expired => "The session has expired.".to_string(),
                ResponseStatus::Error => "Could not read the temperature.".to_string(),
            };
            log_line(&outcome.server_time_string(), &message)
        }
        Event::Led(outcome) => {
            let message = match outcome.status {
                ResponseStatus::Ok => format!("Led state is {}", u8::from(outcome.payload)),
                ResponseStatus::Expired => "The session has expired.".to_string(),
                ResponseStatus::Error => "Could not toggle the LED.".to_string(),
            };
            log_line(&outcome.server_time_string(), &message)
        }
        Event::Closed(outcome) => {
            let message = match outcome.status {
                ResponseStatus::Ok => "Session closed",
                ResponseStatus::Expired => "Expired session ... closing",
                ResponseStatus::Error => "Failed closing the session",
            };
            log_line(&outcome.server_time_string(), message)
        }
    }
}
