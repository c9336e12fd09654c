use chrono::{DateTime, Local};
use uuid::Uuid;

/// How the next incoming line is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Command,
    /// DATA was accepted and the lone-dot terminator has not arrived yet.
    BodyCapture,
}

/// Per-connection transaction state. Created on accept, dropped on close.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub remote_addr: String,
    pub mode: Mode,
    pub helo: Option<String>,
    pub sender: Option<String>,
    pub recipients: Vec<String>,
    pub body_lines: Vec<String>,
    pub started_at: DateTime<Local>,
}

impl Session {
    pub fn new(remote_addr: impl Into<String>) -> Self {
        Self {
            id: short_id(),
            remote_addr: remote_addr.into(),
            mode: Mode::Command,
            helo: None,
            sender: None,
            recipients: Vec::new(),
            body_lines: Vec::new(),
            started_at: Local::now(),
        }
    }

    /// Drops the current transaction and goes back to command mode.
    /// The HELO name survives, it belongs to the connection.
    pub fn reset(&mut self) {
        self.sender = None;
        self.recipients.clear();
        self.body_lines.clear();
        self.mode = Mode::Command;
    }

    pub fn start_body(&mut self) {
        self.body_lines.clear();
        self.mode = Mode::BodyCapture;
    }
}

fn short_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}
