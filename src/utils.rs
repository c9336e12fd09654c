use crate::audit::{AuditEvent, AuditSink, EventKind, Verb};

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use chrono::Local;
use tokio::sync::mpsc;
use tracing::warn;

/// Escapes control characters and anything outside printable ASCII so a
/// hostile peer cannot forge log lines or drive the terminal.
pub fn safe_log_string(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            ' '..='~' | '\t' => out.push(c),
            '\0' => out.push_str("\\0"),
            c if (c as u32) < 0x80 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push_str(&format!("\\u{{{:x}}}", c as u32)),
        }
    }
    out
}

/// Renders one event as the message part of its log lines.
pub fn describe(kind: &EventKind) -> Vec<String> {
    match kind {
        EventKind::Connect { remote_addr } => vec![format!("New connection from: {remote_addr}")],
        EventKind::Command { verb, argument } => vec![match verb {
            Verb::Helo | Verb::Ehlo | Verb::MailFrom | Verb::RcptTo => format!("{verb}: {argument}"),
            Verb::Data => "DATA command received".to_string(),
            Verb::Quit => "QUIT command received".to_string(),
            Verb::Unknown => format!("Unknown command: {argument}"),
        }],
        EventKind::MessageComplete {
            sender,
            recipients,
            remote_addr,
            body_lines,
            ..
        } => {
            let mut lines = Vec::with_capacity(body_lines.len() + 3);
            lines.push(format!(
                "Email completed | From: {} | To: {} | IP: {}",
                sender.as_deref().unwrap_or("None"),
                recipients.join(","),
                remote_addr
            ));
            lines.push("--- BEGIN MESSAGE ---".to_string());
            lines.extend(body_lines.iter().cloned());
            lines.push("--- END MESSAGE ---".to_string());
            lines
        }
        EventKind::Disconnect { remote_addr } => {
            vec![format!("Connection closed from {remote_addr}")]
        }
    }
}

/// Console and file audit log. Also archives completed messages as `.eml`
/// files when a data directory is configured.
///
/// Owned by a single writer thread (see [`Logger::spawn`]); sessions only
/// ever touch the channel in front of it.
pub struct Logger {
    console: Option<Box<dyn Write + Send>>,
    writer: Option<BufWriter<File>>,
    data_dir: Option<PathBuf>,
    raw_display: bool,
}

impl Logger {
    pub fn new(log_file: Option<PathBuf>, data_dir: Option<PathBuf>, raw_display: bool) -> Result<Self> {
        let writer = match log_file {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        std::fs::create_dir_all(parent)
                            .with_context(|| format!("Failed to create log directory: {:?}", parent))?;
                    }
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .with_context(|| format!("Failed to open log file: {:?}", path))?;
                Some(BufWriter::new(file))
            }
            None => None,
        };

        if let Some(dir) = &data_dir {
            if !dir.exists() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create data directory: {:?}", dir))?;
            }
        }

        Ok(Self {
            console: Some(Box::new(io::stdout())),
            writer,
            data_dir,
            raw_display,
        })
    }

    /// Replaces stdout as the console stream.
    pub fn with_console(mut self, console: Box<dyn Write + Send>) -> Self {
        self.console = Some(console);
        self
    }

    /// Moves the logger onto its own thread and returns the sink sessions
    /// record into. The thread exits once every clone of the sink is gone.
    pub fn spawn(mut self) -> Result<(AuditWriter, JoinHandle<()>)> {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditEvent>();
        let handle = std::thread::Builder::new()
            .name("audit-writer".to_string())
            .spawn(move || {
                while let Some(event) = rx.blocking_recv() {
                    self.write(&event);
                }
            })
            .context("Failed to start audit writer thread")?;
        Ok((AuditWriter { tx }, handle))
    }

    /// Logs one event and archives it if it completes a message.
    pub fn write(&mut self, event: &AuditEvent) {
        self.write_entry(event);

        let saved = match (&self.data_dir, &event.kind) {
            (Some(dir), EventKind::MessageComplete { .. }) => save_email_data(dir, event),
            _ => return,
        };
        match saved {
            Ok(path) => {
                let line = format!(
                    "{} [{}] Email saved to: {:?}\n",
                    Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                    event.session_id,
                    path
                );
                self.to_console(&line);
            }
            Err(e) => warn!(session = %event.session_id, "failed to save email: {:#}", e),
        }
    }

    fn write_entry(&mut self, event: &AuditEvent) {
        let timestamp = event.at.format("%Y-%m-%d %H:%M:%S%.3f");
        let lines = describe(&event.kind);

        let mut console = String::new();
        let mut file = String::new();
        for line in &lines {
            let safe = safe_log_string(line);
            let shown = if self.raw_display { line.as_str() } else { safe.as_str() };
            console.push_str(&format!("{} [{}] {}\n", timestamp, event.session_id, shown));
            file.push_str(&format!("{} [{}] {}\n", timestamp, event.session_id, safe));
        }

        self.to_console(&console);

        if let Some(writer) = &mut self.writer {
            if let Err(e) = writer.write_all(file.as_bytes()).and_then(|_| writer.flush()) {
                warn!("audit log write failed: {}", e);
            }
        }
    }

    /// A console that stops accepting output (closed pipe) is dropped; the
    /// file log carries on.
    fn to_console(&mut self, text: &str) {
        if let Some(console) = &mut self.console {
            if let Err(e) = console.write_all(text.as_bytes()).and_then(|_| console.flush()) {
                warn!("console audit output disabled: {}", e);
                self.console = None;
            }
        }
    }
}

/// Sink handed to sessions. Recording never blocks: events are queued for
/// the writer thread in the order they were recorded.
#[derive(Clone)]
pub struct AuditWriter {
    tx: mpsc::UnboundedSender<AuditEvent>,
}

impl AuditSink for AuditWriter {
    fn record(&self, event: AuditEvent) {
        if self.tx.send(event).is_err() {
            warn!("audit writer stopped, event dropped");
        }
    }
}

/// Writes a completed message to `dir` and returns the file path. Every
/// call creates a new file; an existing name gets a numeric suffix.
/// Other event kinds are rejected.
pub fn save_email_data(dir: &Path, event: &AuditEvent) -> Result<PathBuf> {
    let EventKind::MessageComplete {
        sender,
        recipients,
        remote_addr,
        helo,
        body_lines,
    } = &event.kind
    else {
        anyhow::bail!("not a completed message");
    };

    let mut content = String::new();
    content.push_str(&format!("X-Honeypot-Session: {}\r\n", event.session_id));
    content.push_str(&format!("X-Honeypot-Client: {}\r\n", remote_addr));
    content.push_str(&format!("X-Honeypot-Date: {}\r\n", event.at.format("%Y-%m-%d %H:%M:%S")));
    if let Some(helo) = helo {
        content.push_str(&format!("X-Honeypot-HELO: {}\r\n", helo));
    }
    if let Some(sender) = sender {
        content.push_str(&format!("X-Honeypot-MailFrom: {}\r\n", sender));
    }
    for rcpt in recipients {
        content.push_str(&format!("X-Honeypot-RcptTo: {}\r\n", rcpt));
    }
    content.push_str("\r\n");
    content.push_str(&body_lines.join("\r\n"));

    let stem = format!("{}_{}", event.at.format("%Y%m%d_%H%M%S_%3f"), event.session_id);
    let mut suffix = 0u32;
    loop {
        let filename = if suffix == 0 {
            format!("{stem}.eml")
        } else {
            format!("{stem}_{suffix}.eml")
        };
        let filepath = dir.join(filename);

        match OpenOptions::new().write(true).create_new(true).open(&filepath) {
            Ok(mut file) => {
                file.write_all(content.as_bytes())
                    .with_context(|| format!("Failed to write {:?}", filepath))?;
                return Ok(filepath);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => suffix += 1,
            Err(e) => return Err(e).with_context(|| format!("Failed to create {:?}", filepath)),
        }
    }
}
