//! Structured events produced by sessions and the sinks that consume them.

use chrono::{DateTime, Local};
use std::fmt;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Helo,
    Ehlo,
    MailFrom,
    RcptTo,
    Data,
    Quit,
    Unknown,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Verb::Helo => "HELO",
            Verb::Ehlo => "EHLO",
            Verb::MailFrom => "MAIL FROM",
            Verb::RcptTo => "RCPT TO",
            Verb::Data => "DATA",
            Verb::Quit => "QUIT",
            Verb::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Connect {
        remote_addr: String,
    },
    /// For `Verb::Unknown` the argument is the whole line as received.
    Command {
        verb: Verb,
        argument: String,
    },
    MessageComplete {
        sender: Option<String>,
        recipients: Vec<String>,
        remote_addr: String,
        helo: Option<String>,
        body_lines: Vec<String>,
    },
    Disconnect {
        remote_addr: String,
    },
}

#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub at: DateTime<Local>,
    pub session_id: String,
    pub kind: EventKind,
}

impl AuditEvent {
    pub fn now(session_id: &str, kind: EventKind) -> Self {
        Self {
            at: Local::now(),
            session_id: session_id.to_string(),
            kind,
        }
    }
}

/// Receives every event of every session. Called concurrently from many
/// connection tasks, so implementations serialize their own writes.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Keeps events in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }
}

impl AuditSink for MemorySink {
    fn record(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_keeps_order() {
        let sink = MemorySink::new();
        sink.record(AuditEvent::now(
            "abcd1234",
            EventKind::Connect {
                remote_addr: "198.51.100.1".to_string(),
            },
        ));
        sink.record(AuditEvent::now(
            "abcd1234",
            EventKind::Disconnect {
                remote_addr: "198.51.100.1".to_string(),
            },
        ));

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.session_id == "abcd1234"));
        assert!(matches!(events[0].kind, EventKind::Connect { .. }));
        assert!(matches!(events[1].kind, EventKind::Disconnect { .. }));
        assert!(events[0].at <= events[1].at);
    }

    #[test]
    fn test_verb_display() {
        assert_eq!(Verb::MailFrom.to_string(), "MAIL FROM");
        assert_eq!(Verb::RcptTo.to_string(), "RCPT TO");
        assert_eq!(Verb::Unknown.to_string(), "UNKNOWN");
    }
}
