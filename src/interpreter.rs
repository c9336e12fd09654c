//! Line-by-line SMTP interpreter.
//!
//! Every line gets some plausible answer: addresses are taken verbatim,
//! nothing is validated and nothing is ever relayed. The only state that
//! matters is whether we are reading commands or capturing a message body.

use crate::audit::{AuditEvent, AuditSink, EventKind, Verb};
use crate::session::{Mode, Session};

/// Capabilities advertised after the EHLO greeting line. None is implemented.
const EHLO_CAPABILITIES: [&str; 5] = [
    "SIZE 10485760",
    "ETRN",
    "STARTTLS",
    "ENHANCEDSTATUSCODES",
    "8BITMIME",
];
const EHLO_LAST: &str = "DSN";

/// What the transport has to do after a line was handled.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Step {
    /// Reply lines without their CRLF, in write order.
    pub replies: Vec<String>,
    /// Close the connection once the replies are flushed.
    pub close: bool,
}

impl Step {
    fn reply(line: impl Into<String>) -> Self {
        Self {
            replies: vec![line.into()],
            close: false,
        }
    }

    fn silent() -> Self {
        Self::default()
    }
}

pub struct Interpreter<'a> {
    hostname: &'a str,
    sink: &'a dyn AuditSink,
}

impl<'a> Interpreter<'a> {
    pub fn new(hostname: &'a str, sink: &'a dyn AuditSink) -> Self {
        Self { hostname, sink }
    }

    /// Opens the conversation: records the connection and returns the banner.
    pub fn greet(&self, session: &Session) -> String {
        self.emit(
            session,
            EventKind::Connect {
                remote_addr: session.remote_addr.clone(),
            },
        );
        format!("220 {} ESMTP Postfix", self.hostname)
    }

    /// Records the end of the conversation. Any half-received body is dropped.
    pub fn hang_up(&self, session: &Session) {
        self.emit(
            session,
            EventKind::Disconnect {
                remote_addr: session.remote_addr.clone(),
            },
        );
    }

    /// Handles one raw line as read from the wire, terminator included or not.
    pub fn handle_line(&self, session: &mut Session, raw: &[u8]) -> Step {
        let text = decode_line(raw);
        match session.mode {
            Mode::Command => self.command(session, text.trim()),
            Mode::BodyCapture => self.body(session, &text),
        }
    }

    fn command(&self, session: &mut Session, line: &str) -> Step {
        if let Some(domain) = strip_prefix_ignore_case(line, "HELO ") {
            self.record_command(session, Verb::Helo, domain);
            session.helo = Some(domain.to_string());
            return Step::reply(format!(
                "250 {} Hello {}, nice to meet you",
                self.hostname, session.remote_addr
            ));
        }

        if let Some(domain) = strip_prefix_ignore_case(line, "EHLO ") {
            self.record_command(session, Verb::Ehlo, domain);
            session.helo = Some(domain.to_string());
            let mut replies = Vec::with_capacity(EHLO_CAPABILITIES.len() + 2);
            replies.push(format!("250-{} Hello {}", self.hostname, session.remote_addr));
            replies.extend(EHLO_CAPABILITIES.iter().map(|cap| format!("250-{cap}")));
            replies.push(format!("250 {EHLO_LAST}"));
            return Step {
                replies,
                close: false,
            };
        }

        if let Some(rest) = strip_prefix_ignore_case(line, "MAIL FROM:") {
            let sender = rest.trim();
            self.record_command(session, Verb::MailFrom, sender);
            session.sender = Some(sender.to_string());
            return Step::reply("250 Sender address accepted");
        }

        if let Some(rest) = strip_prefix_ignore_case(line, "RCPT TO:") {
            let recipient = rest.trim();
            self.record_command(session, Verb::RcptTo, recipient);
            session.recipients.push(recipient.to_string());
            return Step::reply("250 Recipient address accepted");
        }

        if line.eq_ignore_ascii_case("DATA") {
            self.record_command(session, Verb::Data, "");
            session.start_body();
            return Step::reply("354 End data with <CR><LF>.<CR><LF>");
        }

        if line.eq_ignore_ascii_case("QUIT") {
            self.record_command(session, Verb::Quit, "");
            return Step {
                replies: vec!["221 Bye".to_string()],
                close: true,
            };
        }

        self.record_command(session, Verb::Unknown, line);
        Step::reply("500 Command not implemented")
    }

    fn body(&self, session: &mut Session, line: &str) -> Step {
        if line != "." {
            session.body_lines.push(line.to_string());
            return Step::silent();
        }

        session.mode = Mode::Command;
        let message = EventKind::MessageComplete {
            sender: session.sender.clone(),
            recipients: session.recipients.clone(),
            remote_addr: session.remote_addr.clone(),
            helo: session.helo.clone(),
            body_lines: std::mem::take(&mut session.body_lines),
        };
        self.emit(session, message);
        session.reset();
        Step::reply("250 OK: Message accepted")
    }

    fn record_command(&self, session: &Session, verb: Verb, argument: &str) {
        self.emit(
            session,
            EventKind::Command {
                verb,
                argument: argument.to_string(),
            },
        );
    }

    fn emit(&self, session: &Session, kind: EventKind) {
        self.sink.record(AuditEvent::now(&session.id, kind));
    }
}

/// Decodes a wire line, replacing invalid UTF-8 with U+FFFD, and strips
/// the trailing CR/LF.
pub fn decode_line(raw: &[u8]) -> String {
    let decoded = String::from_utf8_lossy(raw);
    decoded.trim_end_matches(['\r', '\n']).to_string()
}

fn strip_prefix_ignore_case<'l>(line: &'l str, prefix: &str) -> Option<&'l str> {
    let n = prefix.len();
    if line.len() >= n && line.is_char_boundary(n) && line[..n].eq_ignore_ascii_case(prefix) {
        Some(&line[n..])
    } else {
        None
    }
}
