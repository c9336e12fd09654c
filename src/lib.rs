//! A decoy SMTP server.
//!
//! It greets like Postfix, accepts any envelope, swallows message bodies and
//! records the whole conversation. Nothing is ever delivered.

pub mod audit;
pub mod daemon;
pub mod honeypot;
pub mod interpreter;
pub mod session;
pub mod utils;

use std::path::PathBuf;
use structopt::StructOpt;

pub use audit::{AuditEvent, AuditSink, EventKind, MemorySink, Verb};
pub use honeypot::SmtpHoneypot;
pub use interpreter::{Interpreter, Step};
pub use session::{Mode, Session};

#[derive(Debug, StructOpt, Clone)]
#[structopt(
    name = "smtp-lure",
    about = "A decoy SMTP server that records everything automated senders try to deliver"
)]
pub struct Opt {
    /// Run as daemon
    #[structopt(short = "d", long = "daemon")]
    pub daemon: bool,

    /// Pid file written in daemon mode
    #[structopt(long = "pid-file", default_value = "/tmp/smtp-lure.pid", parse(from_os_str))]
    pub pid_file: PathBuf,

    /// Listening ports (can be specified multiple times)
    #[structopt(short = "p", long = "port", default_value = "2525", number_of_values = 1)]
    pub ports: Vec<u16>,

    /// Listening address
    #[structopt(short = "a", long = "address", default_value = "0.0.0.0")]
    pub address: String,

    /// Host name announced in the banner and HELO/EHLO replies
    #[structopt(long = "hostname", default_value = "exposed.api.com")]
    pub hostname: String,

    /// Audit log file path
    #[structopt(long = "logs", parse(from_os_str))]
    pub log_file: Option<PathBuf>,

    /// Directory to save captured messages
    #[structopt(long = "data", parse(from_os_str))]
    pub data_dir: Option<PathBuf>,

    /// Verbose mode - debug diagnostics and every reply line
    #[structopt(short = "v", long = "verbose")]
    pub verbose: bool,

    /// Print audit lines unescaped - DANGEROUS
    #[structopt(short = "r", long = "raw")]
    pub raw_display: bool,
}
