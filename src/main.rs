use smtp_lure::utils::Logger;
use smtp_lure::{daemon, Opt, SmtpHoneypot};

use anyhow::{Context, Result};
use std::sync::Arc;
use structopt::StructOpt;
use tracing::{info, warn, Level};

fn main() -> Result<()> {
    let opt = Opt::from_args();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if opt.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    info!("smtp-lure v{} starting, pid {}", env!("CARGO_PKG_VERSION"), std::process::id());

    // Open the log and data directory before detaching so errors still reach the terminal.
    let logger = Logger::new(opt.log_file.clone(), opt.data_dir.clone(), opt.raw_display)?;

    if opt.daemon {
        daemon::daemonize(&opt.pid_file)?;
    }

    // Threads do not survive the fork, so the writer starts after it.
    let (audit, audit_thread) = logger.spawn()?;
    let honeypot = Arc::new(SmtpHoneypot::with_sink(opt, Arc::new(audit)));

    let runtime = tokio::runtime::Runtime::new().context("Failed to build tokio runtime")?;
    let outcome = runtime.block_on(async move {
        info!("ports: {:?}", honeypot.opt.ports);
        info!("announcing as {}", honeypot.opt.hostname);
        if let Some(path) = &honeypot.opt.log_file {
            info!("audit log: {:?}", path);
        }
        if let Some(dir) = &honeypot.opt.data_dir {
            info!("saving messages to {:?}", dir);
        }
        info!("press Ctrl+C to stop");

        honeypot.run().await
    });

    // Dropping the runtime drops the remaining sessions and their audit
    // senders, which lets the writer drain its queue and exit.
    drop(runtime);
    if audit_thread.join().is_err() {
        warn!("audit writer thread panicked");
    }

    outcome?;
    info!("stopped");
    Ok(())
}
