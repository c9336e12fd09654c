use crate::audit::AuditSink;
use crate::interpreter::Interpreter;
use crate::session::Session;
use crate::Opt;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Longest line handed to the interpreter. Anything past it is dropped.
pub const MAX_LINE_BYTES: u64 = 64 * 1024;

pub struct SmtpHoneypot {
    pub opt: Opt,
    sink: Arc<dyn AuditSink>,
}

/// Reads one line into `line`, keeping at most `MAX_LINE_BYTES` of it.
/// The remainder of an over-long line is consumed and discarded up to its
/// newline, so it can never be taken for a line of its own. Returns the
/// number of bytes consumed, 0 at end of stream.
pub async fn read_line_capped<R>(reader: &mut R, line: &mut Vec<u8>) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut n = (&mut *reader).take(MAX_LINE_BYTES).read_until(b'\n', line).await?;
    if line.ends_with(b"\n") || (n as u64) < MAX_LINE_BYTES {
        return Ok(n);
    }

    let mut overflow = Vec::new();
    loop {
        overflow.clear();
        let m = (&mut *reader).take(MAX_LINE_BYTES).read_until(b'\n', &mut overflow).await?;
        n += m;
        if m == 0 || overflow.ends_with(b"\n") {
            return Ok(n);
        }
    }
}

/// Textual peer address, or a placeholder when the socket cannot tell.
pub fn peer_label(addr: io::Result<SocketAddr>) -> String {
    match addr {
        Ok(addr) => addr.ip().to_string(),
        Err(_) => "unknown".to_string(),
    }
}

impl SmtpHoneypot {
    pub fn with_sink(opt: Opt, sink: Arc<dyn AuditSink>) -> Self {
        Self { opt, sink }
    }

    /// Runs one SMTP conversation to completion. The disconnect event is
    /// recorded however the conversation ends.
    pub async fn handle_client<S>(&self, stream: S, remote_addr: String) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let interp = Interpreter::new(&self.opt.hostname, self.sink.as_ref());
        let mut session = Session::new(remote_addr);

        let outcome = self.converse(&interp, &mut session, stream).await;
        interp.hang_up(&session);
        debug!(
            session = %session.id,
            elapsed_ms = (chrono::Local::now() - session.started_at).num_milliseconds(),
            "session finished"
        );
        outcome
    }

    async fn converse<S>(&self, interp: &Interpreter<'_>, session: &mut Session, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);

        let banner = interp.greet(session);
        writer.write_all(format!("{banner}\r\n").as_bytes()).await?;
        writer.flush().await?;

        let mut line = Vec::new();
        loop {
            line.clear();
            if read_line_capped(&mut reader, &mut line).await? == 0 {
                break;
            }

            let step = interp.handle_line(session, &line);
            for reply in &step.replies {
                debug!(session = %session.id, "<< {}", reply);
                writer.write_all(reply.as_bytes()).await?;
                writer.write_all(b"\r\n").await?;
            }
            writer.flush().await?;

            if step.close {
                writer.shutdown().await?;
                break;
            }
        }

        Ok(())
    }

    /// Accepts connections until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr()?;
        info!("listening on {}", local);

        loop {
            let (stream, _) = listener
                .accept()
                .await
                .with_context(|| format!("Accept failed on {}", local))?;
            let remote_addr = peer_label(stream.peer_addr());
            let this = self.clone();

            tokio::spawn(async move {
                if let Err(e) = this.handle_client(stream, remote_addr.clone()).await {
                    debug!(peer = %remote_addr, "connection ended with error: {:#}", e);
                }
            });
        }
    }

    /// Binds every configured port and serves until Ctrl-C.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut servers = JoinSet::new();

        for port in self.opt.ports.clone() {
            let addr = format!("{}:{}", self.opt.address, port);
            let listener = TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Failed to bind to {}", addr))?;
            servers.spawn(self.clone().serve(listener));
        }

        tokio::select! {
            Some(joined) = servers.join_next() => {
                let result = joined.context("listener task panicked")?;
                if let Err(e) = &result {
                    error!("listener stopped: {:#}", e);
                }
                result
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                info!("interrupt received, shutting down");
                servers.shutdown().await;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_line_capped_drops_overflow() {
        let cap = MAX_LINE_BYTES as usize;
        let mut input = vec![b'a'; cap + 10];
        input.extend_from_slice(b".\r\nnext\r\n");
        let mut reader = BufReader::new(&input[..]);
        let mut line = Vec::new();

        let n = read_line_capped(&mut reader, &mut line).await.unwrap();
        assert_eq!(n, cap + 13);
        assert_eq!(line, vec![b'a'; cap]);

        line.clear();
        read_line_capped(&mut reader, &mut line).await.unwrap();
        assert_eq!(line, b"next\r\n");

        line.clear();
        assert_eq!(read_line_capped(&mut reader, &mut line).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_line_capped_exact_fit_and_eof() {
        let cap = MAX_LINE_BYTES as usize;
        let mut input = vec![b'b'; cap - 2];
        input.extend_from_slice(b"\r\ntail");
        let mut reader = BufReader::new(&input[..]);
        let mut line = Vec::new();

        read_line_capped(&mut reader, &mut line).await.unwrap();
        assert_eq!(line.len(), cap);
        assert!(line.ends_with(b"\r\n"));

        line.clear();
        assert_eq!(read_line_capped(&mut reader, &mut line).await.unwrap(), 4);
        assert_eq!(line, b"tail");
    }

    #[test]
    fn test_peer_label() {
        let v4: SocketAddr = "203.0.113.5:40000".parse().unwrap();
        let v6: SocketAddr = "[2001:db8::1]:25".parse().unwrap();
        assert_eq!(peer_label(Ok(v4)), "203.0.113.5");
        assert_eq!(peer_label(Ok(v6)), "2001:db8::1");
        assert_eq!(
            peer_label(Err(io::Error::new(io::ErrorKind::NotConnected, "gone"))),
            "unknown"
        );
    }
}
