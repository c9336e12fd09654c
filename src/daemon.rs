use std::path::Path;

/// Detaches from the terminal. Must run before the tokio runtime is built.
#[cfg(unix)]
pub fn daemonize(pid_file: &Path) -> anyhow::Result<()> {
    use daemonize::Daemonize;

    tracing::info!("starting daemon mode, pid file {:?}", pid_file);

    // Keep the working directory so relative --logs / --data paths still resolve.
    Daemonize::new()
        .pid_file(pid_file)
        .chown_pid_file(true)
        .working_directory(".")
        .umask(0o027u32)
        .start()
        .map_err(|e| anyhow::anyhow!("Failed to start daemon mode: {}", e))
}

#[cfg(not(unix))]
pub fn daemonize(_pid_file: &Path) -> anyhow::Result<()> {
    tracing::warn!("daemon mode not supported on this platform, staying in foreground");
    Ok(())
}
