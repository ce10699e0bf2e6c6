//! Signal monitor

use std::io;

use log::info;

#[cfg(unix)]
pub async fn create_signal_monitor() -> io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    // Can fail if setting up signal monitoring fails
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let signal_name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };

    info!("received {}, exiting", signal_name);

    Ok(())
}

#[cfg(not(unix))]
pub async fn create_signal_monitor() -> io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("received Ctrl-C, exiting");
    Ok(())
}
