use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;

use super::options::ConverterOptions;
use crate::media::probe_ffmpeg;
use crate::server::{AppState, run_server};

#[derive(Parser, Debug)]
pub struct ServeCommand {
    /// Interface to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// HTTP server port
    #[arg(short, long, env = "PORT", default_value = "8000")]
    pub port: u16,

    #[command(flatten)]
    pub converter: ConverterOptions,
}

impl ServeCommand {
    pub async fn run(self) -> Result<()> {
        let converter = self.converter.build()?;

        match probe_ffmpeg(&converter.encoder().ffmpeg).await {
            Ok(version) => tracing::info!(%version, "found ffmpeg"),
            Err(e) => tracing::warn!(error = %e, "conversions will fail until ffmpeg is available"),
        }
        if !self.converter.drive.token.exists() {
            tracing::warn!(
                path = %self.converter.drive.token.display(),
                "no stored token; run `converter authorize` before converting"
            );
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let addr = SocketAddr::new(self.host, self.port);
        let state = AppState {
            converter: Arc::new(converter),
        };

        let mut server = tokio::spawn(run_server(addr, state, shutdown_rx));

        tokio::select! {
            result = &mut server => return result?,
            signal = wait_for_shutdown_signal() => signal?,
        }

        tracing::info!("shutting down");
        let _ = shutdown_tx.send(true);
        server.await??;
        Ok(())
    }
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
