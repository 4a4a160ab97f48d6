use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::options::ConverterOptions;
use crate::handler::handle_event;

#[derive(Parser, Debug)]
pub struct InvokeCommand {
    /// Event JSON file; read from stdin when omitted
    #[arg(long)]
    pub event: Option<PathBuf>,

    #[command(flatten)]
    pub converter: ConverterOptions,
}

impl InvokeCommand {
    pub async fn run(self) -> Result<()> {
        let event = read_event(self.event.as_deref(), tokio::io::stdin()).await?;

        let converter = self.converter.build()?;
        let response = handle_event(&converter, &event).await;

        println!("{}", serde_json::to_string_pretty(&response)?);
        Ok(())
    }
}

/// Read the event from `path`, or from `stdin` when no path is given.
async fn read_event<R: AsyncRead + Unpin>(
    path: Option<&Path>,
    mut stdin: R,
) -> Result<serde_json::Value> {
    let raw = match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut raw = String::new();
            stdin
                .read_to_string(&mut raw)
                .await
                .context("failed to read event from stdin")?;
            raw
        }
    };
    serde_json::from_str(&raw).context("event is not valid JSON")
}
