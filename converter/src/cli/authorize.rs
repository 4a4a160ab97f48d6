use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use super::options::DriveOptions;
use crate::drive::{AuthorizationFlow, ClientSecrets};

#[derive(Parser, Debug)]
pub struct AuthorizeCommand {
    #[command(flatten)]
    pub drive: DriveOptions,

    /// Seconds to wait for the browser redirect
    #[arg(long, default_value = "300")]
    pub timeout: u64,
}

impl AuthorizeCommand {
    pub async fn run(self) -> Result<()> {
        let client = ClientSecrets::load(&self.drive.credentials).await?;
        let flow = AuthorizationFlow::start(client).await?;

        println!("Please visit this URL to authorize this application:");
        println!("{}", flow.url());

        let http = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client")?;
        let user = flow
            .finish(&http, Duration::from_secs(self.timeout))
            .await?;
        user.save(&self.drive.token).await?;

        tracing::info!(path = %self.drive.token.display(), "stored drive token");
        println!("Saved credentials to {}", self.drive.token.display());
        Ok(())
    }
}
