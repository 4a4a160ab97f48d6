use anyhow::Result;
use clap::{Parser, Subcommand};

mod authorize;
mod check;
mod image;
mod invoke;
mod options;
mod serve;

pub use authorize::AuthorizeCommand;
pub use check::CheckCommand;
pub use image::ImageCommand;
pub use invoke::InvokeCommand;
pub use serve::ServeCommand;

#[derive(Parser, Debug)]
#[command(name = "converter")]
#[command(about = "Convert Google Drive videos to MP3 and upload them back to Drive")]
#[command(version)]
pub struct Args {
    /// Log one JSON object per line instead of human-readable text
    #[arg(long, global = true, env = "CONVERTER_LOG_JSON")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP API (default)
    Serve(ServeCommand),
    /// Process a single serverless-style event and print the response
    Invoke(InvokeCommand),
    /// Run the browser consent flow and store token.json
    Authorize(AuthorizeCommand),
    /// Verify that ffmpeg is installed and runnable
    Check(CheckCommand),
    /// Render, plan or build the service container image
    Image(ImageCommand),
}

impl Args {
    pub async fn run(self) -> Result<()> {
        let command = match self.command {
            Some(command) => command,
            None => Command::Serve(ServeCommand::try_parse_from(["serve"])?),
        };

        match command {
            Command::Serve(cmd) => cmd.run().await,
            Command::Invoke(cmd) => cmd.run().await,
            Command::Authorize(cmd) => cmd.run().await,
            Command::Check(cmd) => cmd.run().await,
            Command::Image(cmd) => cmd.run().await,
        }
    }
}
