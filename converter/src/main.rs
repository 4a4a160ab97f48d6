use anyhow::Result;
use clap::Parser;

mod cli;
mod drive;
mod handler;
mod job;
mod media;
mod server;
mod util;

#[cfg(test)]
mod testing;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    util::logging::init(args.log_json);
    args.run().await
}
