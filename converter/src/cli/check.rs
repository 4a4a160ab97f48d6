use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::media::probe_ffmpeg;

#[derive(Parser, Debug)]
pub struct CheckCommand {
    /// ffmpeg binary to probe
    #[arg(long, env = "CONVERTER_FFMPEG", default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,
}

impl CheckCommand {
    pub async fn run(self) -> Result<()> {
        let version = probe_ffmpeg(&self.ffmpeg).await?;
        println!("{version}");
        Ok(())
    }
}
