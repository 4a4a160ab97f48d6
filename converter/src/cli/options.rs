use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use crate::drive::{Authenticator, DEFAULT_API_URL, DriveClient};
use crate::job::Converter;
use crate::media::{Bitrate, Mp3Encoder};

/// Where Google credentials live and which Drive endpoints to talk to.
#[derive(Args, Debug, Clone)]
pub struct DriveOptions {
    /// OAuth client secrets downloaded from Google Cloud Console
    #[arg(long, env = "GOOGLE_CREDENTIALS_FILE", default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Stored user token, written by `converter authorize`
    #[arg(long, env = "GOOGLE_TOKEN_FILE", default_value = "token.json")]
    pub token: PathBuf,

    #[arg(long, env = "GOOGLE_DRIVE_API_URL", default_value = DEFAULT_API_URL, hide = true)]
    pub drive_api_url: String,

    #[arg(long, env = "GOOGLE_DRIVE_UPLOAD_URL", default_value = DEFAULT_API_URL, hide = true)]
    pub drive_upload_url: String,
}

impl DriveOptions {
    pub fn client(&self, http: reqwest::Client) -> DriveClient {
        let auth = Arc::new(Authenticator::new(
            http.clone(),
            self.credentials.clone(),
            self.token.clone(),
        ));
        DriveClient::new(http, auth, &self.drive_api_url, &self.drive_upload_url)
    }
}

#[derive(Args, Debug, Clone)]
pub struct MediaOptions {
    /// ffmpeg binary
    #[arg(long, env = "CONVERTER_FFMPEG", default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    /// MP3 bitrate, e.g. 32k for speech or 128k for music
    #[arg(long, env = "CONVERTER_BITRATE", default_value = "32k")]
    pub bitrate: Bitrate,

    /// Downmix to mono
    #[arg(long, env = "CONVERTER_MONO")]
    pub mono: bool,

    /// Seconds before a conversion is abandoned
    #[arg(long, env = "CONVERTER_TIMEOUT", default_value = "1800")]
    pub timeout: u64,
}

impl MediaOptions {
    pub fn encoder(&self) -> Mp3Encoder {
        Mp3Encoder {
            ffmpeg: self.ffmpeg.clone(),
            bitrate: self.bitrate,
            mono: self.mono,
            timeout: Duration::from_secs(self.timeout),
        }
    }
}

/// Everything needed to build a [`Converter`].
#[derive(Args, Debug, Clone)]
pub struct ConverterOptions {
    #[command(flatten)]
    pub drive: DriveOptions,

    #[command(flatten)]
    pub media: MediaOptions,

    /// Conversions allowed to run at the same time
    #[arg(long, env = "CONVERTER_MAX_JOBS", default_value = "2", value_parser = clap::value_parser!(u32).range(1..))]
    pub max_jobs: u32,

    /// Directory for per-job scratch files (defaults to the system temp dir)
    #[arg(long, env = "CONVERTER_WORK_DIR")]
    pub work_dir: Option<PathBuf>,
}

impl ConverterOptions {
    pub fn build(&self) -> Result<Converter> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("converter/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Converter::new(
            self.drive.client(http),
            self.media.encoder(),
            self.work_dir.clone(),
            self.max_jobs as usize,
        ))
    }
}
