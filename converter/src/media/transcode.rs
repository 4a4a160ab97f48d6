use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

const STDERR_TAIL_LINES: usize = 8;

/// Audio bitrate in bits per second. Parsed from `32k`, `128K` or `64000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bitrate(u32);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid bitrate '{0}', expected e.g. 32k or 64000")]
pub struct BitrateError(String);

impl Bitrate {
    pub const SPEECH: Self = Self(32_000);

    pub fn bits_per_second(&self) -> u32 {
        self.0
    }
}

impl Default for Bitrate {
    fn default() -> Self {
        Self::SPEECH
    }
}

impl FromStr for Bitrate {
    type Err = BitrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (digits, scale) = match trimmed.strip_suffix(['k', 'K']) {
            Some(digits) => (digits, 1000),
            None => (trimmed, 1),
        };
        digits
            .parse::<u32>()
            .ok()
            .and_then(|n| n.checked_mul(scale))
            .filter(|bps| *bps > 0)
            .map(Self)
            .ok_or_else(|| BitrateError(s.to_string()))
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 1000 == 0 {
            write!(f, "{}k", self.0 / 1000)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Errors from running ffmpeg.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("ffmpeg not found at '{0}'; make sure FFmpeg is installed and on PATH")]
    NotFound(PathBuf),

    #[error("ffmpeg exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("ffmpeg did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("ffmpeg produced no output at {0}")]
    EmptyOutput(PathBuf),

    #[error("io error running ffmpeg: {0}")]
    Io(#[from] std::io::Error),
}

/// MP3 encoding through the external `ffmpeg` binary.
#[derive(Debug, Clone)]
pub struct Mp3Encoder {
    pub ffmpeg: PathBuf,
    pub bitrate: Bitrate,
    /// Downmix to one channel; halves the size of stereo sources.
    pub mono: bool,
    pub timeout: Duration,
}

impl Default for Mp3Encoder {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            bitrate: Bitrate::default(),
            mono: false,
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

impl Mp3Encoder {
    /// ffmpeg arguments for converting `input` into an MP3 at `output`.
    pub fn args(&self, input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-y", "-i"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(input.as_os_str().to_owned());
        args.push("-vn".into());
        if self.mono {
            args.push("-ac".into());
            args.push("1".into());
        }
        for arg in ["-codec:a", "libmp3lame", "-b:a"] {
            args.push(arg.into());
        }
        args.push(self.bitrate.to_string().into());
        args.push("-f".into());
        args.push("mp3".into());
        args.push(output.as_os_str().to_owned());
        args
    }

    /// Convert `input` to MP3 at `output`.
    ///
    /// The child is killed if this future is dropped or the timeout expires.
    pub async fn transcode(&self, input: &Path, output: &Path) -> Result<(), TranscodeError> {
        tracing::info!(
            input = %input.display(),
            output = %output.display(),
            bitrate = %self.bitrate,
            mono = self.mono,
            "converting to mp3"
        );

        let child = Command::new(&self.ffmpeg)
            .args(self.args(input, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let result = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| TranscodeError::TimedOut(self.timeout))??;

        if !result.status.success() {
            return Err(TranscodeError::Failed {
                status: result.status.to_string(),
                stderr: stderr_tail(&result.stderr),
            });
        }

        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(TranscodeError::EmptyOutput(output.to_path_buf())),
        }
    }

    fn spawn_error(&self, e: std::io::Error) -> TranscodeError {
        if e.kind() == std::io::ErrorKind::NotFound {
            TranscodeError::NotFound(self.ffmpeg.clone())
        } else {
            TranscodeError::Io(e)
        }
    }
}

/// Run `ffmpeg -version` and return its first line.
pub async fn probe_ffmpeg(ffmpeg: &Path) -> Result<String, TranscodeError> {
    let output = Command::new(ffmpeg)
        .arg("-version")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TranscodeError::NotFound(ffmpeg.to_path_buf())
            } else {
                TranscodeError::Io(e)
            }
        })?;

    if !output.status.success() {
        return Err(TranscodeError::Failed {
            status: output.status.to_string(),
            stderr: stderr_tail(&output.stderr),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string())
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n")
}
