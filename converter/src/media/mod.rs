pub mod transcode;

pub use transcode::{Bitrate, Mp3Encoder, TranscodeError, probe_ffmpeg};
