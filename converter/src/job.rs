use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::Instrument;

use crate::drive::{AuthError, DriveClient, DriveError, extract_id};
use crate::media::{Mp3Encoder, TranscodeError};
use crate::util::filename::mp3_name;

/// Why a conversion did not complete. The display strings are the messages
/// returned to API callers.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Failed to authenticate with Google Drive.")]
    Auth(#[source] AuthError),

    #[error("Could not extract valid ID from one or both URLs.")]
    InvalidUrl,

    #[error("Download failed.")]
    Download(#[source] DriveError),

    #[error("Conversion failed.")]
    Conversion(#[source] TranscodeError),

    #[error("Upload failed.")]
    Upload(#[source] DriveError),

    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A finished conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conversion {
    pub message: String,
    pub file_id: String,
    pub file_name: String,
    pub file_url: String,
}

/// Drive video to MP3 pipeline: download, transcode, upload.
pub struct Converter {
    drive: DriveClient,
    encoder: Mp3Encoder,
    work_dir: Option<PathBuf>,
    permits: Semaphore,
}

impl Converter {
    pub fn new(
        drive: DriveClient,
        encoder: Mp3Encoder,
        work_dir: Option<PathBuf>,
        max_jobs: usize,
    ) -> Self {
        Self {
            drive,
            encoder,
            work_dir,
            permits: Semaphore::new(max_jobs.max(1)),
        }
    }

    pub fn encoder(&self) -> &Mp3Encoder {
        &self.encoder
    }

    /// Convert the video at `video_url` and upload the MP3 into `folder_url`.
    ///
    /// Local files live in a per-job directory that is removed whatever the
    /// outcome.
    pub async fn process(&self, video_url: &str, folder_url: &str) -> Result<Conversion, JobError> {
        let job_id = uuid::Uuid::new_v4().simple().to_string();
        let span = tracing::info_span!("job", id = %&job_id[..8]);
        self.process_inner(video_url, folder_url).instrument(span).await
    }

    async fn process_inner(&self, video_url: &str, folder_url: &str) -> Result<Conversion, JobError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| JobError::Unexpected("converter is shutting down".to_string()))?;

        tracing::info!(video_url, "authenticating with google drive");
        if let Err(e) = self.drive.authenticate().await {
            tracing::error!(error = %e, "authentication failed");
            return Err(JobError::Auth(e));
        }

        let (Some(video_id), Some(folder_id)) = (extract_id(video_url), extract_id(folder_url))
        else {
            tracing::error!(video_url, folder_url, "could not extract ids");
            return Err(JobError::InvalidUrl);
        };
        tracing::info!(video_id, folder_id, "resolved drive ids");

        let workspace = self.workspace().await?;
        let result = self.run(workspace.path(), &video_id, &folder_id).await;

        let path = workspace.path().to_path_buf();
        match workspace.close() {
            Ok(()) => tracing::debug!(path = %path.display(), "cleaned up job directory"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not remove job directory"),
        }

        match &result {
            Ok(conversion) => tracing::info!(file_id = %conversion.file_id, "{}", conversion.message),
            Err(e) => match std::error::Error::source(e) {
                Some(cause) => tracing::error!(error = %e, %cause, "conversion job failed"),
                None => tracing::error!(error = %e, "conversion job failed"),
            },
        }
        result
    }

    async fn workspace(&self) -> Result<tempfile::TempDir, JobError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("convert-");
        let dir = match &self.work_dir {
            Some(root) => {
                tokio::fs::create_dir_all(root)
                    .await
                    .map_err(|e| JobError::Unexpected(format!("{}: {e}", root.display())))?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        };
        dir.map_err(|e| JobError::Unexpected(format!("could not create job directory: {e}")))
    }

    async fn run(&self, dir: &Path, video_id: &str, folder_id: &str) -> Result<Conversion, JobError> {
        let original_name = self.drive.file_name(video_id).await.map_err(JobError::Download)?;
        tracing::info!(name = %original_name, "starting download");

        let video = dir.join(format!("source-{video_id}"));
        self.drive
            .download(video_id, &video)
            .await
            .map_err(JobError::Download)?;

        let mp3 = dir.join(mp3_name(&original_name));
        self.encoder
            .transcode(&video, &mp3)
            .await
            .map_err(JobError::Conversion)?;

        let uploaded = self
            .drive
            .upload(&mp3, folder_id)
            .await
            .map_err(JobError::Upload)?;

        let file_name = uploaded
            .name
            .clone()
            .unwrap_or_else(|| mp3_name(&original_name));
        Ok(Conversion {
            message: format!("Successfully processed and uploaded: {file_name}"),
            file_url: uploaded.url(),
            file_id: uploaded.id,
            file_name,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::drive::Authenticator;
    use crate::testing::{FORBIDDEN_FOLDER, FakeDrive, FakeFfmpeg, fake_ffmpeg, test_http, write_token};

    const VIDEO_URL: &str = "https://drive.google.com/file/d/vid1/view?usp=sharing";
    const FOLDER_URL: &str = "https://drive.google.com/drive/folders/folder9?usp=sharing";

    struct Fixture {
        fake: FakeDrive,
        dir: tempfile::TempDir,
    }

    impl Fixture {
        async fn new() -> Self {
            let fake = FakeDrive::start().await;
            fake.add_file("vid1", "Lecture 1: Intro.mp4", b"fake video stream");
            Self {
                fake,
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn jobs_dir(&self) -> PathBuf {
            self.dir.path().join("jobs")
        }

        async fn converter(&self, behaviour: FakeFfmpeg, with_token: bool) -> Converter {
            let token_path = if with_token {
                write_token(self.dir.path(), &self.fake, false, "refresh-ok").await
            } else {
                self.dir.path().join("token.json")
            };
            let auth = Arc::new(Authenticator::new(
                test_http(),
                self.dir.path().join("credentials.json"),
                token_path,
            ));
            let drive = DriveClient::new(test_http(), auth, &self.fake.base_url, &self.fake.base_url);
            let encoder = Mp3Encoder {
                ffmpeg: fake_ffmpeg(self.dir.path(), behaviour),
                ..Default::default()
            };
            Converter::new(drive, encoder, Some(self.jobs_dir()), 2)
        }

        fn leftover_jobs(&self) -> usize {
            std::fs::read_dir(self.jobs_dir())
                .map(|entries| entries.count())
                .unwrap_or(0)
        }
    }

    #[tokio::test]
    async fn converts_and_uploads() {
        let fx = Fixture::new().await;
        let converter = fx.converter(FakeFfmpeg::Copy, true).await;

        let conversion = converter.process(VIDEO_URL, FOLDER_URL).await.unwrap();

        assert_eq!(
            conversion.message,
            "Successfully processed and uploaded: Lecture 1_ Intro.mp3"
        );
        assert_eq!(conversion.file_name, "Lecture 1_ Intro.mp3");
        assert_eq!(
            conversion.file_url,
            format!("https://drive.google.com/file/d/{}/view", conversion.file_id)
        );

        let uploads = fx.fake.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].parents, vec!["folder9".to_string()]);
        assert_eq!(uploads[0].bytes, b"fake video stream");
        assert_eq!(fx.leftover_jobs(), 0);
    }

    #[tokio::test]
    async fn missing_token_fails_authentication() {
        let fx = Fixture::new().await;
        let converter = fx.converter(FakeFfmpeg::Copy, false).await;

        let err = converter.process(VIDEO_URL, FOLDER_URL).await.unwrap_err();
        assert!(matches!(err, JobError::Auth(AuthError::MissingCredentials(_))));
        assert_eq!(err.to_string(), "Failed to authenticate with Google Drive.");
    }

    #[tokio::test]
    async fn unrecognised_urls_are_rejected() {
        let fx = Fixture::new().await;
        let converter = fx.converter(FakeFfmpeg::Copy, true).await;

        let err = converter
            .process("https://example.com/video.mp4", FOLDER_URL)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Could not extract valid ID from one or both URLs.");
        assert!(fx.fake.uploads().is_empty());
    }

    #[tokio::test]
    async fn unknown_video_fails_download() {
        let fx = Fixture::new().await;
        let converter = fx.converter(FakeFfmpeg::Copy, true).await;

        let err = converter
            .process("https://drive.google.com/open?id=missing", FOLDER_URL)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Download failed.");
        assert_eq!(fx.leftover_jobs(), 0);
    }

    #[tokio::test]
    async fn ffmpeg_failure_fails_conversion_and_cleans_up() {
        let fx = Fixture::new().await;
        let converter = fx.converter(FakeFfmpeg::Fail, true).await;

        let err = converter.process(VIDEO_URL, FOLDER_URL).await.unwrap_err();
        assert!(matches!(err, JobError::Conversion(TranscodeError::Failed { .. })));
        assert_eq!(err.to_string(), "Conversion failed.");
        assert_eq!(fx.leftover_jobs(), 0);
        assert!(fx.fake.uploads().is_empty());
    }

    #[tokio::test]
    async fn rejected_upload_is_reported() {
        let fx = Fixture::new().await;
        let converter = fx.converter(FakeFfmpeg::Copy, true).await;
        let folder = format!("https://drive.google.com/drive/folders/{FORBIDDEN_FOLDER}");

        let err = converter.process(VIDEO_URL, &folder).await.unwrap_err();
        match &err {
            JobError::Upload(DriveError::Api { status, .. }) => assert_eq!(*status, 403),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.to_string(), "Upload failed.");
        assert_eq!(fx.leftover_jobs(), 0);
    }
}
