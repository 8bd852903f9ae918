use std::path::Path;
use std::time::Instant;

use log::{debug, error, info};
use tempfile::TempPath;

use crate::{has_content, temp_path, Activation, ConversionError, ExternalProcess, TemplateParams, ToolSettings};

const PROGRAM: &str = "ffmpeg";

const DEFAULT_PARAMETERS: &str =
    "-y -itsoffset ${offset} -i ${input} -vcodec mjpeg -vframes 1 -an -f rawvideo -s ${size} ${output}";

/// The thumbnail size used when none is requested.
///
pub const DEFAULT_VIDEO_THUMBNAIL_SIZE: &str = "320x240";

/// The `VideoToImage` service, extracting a JPEG frame from a video file with FFmpeg.
///
#[derive(Debug, Clone)]
pub struct VideoToImage {
    enabled: bool,
    process: ExternalProcess,
}

impl VideoToImage {
    /// Create the service from a process definition.
    ///
    /// The template receives the placeholders `offset`, `input`, `output` and `size`.
    ///
    pub fn new(process: ExternalProcess, enabled: bool) -> Self {
        Self { enabled, process }
    }

    /// Create the service from user settings. FFmpeg is disabled unless activated.
    ///
    pub async fn from_settings(settings: &ToolSettings) -> Self {
        let enabled = settings.enabled(PROGRAM, Activation::Disabled).await;
        let process = settings.process(PROGRAM, settings.parameters_or(DEFAULT_PARAMETERS));
        Self::new(process, enabled)
    }

    /// Whether the service is enabled.
    ///
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Generate a JPEG thumbnail for a video file.
    ///
    /// # Arguments
    ///
    /// * `video_path` - The video file.
    /// * `output_path` - The file to write the thumbnail to.
    /// * `offset_seconds` - The input time offset; a positive offset delays the streams by that many seconds.
    /// * `size` - The thumbnail size, e.g. `640x480`. Defaults to [`DEFAULT_VIDEO_THUMBNAIL_SIZE`].
    ///
    /// # Returns
    ///
    /// `true` only if FFmpeg exited with code `0`.
    ///
    pub async fn generate(
        &self,
        video_path: &Path,
        output_path: &Path,
        offset_seconds: u32,
        size: Option<&str>,
    ) -> Result<bool, ConversionError> {
        if !self.enabled {
            info!("FFmpeg service is not enabled. Skip converting file {}", video_path.display());
            return Ok(false);
        }

        let timer = Instant::now();
        let size = size
            .filter(|size| !size.trim().is_empty())
            .unwrap_or(DEFAULT_VIDEO_THUMBNAIL_SIZE);
        let params = TemplateParams::new()
            .with("offset", offset_seconds)
            .with_path("input", video_path)
            .with_path("output", output_path)
            .with("size", size);

        let output = self.process.run(&params).await?;
        if !output.success() && !output.stderr.is_empty() {
            error!("External process finished with error. Cause: {}", output.stderr);
        } else if !output.stderr.is_empty() {
            debug!("{}", output.stderr);
        }

        debug!(
            "Generating thumbnail {} from {} done (exit code: {:?}) in {} ms",
            output_path.display(),
            video_path.display(),
            output.exit_code(),
            timer.elapsed().as_millis()
        );
        Ok(output.success())
    }

    /// Generate a JPEG thumbnail for a video file into a temporary file.
    ///
    /// # Returns
    ///
    /// The temporary thumbnail file, or [`None`] if the service is disabled or FFmpeg produced no image.
    /// The file is removed once the returned [`TempPath`] is dropped.
    ///
    pub async fn generate_to_temp(
        &self,
        video_path: &Path,
        offset_seconds: u32,
        size: Option<&str>,
    ) -> Result<Option<TempPath>, ConversionError> {
        if !self.enabled {
            info!("FFmpeg service is not enabled. Skip converting file {}", video_path.display());
            return Ok(None);
        }

        let output_path = temp_path("video-thumbnail")?;
        let generated = self.generate(video_path, &output_path, offset_seconds, size).await?;

        Ok((generated && has_content(&output_path).await).then_some(output_path))
    }
}
