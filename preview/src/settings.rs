//!
//! User settings of the preview services, read from a JSON file and the environment.
//!
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use identify::groups::MimeGroups;
use services::{Config, ToolSettings, DEFAULT_RESOLUTION, DEFAULT_VIDEO_THUMBNAIL_SIZE};

use crate::thumbnails::{DEFAULT_THUMBNAIL_NAME, DEFAULT_THUMBNAIL_SIZE};
use crate::video::DEFAULT_VIDEO_OFFSET;

const DOCUMENT_FORMATS: &[&str] = &["pdf", "word", "rtf", "excel", "powerpoint", "openoffice"];

fn formats(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

/// Settings of all preview services. Every field may be omitted.
///
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewSettings {
    /// Document thumbnails.
    ///
    pub thumbnails: ThumbnailSettings,

    /// Video thumbnails.
    ///
    pub video: VideoSettings,

    /// Document views.
    ///
    pub viewer: ViewerSettings,

    /// The document converter turning office documents into PDF.
    ///
    pub converter: ToolSettings,

    /// MIME groups added to, or replacing, the built-in ones.
    ///
    pub mime_groups: MimeGroups,

    /// Background execution.
    ///
    pub jobs: JobSettings,
}

/// Settings of the document thumbnail service.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailSettings {
    /// Whether the service is switched on.
    pub enabled: bool,
    /// The MIME groups handled.
    pub supported_formats: Vec<String>,
    /// Produce PNG thumbnails if `true`, JPEG otherwise.
    pub use_png: bool,
    /// The resolution pages are rendered at, in DPI.
    pub resolution: u32,
    /// The derivative name used by the rules.
    pub name: String,
    /// The thumbnail size used by the rules.
    pub size: u32,
    /// The Ghostscript page renderer.
    pub renderer: ToolSettings,
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            supported_formats: formats(DOCUMENT_FORMATS),
            use_png: true,
            resolution: DEFAULT_RESOLUTION,
            name: DEFAULT_THUMBNAIL_NAME.to_string(),
            size: DEFAULT_THUMBNAIL_SIZE,
            renderer: ToolSettings::default(),
        }
    }
}

/// Settings of the video thumbnail service.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    /// Whether the service is switched on.
    pub enabled: bool,
    /// The MIME groups handled.
    pub supported_formats: Vec<String>,
    /// The derivative name used by the rules.
    pub name: String,
    /// The frame position in seconds used by the rules.
    pub offset: u32,
    /// The frame size as `WxH` used by the rules.
    pub size: String,
    /// The FFmpeg frame extractor.
    pub ffmpeg: ToolSettings,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            supported_formats: formats(&["video"]),
            name: DEFAULT_THUMBNAIL_NAME.to_string(),
            offset: DEFAULT_VIDEO_OFFSET,
            size: DEFAULT_VIDEO_THUMBNAIL_SIZE.to_string(),
            ffmpeg: ToolSettings::default(),
        }
    }
}

/// Settings of the document viewer service.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerSettings {
    /// Whether the service is switched on.
    pub enabled: bool,
    /// The MIME groups handled.
    pub supported_formats: Vec<String>,
    /// The pdf2swf converter.
    pub pdf2swf: ToolSettings,
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            supported_formats: formats(DOCUMENT_FORMATS),
            pdf2swf: ToolSettings::default(),
        }
    }
}

/// Settings of background execution.
///
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    /// Run operations triggered by rules as background jobs.
    pub as_background_job: bool,
    /// The number of worker tasks executing jobs.
    pub workers: usize,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            as_background_job: true,
            workers: 2,
        }
    }
}

impl PreviewSettings {
    /// Read settings from a JSON file.
    ///
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).with_context(|| format!("failed to read settings '{}'", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("invalid settings in '{}'", path.display()))
    }

    /// Override the tool settings with environment variables.
    ///
    /// The prefixes are `GHOSTSCRIPT`, `FFMPEG`, `PDF2SWF` and `OFFICE_CONVERTER`, see
    /// [`ToolSettings::with_env_overrides`].
    ///
    pub fn with_env_overrides(mut self, config: &Config) -> Self {
        self.thumbnails.renderer = self.thumbnails.renderer.with_env_overrides(config, "GHOSTSCRIPT");
        self.video.ffmpeg = self.video.ffmpeg.with_env_overrides(config, "FFMPEG");
        self.viewer.pdf2swf = self.viewer.pdf2swf.with_env_overrides(config, "PDF2SWF");
        self.converter = self.converter.with_env_overrides(config, "OFFICE_CONVERTER");
        self
    }

    /// Returns the built-in MIME groups extended by the configured ones.
    ///
    pub fn groups(&self) -> MimeGroups {
        let mut groups = MimeGroups::builtin();
        groups.extend(self.mime_groups.clone());
        groups
    }
}
