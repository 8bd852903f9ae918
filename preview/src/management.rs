//!
//! The registry of preview services.
//!
use std::sync::Arc;

use log::info;

use identify::groups::MimeGroups;
use services::{OfficeToPdf, PdfToImage, PdfToSwf, VideoToImage};

use crate::decider::Capability;
use crate::settings::PreviewSettings;
use crate::thumbnails::DocumentThumbnailService;
use crate::tools::DocumentConverter;
use crate::video::VideoThumbnailService;
use crate::viewer::DocumentViewerService;

/// Holds the preview services available to the jobs and rules.
///
/// Every service is optional; operations needing an absent service are skipped.
///
#[derive(Clone)]
pub struct DocumentManagement {
    groups: Arc<MimeGroups>,
    converter: Option<Arc<dyn DocumentConverter>>,
    thumbnails: Option<Arc<DocumentThumbnailService>>,
    video: Option<Arc<VideoThumbnailService>>,
    viewer: Option<Arc<DocumentViewerService>>,
}

impl Default for DocumentManagement {
    fn default() -> Self {
        Self::new(Arc::new(MimeGroups::builtin()))
    }
}

impl DocumentManagement {
    /// Create an empty registry.
    ///
    pub fn new(groups: Arc<MimeGroups>) -> Self {
        Self {
            groups,
            converter: None,
            thumbnails: None,
            video: None,
            viewer: None,
        }
    }

    /// Build all services from settings.
    ///
    /// Tools with `auto` activation are probed here, once.
    ///
    pub async fn from_settings(settings: &PreviewSettings) -> Self {
        let groups = Arc::new(settings.groups());
        let capability = |enabled: bool, formats: &[String]| {
            Capability::new(groups.clone(), formats.to_vec()).with_enabled(enabled)
        };

        let converter: Arc<dyn DocumentConverter> = Arc::new(OfficeToPdf::from_settings(&settings.converter).await);

        let thumbnails = &settings.thumbnails;
        let renderer = PdfToImage::from_settings(&thumbnails.renderer)
            .await
            .with_resolution(thumbnails.resolution);
        let thumbnail_service = DocumentThumbnailService::new(
            capability(thumbnails.enabled, &thumbnails.supported_formats),
            Arc::new(renderer),
            Some(converter.clone()),
        )
        .use_png(thumbnails.use_png);

        let video = &settings.video;
        let video_service = VideoThumbnailService::new(
            capability(video.enabled, &video.supported_formats),
            Arc::new(VideoToImage::from_settings(&video.ffmpeg).await),
        );

        let viewer = &settings.viewer;
        let viewer_service = DocumentViewerService::new(
            capability(viewer.enabled, &viewer.supported_formats),
            Arc::new(PdfToSwf::from_settings(&viewer.pdf2swf).await),
            Some(converter.clone()),
        );

        Self::new(groups.clone())
            .with_converter(converter)
            .with_thumbnails(thumbnail_service)
            .with_video(video_service)
            .with_viewer(viewer_service)
    }

    /// Register the document converter.
    ///
    pub fn with_converter(mut self, converter: Arc<dyn DocumentConverter>) -> Self {
        info!("Bound document converter (enabled: {})", converter.is_enabled());
        self.converter = Some(converter);
        self
    }

    /// Register the document thumbnail service.
    ///
    pub fn with_thumbnails(mut self, service: DocumentThumbnailService) -> Self {
        info!("Bound document thumbnail service (enabled: {})", service.is_enabled());
        self.thumbnails = Some(Arc::new(service));
        self
    }

    /// Register the video thumbnail service.
    ///
    pub fn with_video(mut self, service: VideoThumbnailService) -> Self {
        info!("Bound video thumbnail service (enabled: {})", service.is_enabled());
        self.video = Some(Arc::new(service));
        self
    }

    /// Register the document viewer service.
    ///
    pub fn with_viewer(mut self, service: DocumentViewerService) -> Self {
        info!("Bound document viewer service (enabled: {})", service.is_enabled());
        self.viewer = Some(Arc::new(service));
        self
    }

    /// Returns the MIME groups.
    ///
    pub fn groups(&self) -> &MimeGroups {
        &self.groups
    }

    /// Returns the document converter.
    ///
    pub fn converter(&self) -> Option<&Arc<dyn DocumentConverter>> {
        self.converter.as_ref()
    }

    /// Returns the document thumbnail service.
    ///
    pub fn thumbnails(&self) -> Option<&DocumentThumbnailService> {
        self.thumbnails.as_deref()
    }

    /// Returns the video thumbnail service.
    ///
    pub fn video(&self) -> Option<&VideoThumbnailService> {
        self.video.as_deref()
    }

    /// Returns the document viewer service.
    ///
    pub fn viewer(&self) -> Option<&DocumentViewerService> {
        self.viewer.as_deref()
    }

    /// Whether a document converter is registered and enabled.
    ///
    pub fn is_converter_enabled(&self) -> bool {
        self.converter.as_ref().map_or(false, |c| c.is_enabled())
    }

    /// Whether a document thumbnail service is registered and enabled.
    ///
    pub fn is_thumbnails_enabled(&self) -> bool {
        self.thumbnails().map_or(false, DocumentThumbnailService::is_enabled)
    }

    /// Whether a video thumbnail service is registered and enabled.
    ///
    pub fn is_video_enabled(&self) -> bool {
        self.video().map_or(false, VideoThumbnailService::is_enabled)
    }

    /// Whether a document viewer service is registered and enabled.
    ///
    pub fn is_viewer_enabled(&self) -> bool {
        self.viewer().map_or(false, DocumentViewerService::is_enabled)
    }
}
