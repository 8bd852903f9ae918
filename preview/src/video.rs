//!
//! Generates thumbnails of videos from a still frame.
//!
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use log::debug;
use tempfile::TempPath;

use services::{ConversionError, DEFAULT_VIDEO_THUMBNAIL_SIZE};

use crate::decider::Capability;
use crate::persistence::{download_to_temp, log_failure, read_artifact, store_derivative};
use crate::repository::{ContentStore, FileNode, NewDerivative, RepositoryError};
use crate::tools::FrameExtractor;

/// The position of the captured frame in seconds, unless given otherwise.
///
pub const DEFAULT_VIDEO_OFFSET: u32 = 1;

/// The mixin added to stored video thumbnails.
///
pub const IMAGE_MIXIN: &str = "jmix:image";

/// Generates thumbnails of video files.
///
pub struct VideoThumbnailService {
    capability: Capability,
    extractor: Arc<dyn FrameExtractor>,
}

impl VideoThumbnailService {
    /// Create the service.
    ///
    pub fn new(capability: Capability, extractor: Arc<dyn FrameExtractor>) -> Self {
        Self { capability, extractor }
    }

    /// Returns the capability of the service.
    ///
    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    /// Whether the service and its frame extractor are switched on.
    ///
    pub fn is_enabled(&self) -> bool {
        self.capability.is_enabled() && self.extractor.is_enabled()
    }

    /// Whether a thumbnail can be generated for the node.
    ///
    pub fn can_handle(&self, node: &FileNode) -> bool {
        self.is_enabled() && node.is_file && self.capability.can_handle(node.mimetype())
    }

    /// Capture a frame of a video into a temporary JPEG file.
    ///
    /// # Arguments
    ///
    /// * `video` - The video file.
    /// * `offset_seconds` - The position of the frame.
    /// * `size` - The frame size as `WxH`, `320x240` if empty.
    ///
    pub async fn generate_thumbnail(
        &self,
        video: &Path,
        offset_seconds: u32,
        size: &str,
    ) -> Result<Option<TempPath>, ConversionError> {
        let size = if size.is_empty() { DEFAULT_VIDEO_THUMBNAIL_SIZE } else { size };
        self.extractor.extract_frame(video, offset_seconds, size).await
    }

    /// Generate a thumbnail for a video node and store it as the derivative `name`.
    ///
    /// # Returns
    ///
    /// `true` if a thumbnail was stored. Generation failures are logged and return `false`.
    ///
    pub async fn create_thumbnail_for_node(
        &self,
        store: &dyn ContentStore,
        id: &str,
        name: &str,
        offset_seconds: u32,
        size: &str,
    ) -> Result<bool, RepositoryError> {
        let node = store
            .node(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        if !self.can_handle(&node) {
            debug!("Video thumbnail service cannot handle node {} ({})", node.path, node.mimetype());
            return Ok(false);
        }

        let timer = Instant::now();
        match self.generate_and_store(store, &node, name, offset_seconds, size).await {
            Ok(stored) => {
                if stored {
                    debug!(
                        "Generated video thumbnail {} for node {} in {} ms",
                        name,
                        node.path,
                        timer.elapsed().as_millis()
                    );
                }
                Ok(stored)
            }
            Err(err) => {
                log_failure("video thumbnail", &node, &err);
                Ok(false)
            }
        }
    }

    async fn generate_and_store(
        &self,
        store: &dyn ContentStore,
        node: &FileNode,
        name: &str,
        offset_seconds: u32,
        size: &str,
    ) -> anyhow::Result<bool> {
        let video = download_to_temp(store, node, "video-thumbnail-source").await?;
        let Some(frame) = self.generate_thumbnail(&video, offset_seconds, size).await? else {
            return Ok(false);
        };
        let data = read_artifact(&frame).await?;
        let derivative = NewDerivative::new(name, data, "image/jpeg").mixin(IMAGE_MIXIN);
        let stored = store_derivative(store, &node.id, derivative, |n| self.can_handle(n)).await?;
        Ok(stored.is_some())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use identify::groups::MimeGroups;
    use pretty_assertions::assert_eq;

    use crate::repository::MemoryContentStore;
    use crate::tools::MockFrameExtractor;

    use super::*;

    fn capability() -> Capability {
        Capability::new(Arc::new(MimeGroups::builtin()), vec!["video".to_string()])
    }

    fn jpeg_file() -> TempPath {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0xFF, 0xD8, 0xFF, 0xD9]).unwrap();
        file.into_temp_path()
    }

    #[tokio::test]
    async fn test_create_thumbnail_for_node() {
        let store = MemoryContentStore::new("default");
        store.add_file("/clip.mp4", "video/mp4", b"video".to_vec());
        let mut extractor = MockFrameExtractor::new();
        extractor.expect_is_enabled().return_const(true);
        extractor
            .expect_extract_frame()
            .withf(|_, offset, size| *offset == 1 && size.to_string() == "320x240")
            .times(1)
            .returning(|_, _, _| Ok(Some(jpeg_file())));
        let service = VideoThumbnailService::new(capability(), Arc::new(extractor));

        let stored = service
            .create_thumbnail_for_node(&store, "/clip.mp4", "thumbnail", DEFAULT_VIDEO_OFFSET, "")
            .await
            .unwrap();

        let derivative = store.derivative("/clip.mp4", "thumbnail").await.unwrap().unwrap();
        assert!(stored);
        assert_eq!(derivative.mimetype, "image/jpeg");
        assert_eq!(derivative.mixins, vec![IMAGE_MIXIN]);
        assert_eq!(
            store.derivative_data("/clip.mp4", "thumbnail"),
            Some(vec![0xFF, 0xD8, 0xFF, 0xD9])
        );
    }

    #[tokio::test]
    async fn test_not_a_video() {
        let store = MemoryContentStore::new("default");
        let node = store.add_file("/doc.pdf", "application/pdf", vec![]);
        let mut extractor = MockFrameExtractor::new();
        extractor.expect_is_enabled().return_const(true);
        let service = VideoThumbnailService::new(capability(), Arc::new(extractor));

        assert!(!service.can_handle(&node));
        assert!(!service
            .create_thumbnail_for_node(&store, "/doc.pdf", "thumbnail", 1, "")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_no_frame() {
        let store = MemoryContentStore::new("default");
        store.add_file("/clip.mp4", "video/mp4", vec![]);
        let mut extractor = MockFrameExtractor::new();
        extractor.expect_is_enabled().return_const(true);
        extractor.expect_extract_frame().returning(|_, _, _| Ok(None));
        let service = VideoThumbnailService::new(capability(), Arc::new(extractor));

        let stored = service
            .create_thumbnail_for_node(&store, "/clip.mp4", "thumbnail", 1, "64x48")
            .await
            .unwrap();

        assert!(!stored);
    }

    #[tokio::test]
    async fn test_disabled() {
        let store = MemoryContentStore::new("default");
        let node = store.add_file("/clip.mp4", "video/mp4", vec![]);
        let mut extractor = MockFrameExtractor::new();
        extractor.expect_is_enabled().return_const(false);
        let service = VideoThumbnailService::new(capability(), Arc::new(extractor));

        assert!(!service.can_handle(&node));
    }
}
