//!
//! The external tools the preview services depend on, behind traits so they can be replaced.
//!
use std::path::Path;

use async_trait::async_trait;
use tempfile::TempPath;

use services::{ConversionError, OfficeToPdf, PdfToImage, PdfToSwf, VideoToImage};

/// Renders single pages of a PDF to an image.
///
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Whether the renderer is usable.
    ///
    fn is_enabled(&self) -> bool;

    /// Render a page to image bytes.
    ///
    /// # Arguments
    ///
    /// * `pdf` - The PDF file.
    /// * `page` - The zero-based page number.
    ///
    /// # Returns
    ///
    /// The image, or [`None`] if the page does not exist or could not be rendered.
    ///
    async fn render_page(&self, pdf: &Path, page: usize) -> Result<Option<Vec<u8>>, ConversionError>;
}

/// Converts documents between formats, typically office formats into PDF.
///
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Whether the converter is usable.
    ///
    fn is_enabled(&self) -> bool;

    /// Convert `input` from `source_mimetype` into `target_mimetype`.
    ///
    async fn convert(
        &self,
        input: &Path,
        source_mimetype: &str,
        target_mimetype: &str,
    ) -> Result<Option<TempPath>, ConversionError>;
}

/// Captures a still frame of a video.
///
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    /// Whether the extractor is usable.
    ///
    fn is_enabled(&self) -> bool;

    /// Capture the frame at `offset_seconds` scaled to `size` (`WxH`) into a temporary JPEG file.
    ///
    async fn extract_frame(
        &self,
        video: &Path,
        offset_seconds: u32,
        size: &str,
    ) -> Result<Option<TempPath>, ConversionError>;
}

/// Converts PDF documents into a format for the web viewer.
///
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ViewConverter: Send + Sync {
    /// Whether the converter is usable.
    ///
    fn is_enabled(&self) -> bool;

    /// Convert `input` into `output`, returning whether it succeeded.
    ///
    async fn convert(&self, input: &Path, output: &Path) -> Result<bool, ConversionError>;

    /// Convert `input` into a temporary file.
    ///
    async fn convert_to_temp(&self, input: &Path) -> Result<Option<TempPath>, ConversionError>;
}

#[async_trait]
impl PageRenderer for PdfToImage {
    fn is_enabled(&self) -> bool {
        PdfToImage::is_enabled(self)
    }

    async fn render_page(&self, pdf: &Path, page: usize) -> Result<Option<Vec<u8>>, ConversionError> {
        PdfToImage::render_page(self, pdf, page).await
    }
}

#[async_trait]
impl DocumentConverter for OfficeToPdf {
    fn is_enabled(&self) -> bool {
        OfficeToPdf::is_enabled(self)
    }

    async fn convert(
        &self,
        input: &Path,
        source_mimetype: &str,
        target_mimetype: &str,
    ) -> Result<Option<TempPath>, ConversionError> {
        OfficeToPdf::convert(self, input, source_mimetype, target_mimetype).await
    }
}

#[async_trait]
impl FrameExtractor for VideoToImage {
    fn is_enabled(&self) -> bool {
        VideoToImage::is_enabled(self)
    }

    async fn extract_frame(
        &self,
        video: &Path,
        offset_seconds: u32,
        size: &str,
    ) -> Result<Option<TempPath>, ConversionError> {
        let size = (!size.is_empty()).then_some(size);
        self.generate_to_temp(video, offset_seconds, size).await
    }
}

#[async_trait]
impl ViewConverter for PdfToSwf {
    fn is_enabled(&self) -> bool {
        PdfToSwf::is_enabled(self)
    }

    async fn convert(&self, input: &Path, output: &Path) -> Result<bool, ConversionError> {
        PdfToSwf::convert(self, input, output).await
    }

    async fn convert_to_temp(&self, input: &Path) -> Result<Option<TempPath>, ConversionError> {
        PdfToSwf::convert_to_temp(self, input).await
    }
}
