use std::path::Path;
use std::time::Instant;

use log::{debug, error, info, warn};
use tokio::io::AsyncRead;

use crate::{has_content, temp_path, transfer, Activation, ConversionError, ExternalProcess, TemplateParams, ToolSettings};

const PROGRAM: &str = "gs";

const DEFAULT_PARAMETERS: &str = concat!(
    "-q ",                       // No program output to stdout
    "-dNOPAUSE ",                // Disable prompt/pause after end of each page
    "-dBATCH ",                  // Exit after operation exits
    "-dSAFER ",                  // Activate sandboxing; prevent I/O access outside specified files
    "-r${resolution} ",          //
    "-sDEVICE=png16m ",          // Use 24-bit PNG image format
    "-dFirstPage=${page} ",      // Render only the requested (one-based) page
    "-dLastPage=${page} ",       //
    "-sOutputFile=${output} ",   //
    "${input}",
);

/// The resolution in DPI pages are rendered at, unless configured otherwise.
///
pub const DEFAULT_RESOLUTION: u32 = 96;

/// The `PdfToImage` service, rendering single PDF pages to PNG images with Ghostscript.
///
#[derive(Debug, Clone)]
pub struct PdfToImage {
    enabled: bool,
    process: ExternalProcess,
    resolution: u32,
}

impl PdfToImage {
    /// Create the service from a process definition.
    ///
    /// The template receives the placeholders `resolution`, `page` (one-based), `input` and `output`.
    ///
    pub fn new(process: ExternalProcess, enabled: bool) -> Self {
        Self {
            enabled,
            process,
            resolution: DEFAULT_RESOLUTION,
        }
    }

    /// Create the service from user settings, probing for the executable if activation is `auto`.
    ///
    pub async fn from_settings(settings: &ToolSettings) -> Self {
        let enabled = settings.enabled(PROGRAM, Activation::Auto).await;
        let process = settings.process(PROGRAM, settings.parameters_or(DEFAULT_PARAMETERS));
        Self::new(process, enabled)
    }

    /// Set the resolution in DPI.
    ///
    pub fn with_resolution(mut self, resolution: u32) -> Self {
        self.resolution = resolution;
        self
    }

    /// Whether the service is enabled.
    ///
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Render a page of a PDF file as a PNG image.
    ///
    /// # Arguments
    ///
    /// * `pdf_path` - The PDF file.
    /// * `page` - The zero-based page index.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(_))` - The encoded PNG image of the page.
    /// * `Ok(None)` - If the service is disabled, the page does not exist, or Ghostscript failed.
    /// * `Err(_)` - If Ghostscript could not be run.
    ///
    pub async fn render_page(&self, pdf_path: &Path, page: usize) -> Result<Option<Vec<u8>>, ConversionError> {
        if !self.enabled {
            info!("Ghostscript service is not enabled. Skip rendering file {}", pdf_path.display());
            return Ok(None);
        }

        let timer = Instant::now();
        let output_path = temp_path("doc-page")?;
        let params = TemplateParams::new()
            .with("resolution", self.resolution)
            .with("page", page + 1)
            .with_path("input", pdf_path)
            .with_path("output", &output_path);

        let output = self.process.run(&params).await?;
        if !output.success() {
            error!("External process finished with error. Cause: {}", output.stderr);
            return Ok(None);
        }
        if !has_content(&output_path).await {
            warn!("No page with the number {} found in the PDF document {}", page, pdf_path.display());
            return Ok(None);
        }

        let image = tokio::fs::read(&output_path).await.map_err(ConversionError::io)?;
        debug!(
            "Generated an image for the page {} of the file {} in {} ms",
            page,
            pdf_path.display(),
            timer.elapsed().as_millis()
        );
        Ok(Some(image))
    }

    /// Render a page of a PDF read from `input` as a PNG image.
    ///
    /// The input is spooled to a temporary file which is removed before returning.
    ///
    pub async fn render_page_from<R>(&self, input: R, page: usize) -> Result<Option<Vec<u8>>, ConversionError>
    where
        R: AsyncRead + Unpin,
    {
        let pdf_path = temp_path("doc-page-source")?;
        let file = tokio::fs::File::create(&pdf_path).await.map_err(ConversionError::io)?;
        transfer(Some(input), Some(file)).await.map_err(ConversionError::io)?;

        self.render_page(&pdf_path, page).await
    }
}
