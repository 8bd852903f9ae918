use std::path::Path;
use std::time::Instant;

use log::{debug, error, info};
use tempfile::TempPath;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{has_content, temp_path, transfer, Activation, ConversionError, ExternalProcess, TemplateParams, ToolSettings};

const PROGRAM: &str = "pdf2swf";

const COMMAND_PREFIX: &str = "${input} -o ${output}";

const DEFAULT_PARAMETERS: &str = "-f -T 9 -t -s storeallcharacters";

/// The `PdfToSwf` service, converting PDF documents into the flash viewer format with SWFTools.
///
#[derive(Debug, Clone)]
pub struct PdfToSwf {
    enabled: bool,
    process: ExternalProcess,
}

impl PdfToSwf {
    /// Create the service from a process definition.
    ///
    /// The template receives the placeholders `input` and `output`.
    ///
    pub fn new(process: ExternalProcess, enabled: bool) -> Self {
        Self { enabled, process }
    }

    /// Create the service from user settings. The configured parameters are appended to
    /// `${input} -o ${output}`. pdf2swf is disabled unless activated.
    ///
    pub async fn from_settings(settings: &ToolSettings) -> Self {
        let enabled = settings.enabled(PROGRAM, Activation::Disabled).await;
        let arguments = format!("{} {}", COMMAND_PREFIX, settings.parameters_or(DEFAULT_PARAMETERS));
        Self::new(settings.process(PROGRAM, &arguments), enabled)
    }

    /// Whether the service is enabled.
    ///
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Convert a PDF file into an SWF file.
    ///
    /// # Returns
    ///
    /// `true` only if pdf2swf exited with code `0`.
    ///
    pub async fn convert(&self, input_pdf: &Path, output_swf: &Path) -> Result<bool, ConversionError> {
        if !self.enabled {
            info!("pdf2swf conversion service is not enabled. Skip converting file {}", input_pdf.display());
            return Ok(false);
        }

        let timer = Instant::now();
        let params = TemplateParams::new()
            .with_path("input", input_pdf)
            .with_path("output", output_swf);

        let output = self.process.run(&params).await?;
        if !output.stderr.is_empty() {
            error!("Conversion process finished with error. Cause: {}", output.stderr);
        }
        if !output.stdout.is_empty() {
            debug!("{}", output.stdout);
        }

        debug!(
            "Conversion from {} to {} done (exit code: {:?}) in {} ms",
            input_pdf.display(),
            output_swf.display(),
            output.exit_code(),
            timer.elapsed().as_millis()
        );
        Ok(output.success())
    }

    /// Convert a PDF file into a temporary SWF file.
    ///
    /// # Returns
    ///
    /// The temporary SWF file, or [`None`] if the service is disabled or the conversion failed.
    ///
    pub async fn convert_to_temp(&self, input_pdf: &Path) -> Result<Option<TempPath>, ConversionError> {
        if !self.enabled {
            info!("pdf2swf conversion service is not enabled. Skip converting file {}", input_pdf.display());
            return Ok(None);
        }

        let output_swf = temp_path("doc-viewer")?;
        let converted = self.convert(input_pdf, &output_swf).await?;

        Ok((converted && has_content(&output_swf).await).then_some(output_swf))
    }

    /// Convert a PDF read from `input` into SWF content written to `output`.
    ///
    /// Both sides are spooled through temporary files, which are removed before returning.
    ///
    /// # Returns
    ///
    /// `true` if SWF content was written to `output`.
    ///
    pub async fn convert_stream<R, W>(&self, input: R, output: W) -> Result<bool, ConversionError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        if !self.enabled {
            info!("pdf2swf conversion service is not enabled. Skip converting file input stream.");
            return Ok(false);
        }

        let input_pdf = temp_path("doc-viewer")?;
        let file = tokio::fs::File::create(&input_pdf).await.map_err(ConversionError::io)?;
        transfer(Some(input), Some(file)).await.map_err(ConversionError::io)?;

        match self.convert_to_temp(&input_pdf).await? {
            Some(output_swf) => {
                let file = tokio::fs::File::open(&output_swf).await.map_err(ConversionError::io)?;
                transfer(Some(file), Some(output)).await.map_err(ConversionError::io)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
