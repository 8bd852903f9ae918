use std::path::Path;
use std::time::Instant;

use log::{debug, error, info, warn};
use tempfile::TempPath;

use crate::{temp_path, Activation, ConversionError, ExternalProcess, TemplateParams, ToolSettings};

const PROGRAM: &str = "soffice";

const DEFAULT_PARAMETERS: &str = "--headless --norestore --convert-to ${format} --outdir ${outdir} ${input}";

/// The `OfficeToPdf` service, a generic document converter backed by an office suite running headless.
///
#[derive(Debug, Clone)]
pub struct OfficeToPdf {
    enabled: bool,
    process: ExternalProcess,
}

impl OfficeToPdf {
    /// Create the service from a process definition.
    ///
    /// The template receives the placeholders `format` (target file extension), `outdir` and `input`.
    /// The tool is expected to write `<outdir>/<input file stem>.<format>`.
    ///
    pub fn new(process: ExternalProcess, enabled: bool) -> Self {
        Self { enabled, process }
    }

    /// Create the service from user settings, probing for the executable if activation is `auto`.
    ///
    pub async fn from_settings(settings: &ToolSettings) -> Self {
        let enabled = settings.enabled(PROGRAM, Activation::Auto).await;
        let process = settings.process(PROGRAM, settings.parameters_or(DEFAULT_PARAMETERS));
        Self::new(process, enabled)
    }

    /// Whether the service is enabled.
    ///
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Convert a document into another format.
    ///
    /// # Arguments
    ///
    /// * `input` - The source document.
    /// * `source_mimetype` - The MIME type of the source document.
    /// * `target_mimetype` - The MIME type to convert to, usually `application/pdf`.
    ///
    /// # Returns
    ///
    /// The converted document as a temporary file, or [`None`] if the service is disabled, the
    /// target format is unknown, or the conversion failed.
    ///
    pub async fn convert(
        &self,
        input: &Path,
        source_mimetype: &str,
        target_mimetype: &str,
    ) -> Result<Option<TempPath>, ConversionError> {
        if !self.enabled {
            info!("Document conversion service is not enabled. Skip converting file {}", input.display());
            return Ok(None);
        }
        let Some(format) = extension_for(target_mimetype) else {
            warn!("Conversion into {} is not supported", target_mimetype);
            return Ok(None);
        };

        let timer = Instant::now();
        let outdir = tempfile::Builder::new()
            .prefix("doc-converter")
            .tempdir()
            .map_err(ConversionError::io)?;
        let params = TemplateParams::new()
            .with("format", format)
            .with_path("outdir", outdir.path())
            .with_path("input", input);

        let output = self.process.run(&params).await?;
        if !output.success() {
            error!("Document conversion finished with error. Cause: {}", output.stderr);
            return Ok(None);
        }

        let stem = input
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        let produced = outdir.path().join(format!("{}.{}", stem, format));
        if !produced.is_file() {
            error!("Document converter did not produce {}", produced.display());
            return Ok(None);
        }

        let converted = temp_path("doc-converted")?;
        tokio::fs::rename(&produced, &converted)
            .await
            .map_err(ConversionError::io)?;

        debug!(
            "Converted {} from {} into {} in {} ms",
            input.display(),
            source_mimetype,
            target_mimetype,
            timer.elapsed().as_millis()
        );
        Ok(Some(converted))
    }
}

fn extension_for(mimetype: &str) -> Option<&'static str> {
    match mimetype {
        "application/pdf" => Some("pdf"),
        "application/vnd.oasis.opendocument.text" => Some("odt"),
        "text/html" => Some("html"),
        "text/plain" => Some("txt"),
        "image/png" => Some("png"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use test_utils::fake_executable;

    use crate::CommandTemplate;

    use super::*;

    /// Stands in for soffice: `<format> <outdir> <input>` writes `<outdir>/<stem>.<format>`.
    ///
    const FAKE_SOFFICE: &str = r#"
name=$(basename "$3")
stem="${name%.*}"
printf "%%PDF converted" > "$2/$stem.$1"
"#;

    fn fake_service(script: &str) -> (TempPath, OfficeToPdf) {
        let tool = fake_executable(script).unwrap();
        let process = ExternalProcess::new(CommandTemplate::new(
            tool.to_string_lossy(),
            "${format} ${outdir} ${input}",
        ));
        (tool, OfficeToPdf::new(process, true))
    }

    #[tokio::test]
    async fn test_convert_to_pdf() {
        let (_tool, service) = fake_service(FAKE_SOFFICE);
        let document = tempfile::Builder::new().suffix(".docx").tempfile().unwrap();

        let pdf = service
            .convert(document.path(), "application/msword", "application/pdf")
            .await
            .unwrap()
            .expect("document should be converted");

        assert_eq!(std::fs::read(&pdf).unwrap(), b"%PDF converted");
    }

    #[tokio::test]
    async fn test_convert_unknown_target() {
        let (_tool, service) = fake_service(FAKE_SOFFICE);
        let document = tempfile::NamedTempFile::new().unwrap();

        let converted = service
            .convert(document.path(), "application/msword", "application/x-unknown")
            .await
            .unwrap();

        assert!(converted.is_none());
    }

    #[tokio::test]
    async fn test_convert_missing_output() {
        let (_tool, service) = fake_service("exit 0");
        let document = tempfile::NamedTempFile::new().unwrap();

        let converted = service
            .convert(document.path(), "application/msword", "application/pdf")
            .await
            .unwrap();

        assert!(converted.is_none());
    }
}
