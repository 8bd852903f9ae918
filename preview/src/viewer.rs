//!
//! Generates web viewer renditions of documents.
//!
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use tempfile::TempPath;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use services::ConversionError;

use crate::decider::Capability;
use crate::persistence::{download_to_temp, log_failure, read_artifact, store_derivative};
use crate::repository::{ContentStore, FileNode, NewDerivative, RepositoryError};
use crate::tools::{DocumentConverter, ViewConverter};

/// The name of the flash view derivative.
///
pub const SWF_VIEW: &str = "swfView";

/// The name of the PDF view derivative.
///
pub const PDF_VIEW: &str = "pdfView";

/// The mixin marking documents that have a flash view.
///
pub const SWF_VIEW_MIXIN: &str = "jmix:swfDocumentView";

/// The mixin marking documents that have a PDF view.
///
pub const PDF_VIEW_MIXIN: &str = "jmix:pdfDocumentView";

/// The MIME type of the flash view.
///
pub const SWF_MIMETYPE: &str = "application/x-shockwave-flash";

const PDF_MIMETYPE: &str = "application/pdf";

/// Generates flash and PDF views of documents.
///
pub struct DocumentViewerService {
    capability: Capability,
    view_converter: Arc<dyn ViewConverter>,
    converter: Option<Arc<dyn DocumentConverter>>,
}

impl DocumentViewerService {
    /// Create the service.
    ///
    /// # Arguments
    ///
    /// * `capability` - The documents the service handles.
    /// * `view_converter` - Converts PDF into the flash view.
    /// * `converter` - Converts other documents into PDF.
    ///
    pub fn new(
        capability: Capability,
        view_converter: Arc<dyn ViewConverter>,
        converter: Option<Arc<dyn DocumentConverter>>,
    ) -> Self {
        Self {
            capability,
            view_converter,
            converter,
        }
    }

    /// Returns the capability of the service.
    ///
    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    /// Whether the service and its view converter are switched on.
    ///
    pub fn is_enabled(&self) -> bool {
        self.capability.is_enabled() && self.view_converter.is_enabled()
    }

    /// Whether documents other than PDF can be converted into PDF.
    ///
    pub fn is_converter_enabled(&self) -> bool {
        self.converter().is_some()
    }

    fn converter(&self) -> Option<&Arc<dyn DocumentConverter>> {
        self.converter.as_ref().filter(|converter| converter.is_enabled())
    }

    /// Whether a view can be generated for the node.
    ///
    pub fn can_handle(&self, node: &FileNode) -> bool {
        self.is_enabled() && node.is_file && self.capability.can_handle(node.mimetype())
    }

    /// Convert a PDF file into a flash file.
    ///
    pub async fn convert(&self, input: &Path, output: &Path) -> Result<bool, ConversionError> {
        self.view_converter.convert(input, output).await
    }

    /// Convert a PDF file into a temporary flash file.
    ///
    pub async fn convert_to_temp(&self, input: &Path) -> Result<Option<TempPath>, ConversionError> {
        self.view_converter.convert_to_temp(input).await
    }

    /// Convert a PDF read from `input` into a flash document written to `output`.
    ///
    /// # Returns
    ///
    /// Whether the conversion succeeded. Nothing is written to `output` otherwise.
    ///
    pub async fn convert_stream<R, W>(&self, mut input: R, mut output: W) -> Result<bool, ConversionError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let pdf = tempfile::Builder::new()
            .prefix("doc-viewer-source")
            .tempfile()
            .map_err(ConversionError::io)?
            .into_temp_path();
        let mut file = tokio::fs::File::create(&pdf).await.map_err(ConversionError::io)?;
        tokio::io::copy(&mut input, &mut file).await.map_err(ConversionError::io)?;
        file.flush().await.map_err(ConversionError::io)?;

        let Some(swf) = self.convert_to_temp(&pdf).await? else {
            return Ok(false);
        };
        let mut swf_file = tokio::fs::File::open(&swf).await.map_err(ConversionError::io)?;
        tokio::io::copy(&mut swf_file, &mut output).await.map_err(ConversionError::io)?;
        output.flush().await.map_err(ConversionError::io)?;
        Ok(true)
    }

    /// Generate the flash view of a node and store it as [`SWF_VIEW`].
    ///
    /// On success the current version label of the workspace, if any, is moved onto a new
    /// version of the node.
    ///
    /// # Returns
    ///
    /// `true` if a view was stored. Generation failures are logged and return `false`.
    ///
    pub async fn create_view_for_node(&self, store: &dyn ContentStore, id: &str) -> Result<bool, RepositoryError> {
        if !self.is_enabled() || self.capability.supported_formats().is_empty() {
            info!("Document viewer service is not enabled or has no supported formats, skipping {}", id);
            return Ok(false);
        }
        let node = store
            .node(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        if !self.can_handle(&node) {
            warn!(
                "Node {} should be a file with one of the formats {:?}, skipping",
                node.path,
                self.capability.supported_formats()
            );
            return Ok(false);
        }

        let timer = Instant::now();
        match self.generate_view(store, &node).await {
            Ok(stored) => {
                if stored {
                    debug!(
                        "Generated flash view for node {} in {} ms",
                        node.path,
                        timer.elapsed().as_millis()
                    );
                }
                Ok(stored)
            }
            Err(err) => {
                log_failure("flash view", &node, &err);
                Ok(false)
            }
        }
    }

    async fn generate_view(&self, store: &dyn ContentStore, node: &FileNode) -> anyhow::Result<bool> {
        let pdf = if self.capability.is_in_group(node.mimetype(), "pdf") {
            Some(download_to_temp(store, node, "doc-viewer-source").await?)
        } else {
            self.as_pdf(store, node).await?
        };
        let Some(pdf) = pdf else {
            return Ok(false);
        };
        let Some(swf) = self.convert_to_temp(&pdf).await? else {
            return Ok(false);
        };

        let derivative = NewDerivative::new(SWF_VIEW, read_artifact(&swf).await?, SWF_MIMETYPE).owner_mixin(SWF_VIEW_MIXIN);
        if store_derivative(store, &node.id, derivative, |n| self.can_handle(n))
            .await?
            .is_none()
        {
            return Ok(false);
        }

        let prefix = format!("{}_uploaded_at_", store.workspace());
        let labels = store.version_labels(&node.id).await?;
        if let Some(label) = labels.iter().find(|label| label.starts_with(&prefix)) {
            let version = store.checkpoint(&node.id, label).await?;
            debug!("Moved label {} of node {} to version {}", label, node.path, version.name);
        }
        Ok(true)
    }

    /// Convert a node into PDF and store it as [`PDF_VIEW`].
    ///
    /// # Returns
    ///
    /// `true` if a view was stored. Generation failures are logged and return `false`.
    ///
    pub async fn create_pdf_view_for_node(&self, store: &dyn ContentStore, id: &str) -> Result<bool, RepositoryError> {
        if !self.is_enabled() || !self.is_converter_enabled() {
            info!("Document viewer or conversion service is not enabled, skipping {}", id);
            return Ok(false);
        }
        let node = store
            .node(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        if !node.is_file {
            warn!("Node {} should be a file, skipping", node.path);
            return Ok(false);
        }

        let timer = Instant::now();
        match self.generate_pdf_view(store, &node).await {
            Ok(stored) => {
                if stored {
                    debug!("Generated PDF view for node {} in {} ms", node.path, timer.elapsed().as_millis());
                }
                Ok(stored)
            }
            Err(err) => {
                log_failure("PDF view", &node, &err);
                Ok(false)
            }
        }
    }

    async fn generate_pdf_view(&self, store: &dyn ContentStore, node: &FileNode) -> anyhow::Result<bool> {
        let Some(pdf) = self.as_pdf(store, node).await? else {
            return Ok(false);
        };
        let derivative = NewDerivative::new(PDF_VIEW, read_artifact(&pdf).await?, PDF_MIMETYPE).owner_mixin(PDF_VIEW_MIXIN);
        let stored = store_derivative(store, &node.id, derivative, |n| n.is_file).await?;
        Ok(stored.is_some())
    }

    async fn as_pdf(&self, store: &dyn ContentStore, node: &FileNode) -> anyhow::Result<Option<TempPath>> {
        let Some(converter) = self.converter() else {
            info!("Document conversion service is not enabled, cannot convert {} into PDF", node.path);
            return Ok(None);
        };
        let source = download_to_temp(store, node, "doc-viewer-source").await?;
        Ok(converter.convert(&source, node.mimetype(), PDF_MIMETYPE).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use identify::groups::MimeGroups;
    use pretty_assertions::assert_eq;

    use crate::repository::MemoryContentStore;
    use crate::tools::{MockDocumentConverter, MockViewConverter};

    use super::*;

    fn capability() -> Capability {
        Capability::new(
            Arc::new(MimeGroups::builtin()),
            vec!["pdf".to_string(), "word".to_string()],
        )
    }

    fn file_with(content: &[u8]) -> TempPath {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.into_temp_path()
    }

    fn swf_converter() -> MockViewConverter {
        let mut converter = MockViewConverter::new();
        converter.expect_is_enabled().return_const(true);
        converter
            .expect_convert_to_temp()
            .returning(|_| Ok(Some(file_with(b"FWS"))));
        converter
    }

    fn pdf_converter() -> MockDocumentConverter {
        let mut converter = MockDocumentConverter::new();
        converter.expect_is_enabled().return_const(true);
        converter
            .expect_convert()
            .returning(|_, _, _| Ok(Some(file_with(b"%PDF-1.4"))));
        converter
    }

    #[tokio::test]
    async fn test_create_view_for_pdf() {
        let store = MemoryContentStore::new("default");
        store.add_file("/doc.pdf", "application/pdf", b"%PDF-1.4".to_vec());
        store.add_version("/doc.pdf", &["default_uploaded_at_2024-01-01"]);
        let service = DocumentViewerService::new(capability(), Arc::new(swf_converter()), None);

        let stored = service.create_view_for_node(&store, "/doc.pdf").await.unwrap();

        let node = store.node("/doc.pdf").await.unwrap().unwrap();
        let derivative = store.derivative("/doc.pdf", SWF_VIEW).await.unwrap().unwrap();
        let versions = store.versions("/doc.pdf");
        assert!(stored);
        assert!(node.has_mixin(SWF_VIEW_MIXIN));
        assert_eq!(derivative.mimetype, SWF_MIMETYPE);
        assert_eq!(store.derivative_data("/doc.pdf", SWF_VIEW), Some(b"FWS".to_vec()));
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1].labels, vec!["default_uploaded_at_2024-01-01"]);
    }

    #[tokio::test]
    async fn test_create_view_without_label() {
        let store = MemoryContentStore::new("default");
        store.add_file("/doc.pdf", "application/pdf", vec![]);
        store.add_version("/doc.pdf", &["live_uploaded_at_2024-01-01"]);
        let service = DocumentViewerService::new(capability(), Arc::new(swf_converter()), None);

        assert!(service.create_view_for_node(&store, "/doc.pdf").await.unwrap());
        assert_eq!(store.versions("/doc.pdf").len(), 1);
    }

    #[tokio::test]
    async fn test_create_view_for_word() {
        let store = MemoryContentStore::new("default");
        store.add_file("/doc.docx", "application/msword", b"word".to_vec());
        let service = DocumentViewerService::new(
            capability(),
            Arc::new(swf_converter()),
            Some(Arc::new(pdf_converter())),
        );

        assert!(service.create_view_for_node(&store, "/doc.docx").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_view_for_word_without_converter() {
        let store = MemoryContentStore::new("default");
        store.add_file("/doc.docx", "application/msword", b"word".to_vec());
        let service = DocumentViewerService::new(capability(), Arc::new(swf_converter()), None);

        assert!(!service.create_view_for_node(&store, "/doc.docx").await.unwrap());
        assert!(store.derivative("/doc.docx", SWF_VIEW).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_view_unsupported() {
        let store = MemoryContentStore::new("default");
        store.add_file("/clip.mp4", "video/mp4", vec![]);
        let service = DocumentViewerService::new(capability(), Arc::new(swf_converter()), None);

        assert!(!service.create_view_for_node(&store, "/clip.mp4").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_pdf_view() {
        let store = MemoryContentStore::new("default");
        store.add_file("/doc.docx", "application/msword", b"word".to_vec());
        let service = DocumentViewerService::new(
            capability(),
            Arc::new(swf_converter()),
            Some(Arc::new(pdf_converter())),
        );

        assert!(service.create_pdf_view_for_node(&store, "/doc.docx").await.unwrap());

        let node = store.node("/doc.docx").await.unwrap().unwrap();
        let derivative = store.derivative("/doc.docx", PDF_VIEW).await.unwrap().unwrap();
        assert!(node.has_mixin(PDF_VIEW_MIXIN));
        assert_eq!(derivative.mimetype, "application/pdf");
    }

    #[tokio::test]
    async fn test_create_pdf_view_without_converter() {
        let store = MemoryContentStore::new("default");
        store.add_file("/doc.docx", "application/msword", vec![]);
        let service = DocumentViewerService::new(capability(), Arc::new(swf_converter()), None);

        assert!(!service.create_pdf_view_for_node(&store, "/doc.docx").await.unwrap());
    }

    #[tokio::test]
    async fn test_convert_stream() {
        let service = DocumentViewerService::new(capability(), Arc::new(swf_converter()), None);
        let mut output = vec![];

        let converted = service.convert_stream(&b"%PDF-1.4"[..], &mut output).await.unwrap();

        assert!(converted);
        assert_eq!(output, b"FWS");
    }

    #[tokio::test]
    async fn test_convert_stream_failed() {
        let mut converter = MockViewConverter::new();
        converter.expect_convert_to_temp().returning(|_| Ok(None));
        let service = DocumentViewerService::new(capability(), Arc::new(converter), None);
        let mut output = vec![];

        let converted = service.convert_stream(&b"%PDF-1.4"[..], &mut output).await.unwrap();

        assert!(!converted);
        assert!(output.is_empty());
    }
}
