//!
//! Generates thumbnails of the first page of documents.
//!
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageOutputFormat};
use log::{debug, info};
use tempfile::TempPath;
use tokio::io::{AsyncRead, AsyncWriteExt};

use services::ConversionError;

use crate::decider::Capability;
use crate::persistence::{download_to_temp, log_failure, store_derivative};
use crate::repository::{ContentStore, FileNode, NewDerivative, RepositoryError};
use crate::tools::{DocumentConverter, PageRenderer};

/// The name of the thumbnail derivative, unless given otherwise.
///
pub const DEFAULT_THUMBNAIL_NAME: &str = "thumbnail";

/// The longest side of a thumbnail in pixels, unless given otherwise.
///
pub const DEFAULT_THUMBNAIL_SIZE: u32 = 150;

/// The mixin added to stored thumbnails.
///
pub const SIZE_MIXIN: &str = "jmix:size";

const JPEG_QUALITY: u8 = 85;

/// A scaled image ready to be stored.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    /// The encoded image.
    ///
    pub data: Vec<u8>,

    /// The width in pixels.
    ///
    pub width: u32,

    /// The height in pixels.
    ///
    pub height: u32,

    /// The MIME type of `data`.
    ///
    pub mimetype: &'static str,
}

impl Thumbnail {
    fn into_derivative(self, name: &str) -> NewDerivative {
        NewDerivative::new(name, self.data, self.mimetype)
            .property("width", self.width)
            .property("height", self.height)
            .mixin(SIZE_MIXIN)
    }
}

/// Generates thumbnails of documents by rendering their first page.
///
/// PDF documents are rendered directly. Other supported documents are converted into PDF first,
/// which requires a [`DocumentConverter`].
///
pub struct DocumentThumbnailService {
    capability: Capability,
    renderer: Arc<dyn PageRenderer>,
    converter: Option<Arc<dyn DocumentConverter>>,
    use_png: bool,
}

impl DocumentThumbnailService {
    /// Create the service, producing PNG thumbnails.
    ///
    pub fn new(
        capability: Capability,
        renderer: Arc<dyn PageRenderer>,
        converter: Option<Arc<dyn DocumentConverter>>,
    ) -> Self {
        Self {
            capability,
            renderer,
            converter,
            use_png: true,
        }
    }

    /// Produce PNG thumbnails if `true`, JPEG otherwise.
    ///
    pub fn use_png(mut self, use_png: bool) -> Self {
        self.use_png = use_png;
        self
    }

    /// Returns the capability of the service.
    ///
    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    /// Whether the service and its renderer are switched on.
    ///
    pub fn is_enabled(&self) -> bool {
        self.capability.is_enabled() && self.renderer.is_enabled()
    }

    fn converter(&self) -> Option<&Arc<dyn DocumentConverter>> {
        self.converter.as_ref().filter(|converter| converter.is_enabled())
    }

    /// Whether a thumbnail can be generated for the node.
    ///
    /// Non-PDF documents additionally need an enabled document converter.
    ///
    pub fn can_handle(&self, node: &FileNode) -> bool {
        if !self.is_enabled() || !node.is_file {
            return false;
        }
        let mimetype = node.mimetype();
        if !self.capability.can_handle(mimetype) {
            return false;
        }
        self.capability.is_in_group(mimetype, "pdf") || self.converter().is_some()
    }

    /// Generate a thumbnail for a node and store it as the derivative `name`.
    ///
    /// # Arguments
    ///
    /// * `store` - The store holding the node.
    /// * `id` - The identifier of the node.
    /// * `name` - The name of the derivative.
    /// * `size` - The longest side of the thumbnail in pixels.
    ///
    /// # Returns
    ///
    /// `true` if a thumbnail was stored. Generation failures are logged and return `false`;
    /// only failing to look up the node is returned as an error.
    ///
    pub async fn create_thumbnail_for_node(
        &self,
        store: &dyn ContentStore,
        id: &str,
        name: &str,
        size: u32,
    ) -> Result<bool, RepositoryError> {
        let node = store
            .node(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        if !self.can_handle(&node) {
            debug!("Thumbnail service cannot handle node {} ({})", node.path, node.mimetype());
            return Ok(false);
        }

        let timer = Instant::now();
        match self.generate_and_store(store, &node, name, size).await {
            Ok(stored) => {
                if stored {
                    debug!(
                        "Generated thumbnail {} for node {} in {} ms",
                        name,
                        node.path,
                        timer.elapsed().as_millis()
                    );
                }
                Ok(stored)
            }
            Err(err) => {
                log_failure("thumbnail", &node, &err);
                Ok(false)
            }
        }
    }

    async fn generate_and_store(
        &self,
        store: &dyn ContentStore,
        node: &FileNode,
        name: &str,
        size: u32,
    ) -> anyhow::Result<bool> {
        let Some(image) = self.image_of_first_page_for_node(store, node).await? else {
            return Ok(false);
        };
        let thumbnail = self.thumbnail(image, size)?;
        let stored = store_derivative(store, &node.id, thumbnail.into_derivative(name), |n| self.can_handle(n)).await?;
        Ok(stored.is_some())
    }

    /// Render the first page of a node to an image, converting it into PDF first if needed.
    ///
    pub async fn image_of_first_page_for_node(
        &self,
        store: &dyn ContentStore,
        node: &FileNode,
    ) -> anyhow::Result<Option<Vec<u8>>> {
        let mimetype = node.mimetype();
        let pdf = if self.capability.is_in_group(mimetype, "pdf") {
            download_to_temp(store, node, "doc-thumbnail-source").await?
        } else {
            let Some(converter) = self.converter() else {
                info!("Document conversion service is not enabled, no thumbnail for {}", node.path);
                return Ok(None);
            };
            let source = download_to_temp(store, node, "doc-thumbnail-source").await?;
            match converter.convert(&source, mimetype, "application/pdf").await? {
                Some(pdf) => pdf,
                None => return Ok(None),
            }
        };

        Ok(self.image_of_page(&pdf, 0).await?)
    }

    /// Render a page of a PDF file to an image.
    ///
    pub async fn image_of_page(&self, pdf: &Path, page: usize) -> Result<Option<Vec<u8>>, ConversionError> {
        self.renderer.render_page(pdf, page).await
    }

    /// Render a page of a PDF read from `input` to an image.
    ///
    pub async fn image_of_page_from<R>(&self, mut input: R, page: usize) -> Result<Option<Vec<u8>>, ConversionError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let pdf = spool(&mut input).await.map_err(ConversionError::io)?;
        self.image_of_page(&pdf, page).await
    }

    /// Scale an image so its longest side is at most `size` pixels.
    ///
    /// An image that already fits is kept as it is when it has the output format.
    ///
    pub fn thumbnail(&self, rendered: Vec<u8>, size: u32) -> anyhow::Result<Thumbnail> {
        let size = if size == 0 { DEFAULT_THUMBNAIL_SIZE } else { size };
        let decoded = image::load_from_memory(&rendered).context("failed to decode page image")?;
        let (width, height) = decoded.dimensions();

        let fits = width <= size && height <= size;
        if fits && self.use_png && image::guess_format(&rendered).ok() == Some(ImageFormat::Png) {
            return Ok(Thumbnail {
                data: rendered,
                width,
                height,
                mimetype: "image/png",
            });
        }

        let scaled = if fits {
            decoded
        } else {
            decoded.resize(size, size, FilterType::Triangle)
        };
        encode(&scaled, self.use_png)
    }
}

fn encode(scaled: &DynamicImage, png: bool) -> anyhow::Result<Thumbnail> {
    let (width, height) = scaled.dimensions();
    let mut data = Cursor::new(vec![]);
    let mimetype = if png {
        scaled.write_to(&mut data, ImageOutputFormat::Png)?;
        "image/png"
    } else {
        DynamicImage::ImageRgb8(scaled.to_rgb8()).write_to(&mut data, ImageOutputFormat::Jpeg(JPEG_QUALITY))?;
        "image/jpeg"
    };
    Ok(Thumbnail {
        data: data.into_inner(),
        width,
        height,
        mimetype,
    })
}

async fn spool<R>(input: &mut R) -> std::io::Result<TempPath>
where
    R: AsyncRead + Unpin,
{
    let path = tempfile::Builder::new()
        .prefix("doc-thumbnail-source")
        .tempfile()?
        .into_temp_path();
    let mut file = tokio::fs::File::create(&path).await?;
    tokio::io::copy(input, &mut file).await?;
    file.flush().await?;
    Ok(path)
}
