//!
//! Resolves the URLs of document views, generating missing or outdated views on request.
//!
use crate::decider::is_stale;
use crate::repository::{ContentStore, FileNode, RepositoryError};
use crate::viewer::{DocumentViewerService, PDF_VIEW, PDF_VIEW_MIXIN, SWF_VIEW, SWF_VIEW_MIXIN};

/// Returns the URL serving derivative `name` of a node.
///
pub fn derivative_url(node: &FileNode, name: &str) -> String {
    let separator = if node.url.contains('?') { '&' } else { '?' };
    format!("{}{}t={}", node.url, separator, name)
}

/// Whether the flash view of a node exists but is older than the node content.
///
pub async fn is_view_obsolete(store: &dyn ContentStore, node: &FileNode) -> Result<bool, RepositoryError> {
    is_obsolete(store, node, SWF_VIEW).await
}

/// Whether the PDF view of a node exists but is older than the node content.
///
pub async fn is_pdf_view_obsolete(store: &dyn ContentStore, node: &FileNode) -> Result<bool, RepositoryError> {
    is_obsolete(store, node, PDF_VIEW).await
}

async fn is_obsolete(store: &dyn ContentStore, node: &FileNode, name: &str) -> Result<bool, RepositoryError> {
    Ok(match store.derivative(&node.id, name).await? {
        Some(view) => is_stale(node.content_modified, Some(view.last_modified)),
        None => false,
    })
}

/// Whether a flash view can be generated for the node.
///
pub fn is_viewable(viewer: Option<&DocumentViewerService>, node: &FileNode) -> bool {
    viewer.map_or(false, |viewer| viewer.can_handle(node))
}

/// Whether the node is a PDF document.
///
pub fn is_pdf(viewer: Option<&DocumentViewerService>, node: &FileNode) -> bool {
    node.is_file && viewer.map_or(false, |viewer| viewer.capability().is_in_group(node.mimetype(), "pdf"))
}

/// Returns the URL of the flash view of a node.
///
/// # Arguments
///
/// * `store` - The store holding the node.
/// * `viewer` - The viewer service, if available.
/// * `id` - The identifier of the node.
/// * `create_if_missing` - Generate the view if it is missing or outdated.
///
/// # Returns
///
/// The URL, or [`None`] if the node has no view.
///
pub async fn view_url(
    store: &dyn ContentStore,
    viewer: Option<&DocumentViewerService>,
    id: &str,
    create_if_missing: bool,
) -> Result<Option<String>, RepositoryError> {
    resolve(store, viewer, id, create_if_missing, SWF_VIEW, SWF_VIEW_MIXIN).await
}

/// Returns the URL of the PDF view of a node.
///
/// Arguments are the same as for [`view_url`].
///
pub async fn pdf_view_url(
    store: &dyn ContentStore,
    viewer: Option<&DocumentViewerService>,
    id: &str,
    create_if_missing: bool,
) -> Result<Option<String>, RepositoryError> {
    resolve(store, viewer, id, create_if_missing, PDF_VIEW, PDF_VIEW_MIXIN).await
}

async fn existing_url(
    store: &dyn ContentStore,
    node: &FileNode,
    name: &str,
    mixin: &str,
) -> Result<Option<String>, RepositoryError> {
    if !node.has_mixin(mixin) {
        return Ok(None);
    }
    let view = store.derivative(&node.id, name).await?;
    Ok(view.map(|_| derivative_url(node, name)))
}

async fn resolve(
    store: &dyn ContentStore,
    viewer: Option<&DocumentViewerService>,
    id: &str,
    create_if_missing: bool,
    name: &str,
    mixin: &str,
) -> Result<Option<String>, RepositoryError> {
    let node = store
        .node(id)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
    let url = existing_url(store, &node, name, mixin).await?;

    let Some(viewer) = viewer.filter(|_| create_if_missing) else {
        return Ok(url);
    };
    let creatable = if name == PDF_VIEW {
        viewer.is_enabled() && viewer.is_converter_enabled()
    } else {
        viewer.can_handle(&node)
    };
    if !creatable || (url.is_some() && !is_obsolete(store, &node, name).await?) {
        return Ok(url);
    }

    let created = if name == PDF_VIEW {
        viewer.create_pdf_view_for_node(store, id).await?
    } else {
        viewer.create_view_for_node(store, id).await?
    };
    if !created {
        return Ok(url);
    }
    let node = store
        .node(id)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
    existing_url(store, &node, name, mixin).await
}
