//!
//! Moves documents and derivatives between the content store and the local file system.
//!
use std::path::Path;

use anyhow::Context;
use log::{error, info, warn};
use tempfile::TempPath;

use crate::repository::{ContentStore, DerivativeRef, FileNode, NewDerivative, RepositoryError};

/// Store a derivative if the owning node still qualifies for it.
///
/// The owner is looked up again right before storing, since it may have changed while the
/// derivative was generated.
///
/// # Arguments
///
/// * `store` - The store holding the owner.
/// * `owner` - The identifier of the owning node.
/// * `derivative` - The derivative to store.
/// * `still_handled` - Re-checks whether the current state of the owner qualifies.
///
/// # Returns
///
/// A reference to the stored derivative, or [`None`] if the owner no longer qualifies.
///
pub async fn store_derivative<F>(
    store: &dyn ContentStore,
    owner: &str,
    derivative: NewDerivative,
    still_handled: F,
) -> Result<Option<DerivativeRef>, RepositoryError>
where
    F: Fn(&FileNode) -> bool + Send,
{
    let node = store
        .node(owner)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(owner.to_string()))?;
    if !still_handled(&node) {
        info!(
            "Node {} can no longer be handled, skip storing {}",
            node.path, derivative.name
        );
        return Ok(None);
    }
    store.store_derivative(owner, derivative).await.map(Some)
}

/// Copy the content of a node into a new temporary file.
///
pub async fn download_to_temp(store: &dyn ContentStore, node: &FileNode, prefix: &str) -> anyhow::Result<TempPath> {
    let path = tempfile::Builder::new()
        .prefix(prefix)
        .tempfile()
        .context("failed to create temporary file")?
        .into_temp_path();
    store
        .download(&node.id, &path)
        .await
        .with_context(|| format!("failed to download {}", node.path))?;
    Ok(path)
}

/// Read a generated artifact into memory.
///
pub async fn read_artifact(path: &Path) -> anyhow::Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read '{}'", path.display()))
}

/// Log a failed preview operation. A locked node is expected and only warned about.
///
pub fn log_failure(operation: &str, node: &FileNode, err: &anyhow::Error) {
    if is_locked(err) {
        warn!(
            "{} cannot be generated because node {} is locked or archived",
            operation, node.path
        );
    } else {
        error!("Error generating {} for node {}: {:#}", operation, node.path, err);
    }
}

fn is_locked(err: &anyhow::Error) -> bool {
    err.downcast_ref::<RepositoryError>()
        .map_or(false, RepositoryError::is_locked)
}
