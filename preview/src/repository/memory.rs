use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::repository::{
    child_path, next_version, ContentStore, Derivative, DerivativeRef, FileNode, NewDerivative, RepositoryError,
    Version,
};

struct Entry {
    node: FileNode,
    content: Vec<u8>,
    derivatives: BTreeMap<String, (Derivative, Vec<u8>)>,
    versions: Vec<Version>,
    locked: bool,
}

/// A content store held entirely in memory.
///
/// Useful for embedding and testing.
///
pub struct MemoryContentStore {
    workspace: String,
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryContentStore {
    /// Create an empty store serving `workspace`.
    ///
    pub fn new(workspace: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Add a file node, replacing any node with the same identifier.
    ///
    /// # Arguments
    ///
    /// * `id` - The identifier of the node, also used as its path.
    /// * `mimetype` - The MIME type of the content.
    /// * `content` - The content of the file.
    ///
    /// # Returns
    ///
    /// The node that was added, last modified now.
    ///
    pub fn add_file(&self, id: &str, mimetype: &str, content: Vec<u8>) -> FileNode {
        let now = Utc::now();
        let node = FileNode {
            id: id.to_string(),
            path: id.to_string(),
            url: format!("/files/{}{}", self.workspace, id),
            mimetype: Some(mimetype.to_string()),
            content_modified: Some(now),
            last_modified: Some(now),
            is_file: true,
            mixins: vec![],
        };
        self.insert(node.clone(), content);
        node
    }

    /// Add an arbitrary node, replacing any node with the same identifier.
    ///
    pub fn insert(&self, node: FileNode, content: Vec<u8>) {
        let entry = Entry {
            node,
            content,
            derivatives: BTreeMap::new(),
            versions: vec![],
            locked: false,
        };
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(entry.node.id.clone(), entry);
        }
    }

    /// Mark the content of a node as modified at `when`.
    ///
    pub fn touch(&self, id: &str, when: DateTime<Utc>) {
        self.with_entry(id, |entry| {
            entry.node.content_modified = Some(when);
            entry.node.last_modified = Some(when);
        });
    }

    /// Lock or unlock a node. Storing derivatives of a locked node fails.
    ///
    pub fn set_locked(&self, id: &str, locked: bool) {
        self.with_entry(id, |entry| entry.locked = locked);
    }

    /// Append a version with the given labels to the history of a node.
    ///
    pub fn add_version(&self, id: &str, labels: &[&str]) {
        self.with_entry(id, |entry| {
            let version = Version {
                name: format!("1.{}", entry.versions.len()),
                labels: labels.iter().map(|l| l.to_string()).collect(),
            };
            entry.versions.push(version);
        });
    }

    /// Returns the version history of a node.
    ///
    pub fn versions(&self, id: &str) -> Vec<Version> {
        self.with_entry(id, |entry| entry.versions.clone()).unwrap_or_default()
    }

    /// Returns the stored content of a derivative.
    ///
    pub fn derivative_data(&self, id: &str, name: &str) -> Option<Vec<u8>> {
        self.with_entry(id, |entry| entry.derivatives.get(name).map(|(_, data)| data.clone()))
            .flatten()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>, RepositoryError> {
        self.entries
            .lock()
            .map_err(|_| RepositoryError::Other(anyhow!("memory store lock poisoned")))
    }

    fn with_entry<T>(&self, id: &str, f: impl FnOnce(&mut Entry) -> T) -> Option<T> {
        let mut entries = self.entries.lock().ok()?;
        entries.get_mut(id).map(f)
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    fn workspace(&self) -> &str {
        &self.workspace
    }

    async fn node(&self, id: &str) -> Result<Option<FileNode>, RepositoryError> {
        Ok(self.lock()?.get(id).map(|entry| entry.node.clone()))
    }

    async fn files(&self) -> Result<Vec<FileNode>, RepositoryError> {
        let mut files: Vec<FileNode> = self
            .lock()?
            .values()
            .filter(|entry| entry.node.is_file)
            .map(|entry| entry.node.clone())
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    async fn download(&self, id: &str, destination: &Path) -> Result<(), RepositoryError> {
        let content = self
            .lock()?
            .get(id)
            .map(|entry| entry.content.clone())
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        tokio::fs::write(destination, content).await?;
        Ok(())
    }

    async fn derivative(&self, id: &str, name: &str) -> Result<Option<Derivative>, RepositoryError> {
        let entries = self.lock()?;
        let entry = entries.get(id).ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        Ok(entry.derivatives.get(name).map(|(derivative, _)| derivative.clone()))
    }

    async fn store_derivative(&self, id: &str, derivative: NewDerivative) -> Result<DerivativeRef, RepositoryError> {
        let mut entries = self.lock()?;
        let entry = entries.get_mut(id).ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        if entry.locked {
            return Err(RepositoryError::Locked(entry.node.path.clone()));
        }

        let now = Utc::now();
        if let Some(mixin) = &derivative.owner_mixin {
            if !entry.node.has_mixin(mixin) {
                entry.node.mixins.push(mixin.clone());
            }
        }
        let (derivative, data) = derivative.into_derivative(now);
        let reference = DerivativeRef {
            owner: id.to_string(),
            name: derivative.name.clone(),
            path: child_path(&entry.node.path, &derivative.name),
        };
        entry.derivatives.insert(derivative.name.clone(), (derivative, data));
        entry.node.last_modified = Some(now);
        Ok(reference)
    }

    async fn version_labels(&self, id: &str) -> Result<Vec<String>, RepositoryError> {
        let entries = self.lock()?;
        let entry = entries.get(id).ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        Ok(entry.versions.last().map(|v| v.labels.clone()).unwrap_or_default())
    }

    async fn checkpoint(&self, id: &str, label: &str) -> Result<Version, RepositoryError> {
        let mut entries = self.lock()?;
        let entry = entries.get_mut(id).ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        if entry.locked {
            return Err(RepositoryError::Locked(entry.node.path.clone()));
        }
        Ok(next_version(&mut entry.versions, label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_derivative_stamps_owner() {
        let store = MemoryContentStore::new("default");
        let node = store.add_file("/doc.pdf", "application/pdf", b"%PDF".to_vec());
        let before = node.last_modified.unwrap();

        let reference = store
            .store_derivative(
                "/doc.pdf",
                NewDerivative::new("thumbnail", vec![1, 2], "image/png").owner_mixin("jmix:thumbnail"),
            )
            .await
            .unwrap();

        let node = store.node("/doc.pdf").await.unwrap().unwrap();
        let derivative = store.derivative("/doc.pdf", "thumbnail").await.unwrap().unwrap();
        assert_eq!(reference.path, "/doc.pdf/thumbnail");
        assert_eq!(node.last_modified, Some(derivative.last_modified));
        assert!(node.last_modified.unwrap() >= before);
        assert_eq!(node.content_modified, Some(before));
        assert!(node.has_mixin("jmix:thumbnail"));
        assert_eq!(store.derivative_data("/doc.pdf", "thumbnail"), Some(vec![1, 2]));
    }

    #[tokio::test]
    async fn test_store_derivative_locked() {
        let store = MemoryContentStore::new("default");
        store.add_file("/doc.pdf", "application/pdf", vec![]);
        store.set_locked("/doc.pdf", true);

        let result = store
            .store_derivative("/doc.pdf", NewDerivative::new("thumbnail", vec![], "image/png"))
            .await;

        assert!(matches!(result, Err(RepositoryError::Locked(_))));
        assert!(store.derivative("/doc.pdf", "thumbnail").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_node() {
        let store = MemoryContentStore::new("default");

        assert!(store.node("/nope").await.unwrap().is_none());
        assert!(matches!(
            store.derivative("/nope", "thumbnail").await,
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_versions() {
        let store = MemoryContentStore::new("live");
        store.add_file("/doc.pdf", "application/pdf", vec![]);
        assert!(store.version_labels("/doc.pdf").await.unwrap().is_empty());

        store.add_version("/doc.pdf", &["live_uploaded_at_1"]);
        assert_eq!(store.version_labels("/doc.pdf").await.unwrap(), vec!["live_uploaded_at_1"]);

        store.checkpoint("/doc.pdf", "live_uploaded_at_1").await.unwrap();
        let versions = store.versions("/doc.pdf");
        assert_eq!(versions.len(), 2);
        assert!(versions[0].labels.is_empty());
        assert_eq!(versions[1].labels, vec!["live_uploaded_at_1"]);
    }
}
