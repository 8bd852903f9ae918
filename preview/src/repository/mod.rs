//!
//! The content store the preview services read documents from and store derivatives into.
//!
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fmt::Formatter;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use self::fs_store::*;
pub use self::memory::*;

mod fs_store;
mod memory;

/// The workspace documents live in when none is given.
///
pub const DEFAULT_WORKSPACE: &str = "default";

/// A document in the content store, as seen by the preview services.
///
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    /// The identifier of the node within its store.
    ///
    pub id: String,

    /// The display path of the node.
    ///
    pub path: String,

    /// The URL the node content is served from.
    ///
    pub url: String,

    /// The MIME type of the node content, if known.
    ///
    pub mimetype: Option<String>,

    /// When the node content was last modified. Storing derivatives leaves it unchanged.
    ///
    pub content_modified: Option<DateTime<Utc>>,

    /// When the node itself was last modified, including by storing a derivative.
    ///
    pub last_modified: Option<DateTime<Utc>>,

    /// Whether the node is a file, as opposed to a folder or other structural node.
    ///
    pub is_file: bool,

    /// Mixin types added to the node.
    ///
    pub mixins: Vec<String>,
}

impl FileNode {
    /// Returns the MIME type, or an empty string if unknown.
    ///
    pub fn mimetype(&self) -> &str {
        self.mimetype.as_deref().unwrap_or_default()
    }

    /// Whether the node has the given mixin type.
    ///
    pub fn has_mixin(&self, mixin: &str) -> bool {
        self.mixins.iter().any(|m| m == mixin)
    }
}

/// A generated artifact stored as a named child of a document.
///
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Derivative {
    /// The name of the child, e.g. `thumbnail` or `swfView`.
    ///
    pub name: String,

    /// The MIME type of the artifact.
    ///
    pub mimetype: String,

    /// The size of the artifact in bytes.
    ///
    pub size: u64,

    /// When the artifact was stored.
    ///
    pub last_modified: DateTime<Utc>,

    /// Additional properties, e.g. `width` and `height` of a thumbnail.
    ///
    #[serde(default)]
    pub properties: BTreeMap<String, String>,

    /// Mixin types added to the child.
    ///
    #[serde(default)]
    pub mixins: Vec<String>,
}

/// An artifact to store as a named child of a document.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDerivative {
    /// The name of the child.
    ///
    pub name: String,

    /// The artifact content.
    ///
    pub data: Vec<u8>,

    /// The MIME type of the artifact.
    ///
    pub mimetype: String,

    /// Additional properties.
    ///
    pub properties: BTreeMap<String, String>,

    /// Mixin types to add to the child.
    ///
    pub mixins: Vec<String>,

    /// A mixin type to add to the owning document, if it does not have it yet.
    ///
    pub owner_mixin: Option<String>,
}

impl NewDerivative {
    /// Create a new artifact without properties or mixins.
    ///
    pub fn new(name: impl Into<String>, data: Vec<u8>, mimetype: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data,
            mimetype: mimetype.into(),
            properties: BTreeMap::new(),
            mixins: vec![],
            owner_mixin: None,
        }
    }

    /// Add a property.
    ///
    pub fn property(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.properties.insert(name.into(), value.to_string());
        self
    }

    /// Add a mixin type to the child.
    ///
    pub fn mixin(mut self, mixin: impl Into<String>) -> Self {
        self.mixins.push(mixin.into());
        self
    }

    /// Add a mixin type to the owning document.
    ///
    pub fn owner_mixin(mut self, mixin: impl Into<String>) -> Self {
        self.owner_mixin = Some(mixin.into());
        self
    }

    pub(crate) fn into_derivative(self, now: DateTime<Utc>) -> (Derivative, Vec<u8>) {
        let derivative = Derivative {
            name: self.name,
            mimetype: self.mimetype,
            size: self.data.len() as u64,
            last_modified: now,
            properties: self.properties,
            mixins: self.mixins,
        };
        (derivative, self.data)
    }
}

/// A reference to a stored derivative.
///
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivativeRef {
    /// The identifier of the owning document.
    ///
    pub owner: String,

    /// The name of the derivative.
    ///
    pub name: String,

    /// The display path of the derivative.
    ///
    pub path: String,
}

/// An entry in the linear version history of a document.
///
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// The name of the version, e.g. `1.2`.
    ///
    pub name: String,

    /// Labels attached to the version.
    ///
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Error type for content store operations.
///
#[derive(Debug)]
pub enum RepositoryError {
    /// No node exists with the given identifier.
    ///
    NotFound(String),

    /// The node is locked or archived and cannot be modified.
    ///
    Locked(String),

    /// Any other failure of the store.
    ///
    Other(anyhow::Error),
}

impl RepositoryError {
    /// Whether the error is the expected condition of a locked node.
    ///
    pub fn is_locked(&self) -> bool {
        matches!(self, RepositoryError::Locked(_))
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryError::NotFound(id) => write!(f, "node {} not found", id),
            RepositoryError::Locked(path) => write!(f, "node {} is locked", path),
            RepositoryError::Other(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for RepositoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RepositoryError::Other(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for RepositoryError {
    fn from(err: anyhow::Error) -> Self {
        RepositoryError::Other(err)
    }
}

impl From<std::io::Error> for RepositoryError {
    fn from(err: std::io::Error) -> Self {
        RepositoryError::Other(anyhow::Error::new(err))
    }
}

/// The content repository the preview services read documents from and store derivatives into.
///
/// Implementations are required to be thread safe.
///
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Returns the name of the workspace this store serves.
    ///
    fn workspace(&self) -> &str;

    /// Look up a node.
    ///
    async fn node(&self, id: &str) -> Result<Option<FileNode>, RepositoryError>;

    /// Returns all file nodes of the store.
    ///
    async fn files(&self) -> Result<Vec<FileNode>, RepositoryError>;

    /// Write the content of a node into `destination`.
    ///
    async fn download(&self, id: &str, destination: &Path) -> Result<(), RepositoryError>;

    /// Look up a derivative of a node.
    ///
    async fn derivative(&self, id: &str, name: &str) -> Result<Option<Derivative>, RepositoryError>;

    /// Create or overwrite a derivative of a node.
    ///
    /// The derivative and the owning node are both stamped with the current time as their last
    /// modification. The content timestamp of the owner is left unchanged.
    ///
    async fn store_derivative(&self, id: &str, derivative: NewDerivative) -> Result<DerivativeRef, RepositoryError>;

    /// Returns the labels of the latest version of a node, empty if it has no versions.
    ///
    async fn version_labels(&self, id: &str) -> Result<Vec<String>, RepositoryError>;

    /// Create a new version of a node and move `label` onto it.
    ///
    async fn checkpoint(&self, id: &str, label: &str) -> Result<Version, RepositoryError>;
}

/// Content stores keyed by workspace name.
///
#[derive(Clone, Default)]
pub struct Workspaces {
    stores: HashMap<String, Arc<dyn ContentStore>>,
}

impl Workspaces {
    /// Create a registry holding a single store.
    ///
    pub fn single(store: Arc<dyn ContentStore>) -> Self {
        let mut workspaces = Self::default();
        workspaces.insert(store);
        workspaces
    }

    /// Register a store under its workspace name.
    ///
    pub fn insert(&mut self, store: Arc<dyn ContentStore>) {
        self.stores.insert(store.workspace().to_string(), store);
    }

    /// Returns the store for `workspace`.
    ///
    pub fn get(&self, workspace: &str) -> Option<Arc<dyn ContentStore>> {
        self.stores.get(workspace).cloned()
    }
}

pub(crate) fn child_path(parent: &str, name: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), name)
}

pub(crate) fn next_version(versions: &mut Vec<Version>, label: &str) -> Version {
    for version in versions.iter_mut() {
        version.labels.retain(|l| l != label);
    }
    let version = Version {
        name: format!("1.{}", versions.len()),
        labels: vec![label.to_string()],
    };
    versions.push(version.clone());
    version
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_version_moves_label() {
        let mut versions = vec![Version {
            name: "1.0".to_string(),
            labels: vec!["default_uploaded_at_2024".to_string(), "other".to_string()],
        }];

        let version = next_version(&mut versions, "default_uploaded_at_2024");

        assert_eq!(version.name, "1.1");
        assert_eq!(versions[0].labels, vec!["other"]);
        assert_eq!(versions[1].labels, vec!["default_uploaded_at_2024"]);
    }

    #[test]
    fn test_child_path() {
        assert_eq!(child_path("/files/report.pdf", "thumbnail"), "/files/report.pdf/thumbnail");
        assert_eq!(child_path("/", "thumbnail"), "/thumbnail");
    }

    #[test]
    fn test_new_derivative() {
        let (derivative, data) = NewDerivative::new("thumbnail", vec![1, 2, 3], "image/png")
            .property("width", 150)
            .mixin("jmix:size")
            .into_derivative(Utc::now());

        assert_eq!(derivative.size, 3);
        assert_eq!(derivative.properties.get("width").map(String::as_str), Some("150"));
        assert_eq!(derivative.mixins, vec!["jmix:size"]);
        assert_eq!(data, vec![1, 2, 3]);
    }
}
