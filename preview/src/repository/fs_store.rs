use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use identify::mimetype::identify_mimetype;

use crate::repository::{
    child_path, next_version, ContentStore, Derivative, DerivativeRef, FileNode, NewDerivative, RepositoryError,
    Version,
};

const META_FILE: &str = "meta.json";

/// Per-document metadata kept in the sidecar directory.
///
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct Meta {
    mimetype: Option<String>,
    mixins: Vec<String>,
    modified: Option<DateTime<Utc>>,
    locked: bool,
    derivatives: BTreeMap<String, Derivative>,
    versions: Vec<Version>,
}

/// A content store backed by a directory tree.
///
/// Node identifiers are paths relative to the root, starting with `/`. Derivatives and metadata of
/// `dir/report.pdf` are kept in the hidden sidecar directory `dir/.report.pdf.preview/`.
///
pub struct FsContentStore {
    root: PathBuf,
    workspace: String,
}

impl FsContentStore {
    /// Create a store serving the files under `root`.
    ///
    pub fn new(root: impl Into<PathBuf>, workspace: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            workspace: workspace.into(),
        }
    }

    /// Returns the root directory of the store.
    ///
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the sidecar file holding derivative `name` of node `id`.
    ///
    pub fn derivative_path(&self, id: &str, name: &str) -> Result<PathBuf, RepositoryError> {
        Ok(self.sidecar(&self.resolve(id)?)?.join(derivative_file(name)?))
    }

    fn resolve(&self, id: &str) -> Result<PathBuf, RepositoryError> {
        let relative = Path::new(id.trim_start_matches('/'));
        if relative.components().any(|c| !matches!(c, Component::Normal(_))) {
            return Err(RepositoryError::NotFound(id.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn sidecar(&self, path: &Path) -> Result<PathBuf, RepositoryError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("'{}' has no file name", path.display()))?;
        let parent = path.parent().unwrap_or(&self.root);
        Ok(parent.join(format!(".{}.preview", file_name)))
    }

    async fn read_meta(&self, path: &Path) -> Result<Meta, RepositoryError> {
        let meta_path = self.sidecar(path)?.join(META_FILE);
        match tokio::fs::read(&meta_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("invalid metadata in '{}'", meta_path.display()))
                .map_err(RepositoryError::from),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Meta::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_meta(&self, path: &Path, meta: &Meta) -> Result<(), RepositoryError> {
        let sidecar = self.sidecar(path)?;
        tokio::fs::create_dir_all(&sidecar).await?;
        let bytes = serde_json::to_vec_pretty(meta).context("failed to serialize metadata")?;
        tokio::fs::write(sidecar.join(META_FILE), bytes).await?;
        Ok(())
    }

    async fn existing(&self, id: &str) -> Result<PathBuf, RepositoryError> {
        let path = self.resolve(id)?;
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Ok(path),
            Ok(false) => Err(RepositoryError::NotFound(id.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    async fn load(&self, id: &str, path: &Path) -> Result<FileNode, RepositoryError> {
        let metadata = tokio::fs::metadata(path).await?;
        let meta = self.read_meta(path).await?;
        let is_file = metadata.is_file();

        let content_modified = metadata.modified().ok().map(DateTime::<Utc>::from);
        let last_modified = match (content_modified, meta.modified) {
            (Some(file), Some(stamped)) => Some(file.max(stamped)),
            (file, stamped) => file.or(stamped),
        };

        let mimetype = match meta.mimetype {
            Some(mimetype) => Some(mimetype),
            None if is_file => detect_mimetype(path.to_path_buf()).await,
            None => None,
        };

        Ok(FileNode {
            id: id.to_string(),
            path: id.to_string(),
            url: format!("file://{}", path.display()),
            mimetype,
            content_modified,
            last_modified,
            is_file,
            mixins: meta.mixins,
        })
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    fn workspace(&self) -> &str {
        &self.workspace
    }

    async fn node(&self, id: &str) -> Result<Option<FileNode>, RepositoryError> {
        match self.existing(id).await {
            Ok(path) => self.load(id, &path).await.map(Some),
            Err(RepositoryError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn files(&self) -> Result<Vec<FileNode>, RepositoryError> {
        let mut pending = vec![self.root.clone()];
        let mut files = vec![];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let id = format!("/{}", relative.to_string_lossy().replace('\\', "/"));
                files.push(self.load(&id, &path).await?);
            }
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    async fn download(&self, id: &str, destination: &Path) -> Result<(), RepositoryError> {
        let path = self.existing(id).await?;
        tokio::fs::copy(&path, destination).await?;
        Ok(())
    }

    async fn derivative(&self, id: &str, name: &str) -> Result<Option<Derivative>, RepositoryError> {
        let path = self.existing(id).await?;
        Ok(self.read_meta(&path).await?.derivatives.remove(name))
    }

    async fn store_derivative(&self, id: &str, derivative: NewDerivative) -> Result<DerivativeRef, RepositoryError> {
        derivative_file(&derivative.name)?;
        let path = self.existing(id).await?;
        let mut meta = self.read_meta(&path).await?;
        if meta.locked {
            return Err(RepositoryError::Locked(id.to_string()));
        }

        let now = Utc::now();
        if let Some(mixin) = &derivative.owner_mixin {
            if !meta.mixins.contains(mixin) {
                meta.mixins.push(mixin.clone());
            }
        }
        let (derivative, data) = derivative.into_derivative(now);

        let sidecar = self.sidecar(&path)?;
        tokio::fs::create_dir_all(&sidecar).await?;
        tokio::fs::write(sidecar.join(derivative_file(&derivative.name)?), data).await?;

        let reference = DerivativeRef {
            owner: id.to_string(),
            name: derivative.name.clone(),
            path: child_path(id, &derivative.name),
        };
        meta.derivatives.insert(derivative.name.clone(), derivative);
        meta.modified = Some(now);
        self.write_meta(&path, &meta).await?;
        Ok(reference)
    }

    async fn version_labels(&self, id: &str) -> Result<Vec<String>, RepositoryError> {
        let path = self.existing(id).await?;
        let meta = self.read_meta(&path).await?;
        Ok(meta.versions.last().map(|v| v.labels.clone()).unwrap_or_default())
    }

    async fn checkpoint(&self, id: &str, label: &str) -> Result<Version, RepositoryError> {
        let path = self.existing(id).await?;
        let mut meta = self.read_meta(&path).await?;
        if meta.locked {
            return Err(RepositoryError::Locked(id.to_string()));
        }
        let version = next_version(&mut meta.versions, label);
        self.write_meta(&path, &meta).await?;
        Ok(version)
    }
}

/// Derivative names become file names in the sidecar directory next to the metadata file.
fn derivative_file(name: &str) -> Result<&Path, RepositoryError> {
    let file = Path::new(name);
    let mut components = file.components();
    let single = matches!((components.next(), components.next()), (Some(Component::Normal(_)), None));
    if !single || name == META_FILE {
        return Err(RepositoryError::Other(anyhow!("invalid derivative name '{}'", name)));
    }
    Ok(file)
}

async fn detect_mimetype(path: PathBuf) -> Option<String> {
    let detected = tokio::task::spawn_blocking({
        let path = path.clone();
        move || identify_mimetype(&path)
    })
    .await;

    match detected {
        Ok(Ok(Some(mimetype))) => Some(mimetype),
        Ok(Ok(None)) => mimetype_from_extension(&path).map(String::from),
        Ok(Err(err)) => {
            warn!("{:#}", err);
            mimetype_from_extension(&path).map(String::from)
        }
        Err(err) => {
            warn!("MIME type detection of '{}' did not complete: {}", path.display(), err);
            None
        }
    }
}

fn mimetype_from_extension(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_lowercase();
    let mimetype = match extension.as_str() {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "odt" => "application/vnd.oasis.opendocument.text",
        "ods" => "application/vnd.oasis.opendocument.spreadsheet",
        "odp" => "application/vnd.oasis.opendocument.presentation",
        "rtf" => "application/rtf",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "webm" => "video/webm",
        _ => return None,
    };
    Some(mimetype)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FsContentStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::new(dir.path(), "default");
        (dir, store)
    }

    #[tokio::test]
    async fn test_node() {
        let (dir, store) = store();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/notes.txt"), "some notes").unwrap();

        let node = store.node("/docs/notes.txt").await.unwrap().unwrap();
        let folder = store.node("/docs").await.unwrap().unwrap();

        assert_eq!(node.id, "/docs/notes.txt");
        assert_eq!(node.mimetype(), "text/plain");
        assert!(node.is_file);
        assert!(node.last_modified.is_some());
        assert!(!folder.is_file);
        assert!(store.node("/docs/missing.txt").await.unwrap().is_none());
        assert!(store.node("/../etc/passwd").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_derivative() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("report.pdf"), "%PDF-1.4").unwrap();

        let reference = store
            .store_derivative(
                "/report.pdf",
                NewDerivative::new("swfView", vec![7, 7, 7], "application/x-shockwave-flash")
                    .owner_mixin("jmix:swfDocumentView"),
            )
            .await
            .unwrap();

        let node = store.node("/report.pdf").await.unwrap().unwrap();
        let derivative = store.derivative("/report.pdf", "swfView").await.unwrap().unwrap();
        let stored = std::fs::read(store.derivative_path("/report.pdf", "swfView").unwrap()).unwrap();
        assert_eq!(reference.path, "/report.pdf/swfView");
        assert_eq!(stored, vec![7, 7, 7]);
        assert_eq!(derivative.size, 3);
        assert!(node.has_mixin("jmix:swfDocumentView"));
        assert!(node.last_modified.unwrap() >= derivative.last_modified);
        assert!(dir.path().join(".report.pdf.preview").is_dir());
    }

    #[tokio::test]
    async fn test_files_skips_sidecars() {
        let (dir, store) = store();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), "b").unwrap();
        store
            .store_derivative("/a.txt", NewDerivative::new("thumbnail", vec![1], "image/png"))
            .await
            .unwrap();

        let files = store.files().await.unwrap();
        let ids: Vec<&str> = files.iter().map(|f| f.id.as_str()).collect();

        assert_eq!(ids, vec!["/a.txt", "/sub/b.txt"]);
    }

    #[tokio::test]
    async fn test_locked() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("a.pdf"), "%PDF").unwrap();
        std::fs::create_dir(dir.path().join(".a.pdf.preview")).unwrap();
        std::fs::write(dir.path().join(".a.pdf.preview/meta.json"), r#"{"locked": true}"#).unwrap();

        let result = store
            .store_derivative("/a.pdf", NewDerivative::new("thumbnail", vec![1], "image/png"))
            .await;

        assert!(matches!(result, Err(RepositoryError::Locked(_))));
    }

    #[tokio::test]
    async fn test_checkpoint() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("a.pdf"), "%PDF").unwrap();

        store.checkpoint("/a.pdf", "default_uploaded_at_x").await.unwrap();

        assert_eq!(store.version_labels("/a.pdf").await.unwrap(), vec!["default_uploaded_at_x"]);
    }

    #[tokio::test]
    async fn test_store_derivative_keeps_content_timestamp() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("report.pdf"), "%PDF-1.4").unwrap();
        let before = store.node("/report.pdf").await.unwrap().unwrap().content_modified;

        store
            .store_derivative("/report.pdf", NewDerivative::new("thumbnail", vec![1], "image/png"))
            .await
            .unwrap();

        let node = store.node("/report.pdf").await.unwrap().unwrap();
        assert!(before.is_some());
        assert_eq!(node.content_modified, before);
    }

    #[tokio::test]
    async fn test_store_derivative_invalid_name() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("report.pdf"), "%PDF-1.4").unwrap();

        for name in ["../../escaped", "nested/thumbnail", "meta.json", ""] {
            let result = store
                .store_derivative("/report.pdf", NewDerivative::new(name, vec![1], "image/png"))
                .await;
            assert!(matches!(result, Err(RepositoryError::Other(_))), "{}", name);
        }

        assert!(!dir.path().join("escaped").exists());
        assert!(!dir.path().join(".report.pdf.preview").exists());
        assert!(store.derivative_path("/report.pdf", "../x").is_err());
    }

    #[test]
    fn test_mimetype_from_extension() {
        assert_eq!(mimetype_from_extension(Path::new("a/B.PDF")), Some("application/pdf"));
        assert_eq!(mimetype_from_extension(Path::new("clip.mp4")), Some("video/mp4"));
        assert_eq!(mimetype_from_extension(Path::new("noext")), None);
    }
}
