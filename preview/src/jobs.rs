//!
//! Document operations executed in the background by a pool of worker tasks.
//!
use std::fmt;
use std::fmt::Formatter;
use std::sync::Arc;

use anyhow::anyhow;
use futures::future::join_all;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tap::Tap;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use services::log_err;

use crate::management::DocumentManagement;
use crate::repository::{ContentStore, RepositoryError, Workspaces, DEFAULT_WORKSPACE};
use crate::views;

const QUEUE_CAPACITY: usize = 256;

/// An operation on a single document.
///
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentOperation {
    /// Generate a thumbnail of the first page.
    ///
    DocumentThumbnail {
        /// The derivative name.
        name: String,
        /// The longest side in pixels.
        size: u32,
    },

    /// Generate a thumbnail from a frame of a video.
    ///
    VideoThumbnail {
        /// The derivative name.
        name: String,
        /// The frame position in seconds.
        offset: u32,
        /// The frame size as `WxH`.
        size: String,
    },

    /// Generate the flash view.
    ///
    View,

    /// Generate the PDF view.
    ///
    PdfView,
}

impl fmt::Display for DocumentOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DocumentOperation::DocumentThumbnail { name, size } => write!(f, "document thumbnail {} ({}px)", name, size),
            DocumentOperation::VideoThumbnail { name, offset, size } => {
                write!(f, "video thumbnail {} ({} at {}s)", name, size, offset)
            }
            DocumentOperation::View => write!(f, "flash view"),
            DocumentOperation::PdfView => write!(f, "PDF view"),
        }
    }
}

/// A document operation scheduled for a node.
///
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentJob {
    /// The identifier of the node.
    ///
    pub node: String,

    /// The workspace of the node.
    ///
    pub workspace: String,

    /// The operation to execute.
    ///
    pub operation: DocumentOperation,
}

impl DocumentJob {
    /// Create a job for a node of the default workspace.
    ///
    pub fn new(node: impl Into<String>, operation: DocumentOperation) -> Self {
        Self {
            node: node.into(),
            workspace: DEFAULT_WORKSPACE.to_string(),
            operation,
        }
    }

    /// Set the workspace of the node.
    ///
    pub fn in_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = workspace.into();
        self
    }
}

/// Execute a document operation.
///
/// # Returns
///
/// Whether a derivative was generated. An operation whose service is absent or disabled is skipped
/// and returns `false`.
///
pub async fn execute(
    management: &DocumentManagement,
    store: &dyn ContentStore,
    job: &DocumentJob,
) -> Result<bool, RepositoryError> {
    let id = job.node.as_str();
    match &job.operation {
        DocumentOperation::DocumentThumbnail { name, size } => match management.thumbnails() {
            Some(service) if service.is_enabled() => service.create_thumbnail_for_node(store, id, name, *size).await,
            _ => skip(job),
        },
        DocumentOperation::VideoThumbnail { name, offset, size } => match management.video() {
            Some(service) if service.is_enabled() => {
                service
                    .create_thumbnail_for_node(store, id, name, *offset, size)
                    .await
            }
            _ => skip(job),
        },
        DocumentOperation::View => match management.viewer() {
            Some(service) if service.is_enabled() => service.create_view_for_node(store, id).await,
            _ => skip(job),
        },
        DocumentOperation::PdfView => match management.viewer() {
            Some(viewer) if viewer.is_enabled() => {
                let url = views::pdf_view_url(store, Some(viewer), id, true).await?;
                Ok(url.is_some())
            }
            _ => skip(job),
        },
    }
}

fn skip(job: &DocumentJob) -> Result<bool, RepositoryError> {
    info!("Service for {} is not enabled, skipping node {}", job.operation, job.node);
    Ok(false)
}

/// Sends jobs to a [`JobRunner`].
///
#[derive(Clone)]
pub struct JobScheduler {
    sender: mpsc::Sender<DocumentJob>,
}

impl JobScheduler {
    /// Queue a job, waiting for room in the queue if it is full.
    ///
    pub async fn schedule(&self, job: DocumentJob) -> anyhow::Result<()> {
        debug!("Scheduling {} for node {}", job.operation, job.node);
        self.sender
            .send(job)
            .await
            .map_err(|err| anyhow!("job runner stopped, dropped {} for node {}", err.0.operation, err.0.node))
    }
}

/// Executes document jobs on a fixed pool of worker tasks.
///
/// Failures of single jobs are logged and never stop the runner.
///
pub struct JobRunner {
    scheduler: JobScheduler,
    workers: Vec<JoinHandle<()>>,
}

impl JobRunner {
    /// Start the worker tasks on the current tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `management` - The services executing the operations.
    /// * `workspaces` - The stores jobs are resolved against.
    /// * `workers` - The number of worker tasks, at least one.
    ///
    pub fn start(management: Arc<DocumentManagement>, workspaces: Workspaces, workers: usize) -> Self {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..workers.max(1))
            .map(|worker| {
                let receiver = receiver.clone();
                let management = management.clone();
                let workspaces = workspaces.clone();
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(job) = next else {
                            break;
                        };
                        run(&management, &workspaces, &job).await;
                    }
                    debug!("Job worker {} stopped", worker);
                })
            })
            .collect();

        Self {
            scheduler: JobScheduler { sender },
            workers,
        }
    }

    /// Returns a handle for queueing jobs.
    ///
    pub fn scheduler(&self) -> JobScheduler {
        self.scheduler.clone()
    }

    /// Queue a job.
    ///
    pub async fn schedule(&self, job: DocumentJob) -> anyhow::Result<()> {
        self.scheduler.schedule(job).await
    }

    /// Stop accepting jobs and wait for the queued ones to finish.
    ///
    /// Jobs can still be queued through schedulers obtained earlier; the runner finishes once
    /// all of them are dropped.
    ///
    pub async fn shutdown(self) {
        drop(self.scheduler);
        for result in join_all(self.workers).await {
            result.tap(log_err!("Job worker panicked")).ok();
        }
    }
}

async fn run(management: &DocumentManagement, workspaces: &Workspaces, job: &DocumentJob) {
    let Some(store) = workspaces.get(&job.workspace) else {
        warn!(
            "Unknown workspace {}, skip executing {} for node {}",
            job.workspace, job.operation, job.node
        );
        return;
    };
    match execute(management, store.as_ref(), job).await {
        Ok(_) => {}
        Err(RepositoryError::NotFound(_)) => warn!(
            "Unable to find node {} in workspace {}, skip executing {}",
            job.node, job.workspace, job.operation
        ),
        Err(err) => error!("Error executing {} for node {}: {}", job.operation, job.node, err),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, ImageOutputFormat, RgbImage};
    use pretty_assertions::assert_eq;

    use crate::decider::Capability;
    use crate::repository::MemoryContentStore;
    use crate::thumbnails::DocumentThumbnailService;
    use crate::tools::MockPageRenderer;

    use super::*;

    fn png() -> Vec<u8> {
        let mut data = Cursor::new(vec![]);
        DynamicImage::ImageRgb8(RgbImage::new(20, 10))
            .write_to(&mut data, ImageOutputFormat::Png)
            .unwrap();
        data.into_inner()
    }

    fn management() -> DocumentManagement {
        let mut renderer = MockPageRenderer::new();
        renderer.expect_is_enabled().return_const(true);
        renderer.expect_render_page().returning(|_, _| Ok(Some(png())));
        let groups = Arc::new(identify::groups::MimeGroups::builtin());
        let thumbnails = DocumentThumbnailService::new(
            Capability::new(groups.clone(), vec!["pdf".to_string()]),
            Arc::new(renderer),
            None,
        );
        DocumentManagement::new(groups).with_thumbnails(thumbnails)
    }

    fn thumbnail() -> DocumentOperation {
        DocumentOperation::DocumentThumbnail {
            name: "thumbnail".to_string(),
            size: 150,
        }
    }

    #[tokio::test]
    async fn test_execute() {
        let store = MemoryContentStore::new("default");
        store.add_file("/doc.pdf", "application/pdf", vec![]);

        let generated = execute(&management(), &store, &DocumentJob::new("/doc.pdf", thumbnail()))
            .await
            .unwrap();

        assert!(generated);
        assert_eq!(store.derivative_data("/doc.pdf", "thumbnail"), Some(png()));
    }

    #[tokio::test]
    async fn test_execute_without_service() {
        let store = MemoryContentStore::new("default");
        store.add_file("/doc.pdf", "application/pdf", vec![]);

        let generated = execute(&management(), &store, &DocumentJob::new("/doc.pdf", DocumentOperation::View))
            .await
            .unwrap();

        assert!(!generated);
    }

    #[tokio::test]
    async fn test_execute_missing_node() {
        let store = MemoryContentStore::new("default");

        let result = execute(&management(), &store, &DocumentJob::new("/gone.pdf", thumbnail())).await;

        assert!(matches!(result, Err(RepositoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_runner() {
        let store = Arc::new(MemoryContentStore::new("live"));
        store.add_file("/a.pdf", "application/pdf", vec![]);
        store.add_file("/b.pdf", "application/pdf", vec![]);
        let runner = JobRunner::start(Arc::new(management()), Workspaces::single(store.clone()), 2);

        runner
            .schedule(DocumentJob::new("/a.pdf", thumbnail()).in_workspace("live"))
            .await
            .unwrap();
        runner
            .schedule(DocumentJob::new("/missing.pdf", thumbnail()).in_workspace("live"))
            .await
            .unwrap();
        runner
            .schedule(DocumentJob::new("/b.pdf", thumbnail()).in_workspace("other"))
            .await
            .unwrap();
        runner.shutdown().await;

        assert!(store.derivative_data("/a.pdf", "thumbnail").is_some());
        assert!(store.derivative_data("/b.pdf", "thumbnail").is_none());
    }

    #[test]
    fn test_operation_serde() {
        let json = serde_json::to_string(&thumbnail()).unwrap();

        assert_eq!(json, r#"{"type":"document_thumbnail","name":"thumbnail","size":150}"#);
        assert_eq!(serde_json::from_str::<DocumentOperation>(r#"{"type":"view"}"#).unwrap(), DocumentOperation::View);
    }
}
