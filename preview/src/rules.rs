//!
//! Entry points reacting to documents being added or updated.
//!
use std::sync::Arc;

use log::debug;
use tap::Tap;

use services::log_err;

use crate::jobs::{execute, DocumentJob, DocumentOperation, JobScheduler};
use crate::management::DocumentManagement;
use crate::repository::{ContentStore, FileNode};

/// Decides which derivatives a document gets and triggers their generation.
///
/// Operations are queued as background jobs when a scheduler is attached and background execution
/// is requested, and executed inline otherwise.
///
pub struct PreviewRules {
    management: Arc<DocumentManagement>,
    scheduler: Option<JobScheduler>,
    as_background_job: bool,
}

impl PreviewRules {
    /// Create rules that queue operations as background jobs.
    ///
    /// Until a scheduler is attached with [`PreviewRules::with_scheduler`], operations run inline.
    ///
    pub fn new(management: Arc<DocumentManagement>) -> Self {
        Self {
            management,
            scheduler: None,
            as_background_job: true,
        }
    }

    /// Queue operations on `scheduler`.
    ///
    pub fn with_scheduler(mut self, scheduler: JobScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Run operations in the background if `true` and a scheduler is attached.
    ///
    pub fn as_background_job(mut self, as_background_job: bool) -> Self {
        self.as_background_job = as_background_job;
        self
    }

    /// Generate a thumbnail for a document.
    ///
    /// # Returns
    ///
    /// Whether the operation was triggered.
    ///
    pub async fn create_thumbnail(&self, store: &dyn ContentStore, node: &FileNode, name: &str, size: u32) -> bool {
        let handled = self.management.thumbnails().map_or(false, |service| service.can_handle(node));
        if !handled {
            debug!("No thumbnail service for node {} ({})", node.path, node.mimetype());
            return false;
        }
        let operation = DocumentOperation::DocumentThumbnail {
            name: name.to_string(),
            size,
        };
        self.trigger(store, node, operation).await
    }

    /// Generate a thumbnail for a video.
    ///
    /// # Returns
    ///
    /// Whether the operation was triggered.
    ///
    pub async fn create_video_thumbnail(
        &self,
        store: &dyn ContentStore,
        node: &FileNode,
        name: &str,
        offset: u32,
        size: &str,
    ) -> bool {
        let handled = self.management.video().map_or(false, |service| service.can_handle(node));
        if !handled {
            debug!("No video thumbnail service for node {} ({})", node.path, node.mimetype());
            return false;
        }
        let operation = DocumentOperation::VideoThumbnail {
            name: name.to_string(),
            offset,
            size: size.to_string(),
        };
        self.trigger(store, node, operation).await
    }

    /// Generate the flash view of a document.
    ///
    /// # Returns
    ///
    /// Whether the operation was triggered.
    ///
    pub async fn create_view(&self, store: &dyn ContentStore, node: &FileNode) -> bool {
        let handled = self.management.viewer().map_or(false, |service| service.can_handle(node));
        if !handled {
            debug!("No document viewer service for node {} ({})", node.path, node.mimetype());
            return false;
        }
        self.trigger(store, node, DocumentOperation::View).await
    }

    async fn trigger(&self, store: &dyn ContentStore, node: &FileNode, operation: DocumentOperation) -> bool {
        let job = DocumentJob::new(node.id.clone(), operation).in_workspace(store.workspace());
        match self.scheduler.as_ref().filter(|_| self.as_background_job) {
            Some(scheduler) => scheduler
                .schedule(job)
                .await
                .tap(log_err!("Failed to schedule job for node {}", node.path))
                .is_ok(),
            None => execute(&self.management, store, &job)
                .await
                .tap(log_err!("Failed to execute job for node {}", node.path))
                .is_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use identify::groups::MimeGroups;

    use crate::decider::Capability;
    use crate::jobs::JobRunner;
    use crate::repository::{MemoryContentStore, Workspaces};
    use crate::tools::{MockFrameExtractor, MockViewConverter};
    use crate::video::VideoThumbnailService;
    use crate::viewer::{DocumentViewerService, SWF_VIEW};

    use super::*;

    fn temp_file() -> tempfile::TempPath {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"data").unwrap();
        file.into_temp_path()
    }

    fn management() -> Arc<DocumentManagement> {
        let groups = Arc::new(MimeGroups::builtin());

        let mut extractor = MockFrameExtractor::new();
        extractor.expect_is_enabled().return_const(true);
        extractor.expect_extract_frame().returning(|_, _, _| Ok(Some(temp_file())));

        let mut swf = MockViewConverter::new();
        swf.expect_is_enabled().return_const(true);
        swf.expect_convert_to_temp().returning(|_| Ok(Some(temp_file())));

        let management = DocumentManagement::new(groups.clone())
            .with_video(VideoThumbnailService::new(
                Capability::new(groups.clone(), vec!["video".to_string()]),
                Arc::new(extractor),
            ))
            .with_viewer(DocumentViewerService::new(
                Capability::new(groups, vec!["pdf".to_string()]),
                Arc::new(swf),
                None,
            ));
        Arc::new(management)
    }

    #[tokio::test]
    async fn test_create_view_inline() {
        let store = MemoryContentStore::new("default");
        let node = store.add_file("/doc.pdf", "application/pdf", vec![]);
        let rules = PreviewRules::new(management());

        assert!(rules.create_view(&store, &node).await);
        assert!(store.derivative(&node.id, SWF_VIEW).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_skips_unhandled() {
        let store = MemoryContentStore::new("default");
        let node = store.add_file("/clip.mp4", "video/mp4", vec![]);
        let rules = PreviewRules::new(management());

        assert!(!rules.create_view(&store, &node).await);
        assert!(!rules.create_thumbnail(&store, &node, "thumbnail", 150).await);
    }

    #[tokio::test]
    async fn test_create_video_thumbnail_in_background() {
        let store = Arc::new(MemoryContentStore::new("default"));
        let node = store.add_file("/clip.mp4", "video/mp4", vec![]);
        let management = management();
        let runner = JobRunner::start(management.clone(), Workspaces::single(store.clone()), 1);
        let rules = PreviewRules::new(management).with_scheduler(runner.scheduler());

        assert!(rules.create_video_thumbnail(store.as_ref(), &node, "thumbnail", 1, "320x240").await);
        drop(rules);
        runner.shutdown().await;

        assert_eq!(store.derivative_data(&node.id, "thumbnail"), Some(b"data".to_vec()));
    }
}
