//!
//! Decides which documents a preview service handles and when derivatives need regenerating.
//!
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;

use identify::groups::MimeGroups;

/// The set of MIME groups a service is configured for, and whether it is switched on.
///
#[derive(Debug, Clone)]
pub struct Capability {
    enabled: bool,
    supported_formats: Vec<String>,
    groups: Arc<MimeGroups>,
}

impl Capability {
    /// Create an enabled capability.
    ///
    /// # Arguments
    ///
    /// * `groups` - The MIME group table to resolve group names against.
    /// * `supported_formats` - Names of the groups handled.
    ///
    pub fn new(groups: Arc<MimeGroups>, supported_formats: Vec<String>) -> Self {
        Self {
            enabled: true,
            supported_formats,
            groups,
        }
    }

    /// Set whether the capability is switched on.
    ///
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Switch the capability on or off without changing the supported groups.
    ///
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether the capability is switched on.
    ///
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the names of the groups handled.
    ///
    pub fn supported_formats(&self) -> &[String] {
        &self.supported_formats
    }

    /// Returns the MIME group table.
    ///
    pub fn groups(&self) -> &MimeGroups {
        &self.groups
    }

    /// Whether a document of the given MIME type is handled.
    ///
    /// A disabled capability, or one without supported groups, handles nothing.
    ///
    pub fn can_handle(&self, mimetype: &str) -> bool {
        if !self.enabled || self.supported_formats.is_empty() {
            debug!("Capability is disabled or has no supported formats, not handling {}", mimetype);
            return false;
        }
        self.groups.is_mime_type_group(mimetype, self.supported_formats.as_slice())
    }

    /// Whether the MIME type belongs to `group`, regardless of the supported groups.
    ///
    pub fn is_in_group(&self, mimetype: &str, group: &str) -> bool {
        self.groups.is_mime_type_group(mimetype, &[group])
    }
}

/// Whether a derivative needs regenerating.
///
/// A derivative is stale if it is missing or older than its source. Without a source timestamp
/// nothing can be compared and the derivative is kept.
///
/// # Arguments
///
/// * `source` - The last modification of the document.
/// * `derivative` - The last modification of the derivative, [`None`] if it does not exist.
///
pub fn is_stale(source: Option<DateTime<Utc>>, derivative: Option<DateTime<Utc>>) -> bool {
    match (source, derivative) {
        (Some(source), Some(derivative)) => source > derivative,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn capability(formats: &[&str]) -> Capability {
        Capability::new(
            Arc::new(MimeGroups::builtin()),
            formats.iter().map(|f| f.to_string()).collect(),
        )
    }

    #[test]
    fn test_can_handle() {
        let capability = capability(&["pdf", "word"]);

        assert!(capability.can_handle("application/pdf"));
        assert!(capability.can_handle("application/msword"));
        assert!(!capability.can_handle("video/mp4"));
        assert!(!capability.can_handle(""));
    }

    #[test]
    fn test_can_handle_no_formats() {
        assert!(!capability(&[]).can_handle("application/pdf"));
    }

    #[test]
    fn test_toggle_keeps_formats() {
        let mut capability = capability(&["pdf"]);

        capability.set_enabled(false);
        assert!(!capability.can_handle("application/pdf"));
        assert_eq!(capability.supported_formats(), &["pdf".to_string()]);

        capability.set_enabled(true);
        assert!(capability.can_handle("application/pdf"));
    }

    #[test]
    fn test_is_in_group() {
        let capability = capability(&["word"]);

        assert!(capability.is_in_group("application/pdf", "pdf"));
        assert!(!capability.is_in_group("application/msword", "pdf"));
    }

    #[test]
    fn test_is_stale() {
        let now = Utc::now();
        let earlier = now - Duration::seconds(10);

        assert!(is_stale(Some(now), Some(earlier)));
        assert!(!is_stale(Some(earlier), Some(now)));
        assert!(!is_stale(Some(now), Some(now)));
        assert!(is_stale(Some(now), None));
        assert!(!is_stale(None, Some(now)));
        assert!(!is_stale(None, None));
    }
}
