use std::collections::BTreeMap;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

const DEFAULT_TABLE: &[(&str, &[&str])] = &[
    ("pdf", &["application/pdf", "application/x-pdf"]),
    ("word", &[
        "application/msword",
        "application/vnd.ms-word*",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.*",
    ]),
    ("rtf", &["application/rtf", "text/rtf"]),
    ("excel", &[
        "application/vnd.ms-excel*",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.*",
    ]),
    ("powerpoint", &[
        "application/vnd.ms-powerpoint*",
        "application/vnd.openxmlformats-officedocument.presentationml.*",
    ]),
    ("openoffice", &["application/vnd.oasis.opendocument.*", "application/vnd.sun.xml.*"]),
    ("text", &["text/plain"]),
    ("html", &["text/html", "application/xhtml+xml"]),
    ("image", &["image/*"]),
    ("video", &["video/*"]),
    ("audio", &["audio/*"]),
    ("archive", &[
        "application/zip",
        "application/x-tar",
        "application/gzip",
        "application/x-7z-compressed",
    ]),
];

lazy_static! {
    static ref DEFAULT_GROUPS: MimeGroups = MimeGroups::from_table(DEFAULT_TABLE);
}

/// Named groups of MIME types, e.g. `pdf` or `video`.
///
/// A group holds patterns that are either a full MIME type (`application/pdf`) or a prefix ending
/// in `*` (`video/*`, `application/vnd.oasis.opendocument.*`). Group names and MIME types are
/// compared case-insensitively; MIME type parameters after `;` are ignored.
///
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MimeGroups {
    groups: BTreeMap<String, Vec<String>>,
}

impl MimeGroups {
    /// Returns the built-in groups: `pdf`, `word`, `rtf`, `excel`, `powerpoint`, `openoffice`,
    /// `text`, `html`, `image`, `video`, `audio` and `archive`.
    ///
    pub fn builtin() -> Self {
        DEFAULT_GROUPS.clone()
    }

    fn from_table(table: &[(&str, &[&str])]) -> Self {
        let mut groups = Self::default();
        for (name, patterns) in table {
            groups.insert(*name, patterns.iter().map(|pattern| pattern.to_string()).collect());
        }
        groups
    }

    /// Define a group, replacing any group with the same name.
    ///
    pub fn insert(&mut self, name: impl AsRef<str>, patterns: Vec<String>) {
        let patterns = patterns
            .into_iter()
            .map(|pattern| pattern.trim().to_lowercase())
            .collect();
        self.groups.insert(name.as_ref().trim().to_lowercase(), patterns);
    }

    /// Add all groups of `other`, replacing groups with the same name.
    ///
    pub fn extend(&mut self, other: MimeGroups) {
        for (name, patterns) in other.groups {
            self.insert(name, patterns);
        }
    }

    /// Returns the patterns of a group.
    ///
    pub fn patterns(&self, group: &str) -> Option<&[String]> {
        self.groups.get(&group.trim().to_lowercase()).map(Vec::as_slice)
    }

    /// Checks whether `mimetype` belongs to any of `groups`.
    ///
    /// Unknown group names never match, and neither does an empty MIME type.
    ///
    pub fn is_mime_type_group<S: AsRef<str>>(&self, mimetype: &str, groups: &[S]) -> bool {
        let mimetype = normalize(mimetype);
        if mimetype.is_empty() {
            return false;
        }

        groups
            .iter()
            .filter_map(|group| self.patterns(group.as_ref()))
            .flatten()
            .any(|pattern| matches(pattern, &mimetype))
    }

    /// Returns the names of all groups `mimetype` belongs to, in name order.
    ///
    pub fn groups_of(&self, mimetype: &str) -> Vec<&str> {
        let mimetype = normalize(mimetype);
        self.groups
            .iter()
            .filter(|(_, patterns)| patterns.iter().any(|pattern| matches(pattern, &mimetype)))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

fn normalize(mimetype: &str) -> String {
    mimetype
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

fn matches(pattern: &str, mimetype: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => !mimetype.is_empty() && mimetype.starts_with(prefix),
        None => pattern == mimetype,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let groups = MimeGroups::builtin();

        assert!(groups.is_mime_type_group("application/pdf", &["pdf"]));
        assert!(groups.is_mime_type_group("application/x-pdf", &["word", "pdf"]));
        assert!(!groups.is_mime_type_group("application/pdf", &["word"]));
    }

    #[test]
    fn test_wildcard_match() {
        let groups = MimeGroups::builtin();

        assert!(groups.is_mime_type_group("video/mp4", &["video"]));
        assert!(groups.is_mime_type_group("application/vnd.oasis.opendocument.text", &["openoffice"]));
        assert!(groups.is_mime_type_group(
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            &["word"]
        ));
        assert!(!groups.is_mime_type_group("audio/mpeg", &["video"]));
    }

    #[test]
    fn test_case_and_parameters_are_ignored() {
        let groups = MimeGroups::builtin();

        assert!(groups.is_mime_type_group("Application/PDF; charset=binary", &["PDF"]));
        assert!(groups.is_mime_type_group(" text/plain ;charset=utf-8", &["text"]));
    }

    #[test]
    fn test_empty_inputs_never_match() {
        let groups = MimeGroups::builtin();
        let no_groups: [&str; 0] = [];

        assert!(!groups.is_mime_type_group("", &["pdf", "video"]));
        assert!(!groups.is_mime_type_group("application/pdf", &no_groups));
        assert!(!groups.is_mime_type_group("application/pdf", &["unknown-group"]));
    }

    #[test]
    fn test_custom_groups() {
        let mut groups = MimeGroups::builtin();
        let custom: MimeGroups = serde_json::from_str(r#"{ "Visio": ["application/vnd.visio"] }"#).unwrap();
        groups.extend(custom);

        assert!(groups.is_mime_type_group("application/vnd.visio", &["visio"]));
        assert!(groups.is_mime_type_group("application/pdf", &["pdf"]));
    }

    #[test]
    fn test_groups_of() {
        let groups = MimeGroups::builtin();

        assert_eq!(groups.groups_of("video/quicktime"), vec!["video"]);
        assert!(groups.groups_of("application/x-unknown").is_empty());
    }
}
