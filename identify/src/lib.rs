//!
//! Identify is a library for classifying files by MIME type.
//!
//! "Classification" includes the following:
//! * Detecting the MIME type of a file from its content
//! * Deciding whether a MIME type belongs to a named group, such as `pdf` or `video`
//!
#![warn(missing_docs)]

/// MIME type group functionality.
///
pub mod groups;

/// MIME type identification functionality.
///
pub mod mimetype;
