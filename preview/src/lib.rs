//!
//! Generates previews of documents held in a content store: thumbnails of the first page of
//! office and PDF documents, thumbnails of videos and web viewer renditions of documents.
//!
//! The services are registered in a [`management::DocumentManagement`] and triggered through
//! [`rules::PreviewRules`], either inline or as background jobs on a [`jobs::JobRunner`].
//!
#![warn(missing_docs)]

pub mod decider;
pub mod jobs;
pub mod management;
pub mod persistence;
pub mod repository;
pub mod rules;
pub mod settings;
pub mod thumbnails;
pub mod tools;
pub mod video;
pub mod viewer;
pub mod views;
