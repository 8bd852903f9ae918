use std::path::Path;

use anyhow::Context;
use file_format::FileFormat;
use log::info;

const UNKNOWN_MIMETYPES: [&str; 2] = ["application/octet-stream", "application/x-empty"];

/// Identifies the mimetype of a file from its content.
///
/// # Arguments
///
/// * `path` - The file to identify the mimetype for.
///
/// # Returns
///
/// The mimetype of the file, or [`None`] if its content has no recognizable signature.
///
pub fn identify_mimetype(path: impl AsRef<Path>) -> Result<Option<String>, anyhow::Error> {
    let mimetype = FileFormat::from_file(&path)
        .with_context(|| {
            format!(
                "failed to identify MIME type for '{}'",
                path.as_ref().display()
            )
        })?
        .media_type()
        .to_string();

    if UNKNOWN_MIMETYPES.contains(&mimetype.as_str()) {
        return Ok(None);
    }
    info!("Identified mimetype as '{}' using file format", mimetype);
    Ok(Some(mimetype))
}
