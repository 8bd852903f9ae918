//!
//! # Test Utilities
//!
#![warn(missing_docs)]

use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path;

use tempfile::{NamedTempFile, TempPath};

/// Reads the contents of a file into a `Vec<u8>`.
///
/// # Arguments
///
/// * `path` - The path to the file to read.
///
/// # Returns
///
/// Some contents of the file as a `Vec<u8>`, or None if the file could not be read.
///
pub fn read_contents(path: impl AsRef<path::Path>) -> Option<Vec<u8>> {
    let mut content = vec![];
    std::fs::File::open(path.as_ref())
        .and_then(|mut file| file.read_to_end(&mut content))
        .map(|_| content)
        .ok()
}

/// Creates a temporary file and returns its path.
///
#[inline]
pub fn temp_path() -> std::io::Result<TempPath> {
    Ok(NamedTempFile::new()?.into_temp_path())
}

/// Writes a `sh` script into an executable temporary file, standing in for an external tool.
///
/// The script receives the tool's arguments as `$1`, `$2`, ... The file is removed when the
/// returned path is dropped, so keep it alive for as long as the tool is used.
///
/// # Arguments
///
/// * `script` - The body of the script, without the shebang line.
///
pub fn fake_executable(script: &str) -> std::io::Result<TempPath> {
    let mut file = tempfile::Builder::new().prefix("fake-tool").tempfile()?;
    writeln!(file, "#!/bin/sh")?;
    file.write_all(script.as_bytes())?;
    file.flush()?;

    let path = file.into_temp_path();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::process::Command;

    use super::*;

    #[test]
    fn test_read_contents() {
        let path = temp_path().unwrap();
        std::fs::write(&path, b"content").unwrap();

        let contents = read_contents(&path);

        assert_eq!(contents, Some(b"content".to_vec()));
    }

    #[test]
    fn test_read_contents_missing_path() {
        assert!(read_contents("missing").is_none());
    }

    #[test]
    fn test_fake_executable() {
        let tool = fake_executable("echo \"called with $1\"").unwrap();

        let output = Command::new(&tool).arg("argument").output().unwrap();

        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout), "called with argument\n");
    }
}
