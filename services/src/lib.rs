//!
//! Provides the external tools used for generating document and media previews.
//!
//! Every tool is a thin wrapper around a command line program whose arguments come from a
//! [`CommandTemplate`], executed through an [`ExternalProcess`].
//!
#![warn(missing_docs)]

use std::fmt;
use std::fmt::Formatter;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::anyhow;
use bytesize::MB;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::join;
use tokio::process::Child;

pub use config::*;
pub use office_to_pdf::*;
pub use pdf_to_image::*;
pub use pdf_to_swf::*;
pub use process::*;
pub use template::*;
pub use video_to_image::*;

mod config;
mod office_to_pdf;
mod pdf_to_image;
mod pdf_to_swf;
mod process;
mod template;
mod video_to_image;

/// Defines a closure that logs an error if the [`anyhow::Result`] passed in is an error.
///
/// Arguments follow the same syntax as [`format!`].
///
#[macro_export]
macro_rules! log_err {
    ($($arg:tt)+) => (
        |res| if let Err(err) = res {
            let msg = format!($($arg)+);
            log::error!("{}: {}", msg, err);
        }
    );
}

/// The reason a [`ConversionError`] was raised.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionErrorKind {
    /// The external program could not be started.
    ///
    Spawn,

    /// Reading or writing the files and streams around the conversion failed.
    ///
    Io,

    /// The external program did not finish within the configured time limit and was killed.
    ///
    Timeout,
}

/// Error type for when running an external conversion fails.
///
/// A non-zero exit code of the external program is not an error; it is reported through
/// [`CommandOutput`] instead.
///
#[derive(Debug)]
pub struct ConversionError {
    /// The command line that was being executed, if any.
    ///
    pub command: Option<String>,

    /// The exit status of the command, if it got as far as exiting.
    ///
    pub exit_status: Option<ExitStatus>,

    kind: ConversionErrorKind,
    inner: anyhow::Error,
}

impl ConversionError {
    /// Create a new [`ConversionError`] for a command that failed before exiting.
    ///
    pub fn pre_exit<E>(command: &ResolvedCommand, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            command: Some(command.to_string()),
            exit_status: None,
            kind: ConversionErrorKind::Spawn,
            inner: anyhow::Error::new(err),
        }
    }

    /// Create a new [`ConversionError`] for a command that exited, but whose output streams failed.
    ///
    pub fn post_exit<E>(command: &ResolvedCommand, exit_status: ExitStatus, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            command: Some(command.to_string()),
            exit_status: Some(exit_status),
            kind: ConversionErrorKind::Io,
            inner: anyhow::Error::new(err),
        }
    }

    /// Create a new [`ConversionError`] for a command that was killed after running for `limit`.
    ///
    pub fn timed_out(command: &ResolvedCommand, limit: Duration) -> Self {
        Self {
            command: Some(command.to_string()),
            exit_status: None,
            kind: ConversionErrorKind::Timeout,
            inner: anyhow!("command did not finish within {:?}", limit),
        }
    }

    /// Create a new [`ConversionError`] for an I/O failure outside of any command, e.g. while
    /// preparing temporary files.
    ///
    pub fn io(err: io::Error) -> Self {
        Self {
            command: None,
            exit_status: None,
            kind: ConversionErrorKind::Io,
            inner: anyhow::Error::new(err),
        }
    }

    /// Returns the reason for the failure.
    ///
    pub fn kind(&self) -> ConversionErrorKind {
        self.kind
    }

    /// Returns the exit code of the command, if it has one.
    ///
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_status.and_then(|status| status.code())
    }
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let command = self.command.as_deref().unwrap_or("conversion");
        match (self.kind, self.exit_status) {
            (ConversionErrorKind::Timeout, _) => write!(f, "'{}' timed out: {}", command, self.inner),
            (_, None) => write!(f, "'{}' failed before exiting: {}", command, self.inner),
            (_, Some(status)) => {
                let code = status
                    .code()
                    .map(|code| code.to_string())
                    .unwrap_or("?".to_string());
                write!(f, "'{}' failed (code {}): {}", command, code, self.inner)
            }
        }
    }
}

impl std::error::Error for ConversionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner.as_ref())
    }
}

/// The collected result of running an external command to completion.
///
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// The exit status of the command.
    ///
    pub exit_status: ExitStatus,

    /// Everything the command wrote to stdout, trimmed.
    ///
    pub stdout: String,

    /// Everything the command wrote to stderr, trimmed.
    ///
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited with code `0`.
    ///
    pub fn success(&self) -> bool {
        self.exit_status.success()
    }

    /// Returns the exit code of the command, [`None`] if it was terminated by a signal.
    ///
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_status.code()
    }
}

/// Run a command to completion, collecting stdout and stderr into memory.
///
/// # Arguments
///
/// * `command` - The resolved program and arguments to run.
/// * `working_dir` - The directory to run the command in, or the current one if [`None`].
/// * `timeout` - The time after which the command is killed, or [`None`] to wait indefinitely.
///
/// # Returns
///
/// The [`CommandOutput`] for any command that ran until it exited, including non-zero exits.
///
/// Otherwise, a [`ConversionError`] is returned, and here are the possible implications:
/// 1. The command could not be spawned, so the exit status is [`None`]
/// 2. The command finished, but an I/O error occurred while collecting its output, so the exit status is populated
/// 3. The command was killed after reaching the timeout
///
pub(crate) async fn run_command(
    command: &ResolvedCommand,
    working_dir: Option<&Path>,
    timeout: Option<Duration>,
) -> Result<CommandOutput, ConversionError> {
    let mut builder = tokio::process::Command::new(command.program());
    builder
        .args(command.args())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = working_dir {
        builder.current_dir(dir);
    }
    let mut proc = builder
        .spawn()
        .map_err(|err| ConversionError::pre_exit(command, err))?;

    let mut stdout = vec![];
    let mut stderr = vec![];
    let exit_status = match timeout {
        Some(limit) => {
            let collecting = collect(command, &mut proc, &mut stdout, &mut stderr);
            let result = tokio::time::timeout(limit, collecting).await;
            match result {
                Ok(result) => result?,
                Err(_) => {
                    let _ = proc.kill().await;
                    return Err(ConversionError::timed_out(command, limit));
                }
            }
        }
        None => collect(command, &mut proc, &mut stdout, &mut stderr).await?,
    };

    Ok(CommandOutput {
        exit_status,
        stdout: trim_to_string(&stdout),
        stderr: trim_to_string(&stderr),
    })
}

async fn collect(
    command: &ResolvedCommand,
    proc: &mut Child,
    stdout: &mut Vec<u8>,
    stderr: &mut Vec<u8>,
) -> Result<ExitStatus, ConversionError> {
    let reading = transfer(proc.stdout.take(), Some(stdout));
    let erroring = transfer(proc.stderr.take(), Some(stderr));

    // Don't `try_join!` to allow the error buffer to be written to completion
    let (reading_res, erroring_res) = join!(reading, erroring);
    let exit_status = proc
        .wait()
        .await
        .map_err(|err| ConversionError::pre_exit(command, err))?;

    // Resolve the results after the process finishes to get the `ExitStatus`
    reading_res
        .and(erroring_res)
        .map_err(|err| ConversionError::post_exit(command, exit_status, err))?;

    Ok(exit_status)
}

pub(crate) async fn transfer<R, W>(reader: Option<R>, writer: Option<W>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if let (Some(mut reader), Some(mut writer)) = (reader, writer) {
        let mut buf = vec![0u8; MB as usize];
        loop {
            let bytes_read = reader.read(&mut buf).await?;
            if bytes_read == 0 {
                break;
            }
            writer.write_all(&buf[..bytes_read]).await?;
        }
        writer.flush().await?;
    }
    Ok(())
}

fn trim_to_string(value: &[u8]) -> String {
    String::from_utf8_lossy(value)
        .replace('\u{0}', "")
        .trim()
        .to_string()
}

/// Creates a temporary file with the given prefix and returns its path.
///
/// The file is removed when the returned [`tempfile::TempPath`] is dropped; failures to remove it are ignored.
///
pub(crate) fn temp_path(prefix: &str) -> Result<tempfile::TempPath, ConversionError> {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempfile()
        .map(|file| file.into_temp_path())
        .map_err(ConversionError::io)
}

/// Whether the file at `path` exists and has content.
///
pub(crate) async fn has_content(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}
