use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use log::{debug, info};

use crate::{run_command, CommandOutput, CommandTemplate, ConversionError, TemplateParams};

/// An external program invoked through a [`CommandTemplate`].
///
/// Each call to [`ExternalProcess::run`] is a single synchronous attempt: there are no retries,
/// and unless a timeout is configured the call waits for the program for as long as it runs.
///
#[derive(Debug, Clone)]
pub struct ExternalProcess {
    template: CommandTemplate,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl ExternalProcess {
    /// Create a new process definition from a template.
    ///
    pub fn new(template: CommandTemplate) -> Self {
        Self {
            template,
            working_dir: None,
            timeout: None,
        }
    }

    /// Set the directory the program runs in.
    ///
    /// The directory is created on first use if it does not exist; if it cannot be created the
    /// program runs in the current directory.
    ///
    pub fn working_dir(mut self, working_dir: Option<PathBuf>) -> Self {
        self.working_dir = working_dir;
        self
    }

    /// Set the time after which the program is killed.
    ///
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the command template.
    ///
    pub fn template(&self) -> &CommandTemplate {
        &self.template
    }

    /// Resolve the template with `params` and run the program to completion.
    ///
    /// # Returns
    ///
    /// * `Ok(CommandOutput)` - If the program ran until it exited, whatever its exit code.
    /// * `Err(ConversionError)` - If the program could not be started, its output could not be read, or it timed out.
    ///
    pub async fn run(&self, params: &TemplateParams) -> Result<CommandOutput, ConversionError> {
        let command = self.template.resolve(params);
        debug!("Executing command: {}", command);

        let working_dir = self.usable_working_dir();
        run_command(&command, working_dir, self.timeout).await
    }

    fn usable_working_dir(&self) -> Option<&Path> {
        self.working_dir
            .as_deref()
            .filter(|dir| dir.exists() || std::fs::create_dir_all(dir).is_ok())
    }
}

/// Checks whether `executable` can be started.
///
/// The probed program is killed straight away; only the ability to spawn it matters.
///
/// # Arguments
///
/// * `executable` - The program name or path.
/// * `working_dir` - The directory to start the program in, created if missing.
///
pub async fn command_present(executable: &str, working_dir: Option<&Path>) -> bool {
    debug!("Checking if {} is present in the current path", executable);
    if let Some(path) = std::env::var_os("PATH") {
        debug!("Current PATH is: {}", path.to_string_lossy());
    }

    let mut builder = tokio::process::Command::new(executable);
    builder
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    if let Some(dir) = working_dir.filter(|dir| dir.exists() || std::fs::create_dir_all(dir).is_ok()) {
        builder.current_dir(dir);
    }

    match builder.spawn() {
        Ok(mut child) => {
            let _ = child.kill().await;
            true
        }
        Err(err) => {
            info!("Unable to execute command {}: {}", executable, err);
            false
        }
    }
}
