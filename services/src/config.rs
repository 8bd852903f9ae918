use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};

use crate::{command_present, CommandTemplate, ExternalProcess};

/// A struct used to define an interface for accessing environment-provided configuration values.
///
#[derive(Debug, Clone, Default)]
pub struct Config;

impl Config {
    /// Get the value of an environment variable.
    ///
    /// # Arguments
    ///
    /// * `key` - The name of the environment variable.
    ///
    /// # Returns
    ///
    /// The value of the environment variable, or [`None`] if it is not set or empty.
    ///
    pub fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|value| !value.trim().is_empty())
    }

    /// Get the value of an environment variable, or a default value.
    ///
    /// # Arguments
    ///
    /// * `key` - The name of the environment variable.
    /// * `default` - The default value to return if the environment variable is not set.
    ///
    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Get the value of an environment variable parsed as `T`.
    ///
    /// Values that fail to parse are treated as unset.
    ///
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|value| value.trim().parse().ok())
    }
}

/// Whether an external tool is used.
///
/// Parsed leniently: `true` (any case) enables the tool, `auto` or `autodetect` enables it only if
/// the executable can be started, and anything else disables it.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "ActivationValue", into = "String")]
pub enum Activation {
    /// The tool is used.
    ///
    Enabled,

    /// The tool is not used.
    ///
    #[default]
    Disabled,

    /// The tool is used if its executable is present.
    ///
    Auto,
}

impl Activation {
    /// Decide whether the tool is enabled, probing for the executable in case of [`Activation::Auto`].
    ///
    pub async fn resolve(&self, executable: &str, working_dir: Option<&std::path::Path>) -> bool {
        match self {
            Activation::Enabled => true,
            Activation::Disabled => false,
            Activation::Auto => {
                info!("Checking if the {} is present in the current path", executable);
                let present = command_present(executable, working_dir).await;
                if present {
                    info!("Found {} in the current system path. Service will be enabled.", executable);
                } else {
                    info!("Command {} cannot be found in the current system path. The service will be disabled.", executable);
                }
                present
            }
        }
    }
}

impl From<&str> for Activation {
    fn from(value: &str) -> Self {
        let value = value.trim();
        if value.eq_ignore_ascii_case("true") {
            Activation::Enabled
        } else if value.eq_ignore_ascii_case("auto") || value.eq_ignore_ascii_case("autodetect") {
            Activation::Auto
        } else {
            Activation::Disabled
        }
    }
}

impl From<bool> for Activation {
    fn from(value: bool) -> Self {
        if value {
            Activation::Enabled
        } else {
            Activation::Disabled
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Activation::Enabled => "true",
            Activation::Disabled => "false",
            Activation::Auto => "auto",
        };
        f.write_str(value)
    }
}

impl From<Activation> for String {
    fn from(value: Activation) -> Self {
        value.to_string()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ActivationValue {
    Flag(bool),
    Text(String),
}

impl From<ActivationValue> for Activation {
    fn from(value: ActivationValue) -> Self {
        match value {
            ActivationValue::Flag(flag) => flag.into(),
            ActivationValue::Text(text) => text.as_str().into(),
        }
    }
}

/// User-supplied settings for an external tool.
///
/// Every field is optional; unset fields fall back to the defaults of the tool they configure.
///
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    /// Whether the tool is used.
    ///
    pub activate: Option<Activation>,

    /// The program to run.
    ///
    pub executable_path: Option<String>,

    /// The argument template, see [`CommandTemplate`].
    ///
    pub parameters: Option<String>,

    /// The directory the program runs in.
    ///
    pub working_dir: Option<PathBuf>,

    /// Seconds after which the program is killed. Waits indefinitely if unset.
    ///
    pub timeout_secs: Option<u64>,
}

impl ToolSettings {
    /// Override the settings with environment variables named `<PREFIX>_ACTIVATE`, `<PREFIX>_PATH`,
    /// `<PREFIX>_PARAMETERS`, `<PREFIX>_WORKING_DIR` and `<PREFIX>_TIMEOUT_SECS`.
    ///
    pub fn with_env_overrides(mut self, config: &Config, prefix: &str) -> Self {
        let key = |name: &str| format!("{}_{}", prefix, name);

        if let Some(activate) = config.get(&key("ACTIVATE")) {
            self.activate = Some(activate.as_str().into());
        }
        if let Some(path) = config.get(&key("PATH")) {
            self.executable_path = Some(path);
        }
        if let Some(parameters) = config.get(&key("PARAMETERS")) {
            self.parameters = Some(parameters);
        }
        if let Some(dir) = config.get(&key("WORKING_DIR")) {
            self.working_dir = Some(PathBuf::from(dir));
        }
        if let Some(secs) = config.get_parsed(&key("TIMEOUT_SECS")) {
            self.timeout_secs = Some(secs);
        }
        self
    }

    /// Returns the configured executable, or `default`.
    ///
    pub fn executable_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.executable_path.as_deref().unwrap_or(default)
    }

    /// Returns the configured parameters, or `default`.
    ///
    pub fn parameters_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.parameters.as_deref().unwrap_or(default)
    }

    /// Build the process definition for the tool.
    ///
    /// # Arguments
    ///
    /// * `default_executable` - The program to run if none is configured.
    /// * `arguments` - The fully assembled argument template.
    ///
    pub fn process(&self, default_executable: &str, arguments: &str) -> ExternalProcess {
        ExternalProcess::new(CommandTemplate::new(self.executable_or(default_executable), arguments))
            .working_dir(self.working_dir.clone())
            .timeout(self.timeout_secs.map(Duration::from_secs))
    }

    /// Decide whether the tool is enabled.
    ///
    pub async fn enabled(&self, default_executable: &str, default_activation: Activation) -> bool {
        self.activate
            .unwrap_or(default_activation)
            .resolve(self.executable_or(default_executable), self.working_dir.as_deref())
            .await
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_activation_from_str() {
        let cases = vec![
            ("true", Activation::Enabled),
            (" TRUE ", Activation::Enabled),
            ("false", Activation::Disabled),
            ("auto", Activation::Auto),
            ("AutoDetect", Activation::Auto),
            ("yes", Activation::Disabled),
            ("", Activation::Disabled),
        ];

        for (value, expected) in cases {
            assert_eq!(Activation::from(value), expected, "parsing '{}'", value);
        }
    }

    #[test]
    fn test_tool_settings_deserialize() {
        let json = r#"{
            "activate": "auto",
            "executable_path": "/opt/ffmpeg/bin/ffmpeg",
            "timeout_secs": 30
        }"#;

        let settings: ToolSettings = serde_json::from_str(json).unwrap();

        assert_eq!(
            settings,
            ToolSettings {
                activate: Some(Activation::Auto),
                executable_path: Some("/opt/ffmpeg/bin/ffmpeg".to_string()),
                parameters: None,
                working_dir: None,
                timeout_secs: Some(30),
            }
        );
    }

    #[test]
    fn test_activation_deserialize_from_bool() {
        let settings: ToolSettings = serde_json::from_str(r#"{ "activate": true }"#).unwrap();

        assert_eq!(settings.activate, Some(Activation::Enabled));
    }

    #[test]
    fn test_defaults() {
        let settings = ToolSettings::default();

        assert_eq!(settings.executable_or("gs"), "gs");
        assert_eq!(settings.parameters_or("-q"), "-q");
        let process = settings.process("gs", "-q ${input}");
        assert_eq!(process.template().executable(), "gs");
    }

    #[tokio::test]
    async fn test_enabled() {
        let settings = ToolSettings {
            activate: Some(Activation::Auto),
            ..Default::default()
        };

        assert!(settings.enabled("sh", Activation::Disabled).await);
        assert!(!settings.enabled("commandthatdoesntexist", Activation::Disabled).await);
        assert!(!ToolSettings::default().enabled("sh", Activation::Disabled).await);
        assert!(ToolSettings::default().enabled("sh", Activation::Enabled).await);
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("PREVIEW_TEST_TOOL_PATH", "/usr/local/bin/tool");
        std::env::set_var("PREVIEW_TEST_TOOL_ACTIVATE", "autodetect");
        std::env::set_var("PREVIEW_TEST_TOOL_TIMEOUT_SECS", "not-a-number");

        let settings = ToolSettings::default().with_env_overrides(&Config, "PREVIEW_TEST_TOOL");

        assert_eq!(settings.executable_path.as_deref(), Some("/usr/local/bin/tool"));
        assert_eq!(settings.activate, Some(Activation::Auto));
        assert_eq!(settings.timeout_secs, None);
    }
}
