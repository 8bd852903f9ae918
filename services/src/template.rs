use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Formatter;
use std::path::Path;

/// Values substituted into a [`CommandTemplate`], keyed by placeholder name.
///
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateParams {
    values: BTreeMap<String, String>,
}

impl TemplateParams {
    /// Create an empty set of parameters.
    ///
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value for the placeholder `name`.
    ///
    pub fn with(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.values.insert(name.into(), value.to_string());
        self
    }

    /// Add a path for the placeholder `name`.
    ///
    pub fn with_path(mut self, name: impl Into<String>, path: impl AsRef<Path>) -> Self {
        self.values
            .insert(name.into(), path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Returns the value for the placeholder `name`, if any.
    ///
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

/// A command line with `${name}` placeholders, resolved right before each execution.
///
/// The argument string is split into separate arguments first (honouring single and double
/// quotes) and the placeholders are substituted afterwards, so a substituted value containing
/// whitespace stays a single argument.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    executable: String,
    arguments: Vec<String>,
}

impl CommandTemplate {
    /// Create a new template.
    ///
    /// # Arguments
    ///
    /// * `executable` - The program to run, either a name found on the `PATH` or a path.
    /// * `arguments` - The argument string, e.g. `-y -i ${input} ${output}`.
    ///
    pub fn new(executable: impl Into<String>, arguments: impl AsRef<str>) -> Self {
        Self {
            executable: executable.into(),
            arguments: split_arguments(arguments.as_ref()),
        }
    }

    /// Returns the program this template runs.
    ///
    pub fn executable(&self) -> &str {
        &self.executable
    }

    /// Substitute `params` into the template.
    ///
    /// Placeholders without a value are left verbatim.
    ///
    pub fn resolve(&self, params: &TemplateParams) -> ResolvedCommand {
        ResolvedCommand {
            program: self.executable.clone(),
            args: self
                .arguments
                .iter()
                .map(|argument| substitute(argument, params))
                .collect(),
        }
    }
}

/// A program and its arguments, ready to be executed.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    program: String,
    args: Vec<String>,
}

impl ResolvedCommand {
    /// Returns the program to run.
    ///
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Returns the arguments to pass to the program.
    ///
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for ResolvedCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

fn split_arguments(arguments: &str) -> Vec<String> {
    let mut args = vec![];
    let mut current = String::new();
    let mut in_argument = false;
    let mut quote: Option<char> = None;

    for c in arguments.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_argument = true;
            }
            None if c.is_whitespace() => {
                if in_argument {
                    args.push(std::mem::take(&mut current));
                    in_argument = false;
                }
            }
            None => {
                current.push(c);
                in_argument = true;
            }
        }
    }
    if in_argument {
        args.push(current);
    }
    args
}

fn substitute(argument: &str, params: &TemplateParams) -> String {
    let mut resolved = String::with_capacity(argument.len());
    let mut rest = argument;

    while let Some(start) = rest.find("${") {
        resolved.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                match params.get(&after[..end]) {
                    Some(value) => resolved.push_str(value),
                    None => resolved.push_str(&rest[start..start + end + 3]),
                }
                rest = &after[end + 1..];
            }
            None => {
                resolved.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    resolved.push_str(rest);
    resolved
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const FFMPEG_TEMPLATE: &str =
        "-y -itsoffset ${offset} -i ${input} -vcodec mjpeg -vframes 1 -an -f rawvideo -s ${size} ${output}";

    #[test]
    fn test_resolve_video_thumbnail_command() {
        let params = TemplateParams::new()
            .with("offset", 5)
            .with_path("input", "/tmp/a.mp4")
            .with_path("output", "/tmp/b.jpg")
            .with("size", "320x240");

        let command = CommandTemplate::new("ffmpeg", FFMPEG_TEMPLATE).resolve(&params);
        let line = command.to_string();

        assert!(line.contains("-itsoffset 5"));
        assert!(line.contains("-i /tmp/a.mp4"));
        assert!(line.contains("-s 320x240"));
        assert!(line.ends_with("/tmp/b.jpg"));
        assert_eq!(command.program(), "ffmpeg");
    }

    #[test]
    fn test_substituted_path_with_spaces_stays_one_argument() {
        let params = TemplateParams::new()
            .with_path("input", "/tmp/my documents/report.pdf")
            .with_path("output", "/tmp/out.swf");

        let command = CommandTemplate::new("pdf2swf", "${input} -o ${output}").resolve(&params);

        assert_eq!(
            command.args(),
            &["/tmp/my documents/report.pdf", "-o", "/tmp/out.swf"]
        );
    }

    #[test]
    fn test_quoted_arguments() {
        let command = CommandTemplate::new("sh", r#"-c "echo 'a b'" 'single quoted'"#)
            .resolve(&TemplateParams::new());

        assert_eq!(command.args(), &["-c", "echo 'a b'", "single quoted"]);
    }

    #[test]
    fn test_unknown_and_unterminated_placeholders_are_kept() {
        let params = TemplateParams::new().with("page", 3);

        let command = CommandTemplate::new("gs", "-dFirstPage=${page} ${missing} ${broken")
            .resolve(&params);

        assert_eq!(command.args(), &["-dFirstPage=3", "${missing}", "${broken"]);
    }

    #[test]
    fn test_template_is_resolved_fresh_each_time() {
        let template = CommandTemplate::new("ffmpeg", "-i ${input}");

        let first = template.resolve(&TemplateParams::new().with("input", "a.mp4"));
        let second = template.resolve(&TemplateParams::new().with("input", "b.mp4"));

        assert_eq!(first.to_string(), "ffmpeg -i a.mp4");
        assert_eq!(second.to_string(), "ffmpeg -i b.mp4");
    }

    #[test]
    fn test_empty_arguments() {
        let command = CommandTemplate::new("pwd", "   ").resolve(&TemplateParams::new());

        assert!(command.args().is_empty());
        assert_eq!(command.to_string(), "pwd");
    }
}
