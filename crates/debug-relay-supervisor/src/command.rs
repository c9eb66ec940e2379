//! Runner command parsing.

use std::collections::HashMap;

use debug_relay_core::LaunchSpec;
use thiserror::Error;

use crate::resolve::resolve_executable_path;

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Runner command cannot be parsed: {0}")]
    InvalidBase(String),
    #[error("Runner command is empty after parsing")]
    EmptyCommand,
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),
}

/// Parsed command parts (program + args).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParts {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandParts {
    /// Split a runner command line such as `actrun --verbose`.
    ///
    /// # Errors
    /// Returns error if the line has unbalanced quotes or no program.
    pub fn parse(command_line: &str) -> Result<Self, CommandBuildError> {
        let mut parts = split_command_line(command_line)?;
        if parts.is_empty() {
            return Err(CommandBuildError::EmptyCommand);
        }
        let program = parts.remove(0);
        Ok(Self {
            program,
            args: parts,
        })
    }

    /// Attach the runner environment without resolving the program.
    ///
    /// Lookup is left to the spawn itself.
    #[must_use]
    pub fn with_env(self, env: HashMap<String, String>) -> LaunchSpec {
        LaunchSpec {
            program: self.program.into(),
            args: self.args,
            env,
        }
    }

    /// Resolve the program on `PATH` and attach the runner environment.
    ///
    /// # Errors
    /// Returns error if the executable cannot be found.
    pub async fn into_launch_spec(
        self,
        env: HashMap<String, String>,
    ) -> Result<LaunchSpec, CommandBuildError> {
        let Self { program, args } = self;
        let executable = resolve_executable_path(&program)
            .await
            .ok_or(CommandBuildError::ExecutableNotFound(program))?;
        Ok(LaunchSpec {
            program: executable,
            args,
            env,
        })
    }
}

fn split_command_line(input: &str) -> Result<Vec<String>, CommandBuildError> {
    #[cfg(windows)]
    {
        let parts = winsplit::split(input);
        if parts.is_empty() {
            Err(CommandBuildError::EmptyCommand)
        } else {
            Ok(parts)
        }
    }

    #[cfg(not(windows))]
    {
        shlex::split(input).ok_or_else(|| CommandBuildError::InvalidBase(input.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_splits_words() {
        let parts = CommandParts::parse("actrun --config 'my file.yml'").unwrap();
        assert_eq!(parts.program, "actrun");
        assert_eq!(parts.args, vec!["--config", "my file.yml"]);
    }

    #[test]
    fn test_parse_rejects_empty_and_unbalanced() {
        assert!(matches!(
            CommandParts::parse("   "),
            Err(CommandBuildError::EmptyCommand)
        ));
        #[cfg(not(windows))]
        assert!(matches!(
            CommandParts::parse("actrun 'unterminated"),
            Err(CommandBuildError::InvalidBase(_))
        ));
    }

    #[test]
    fn test_with_env_keeps_program_verbatim() {
        let spec = CommandParts::parse("actrun --verbose")
            .unwrap()
            .with_env(HashMap::new());
        assert_eq!(spec.program, std::path::PathBuf::from("actrun"));
        assert_eq!(spec.args, vec!["--verbose"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_into_launch_spec_resolves_program() {
        let env = HashMap::from([("ACT_NOCOLOR".to_string(), "true".to_string())]);
        let spec = CommandParts::parse("sh -c true")
            .unwrap()
            .into_launch_spec(env)
            .await
            .unwrap();

        assert!(spec.program.is_absolute());
        assert_eq!(spec.args, vec!["-c", "true"]);
        assert_eq!(spec.env.get("ACT_NOCOLOR").map(String::as_str), Some("true"));
    }

    #[tokio::test]
    async fn test_into_launch_spec_missing_program() {
        let result = CommandParts::parse("definitely-not-a-real-runner-binary")
            .unwrap()
            .into_launch_spec(HashMap::new())
            .await;
        assert!(matches!(result, Err(CommandBuildError::ExecutableNotFound(_))));
    }
}
