//! Local process invocation

use std::fmt;
use std::process::Stdio;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::errors::DeployError;

/// A command line to run on a remote device
#[derive(Clone)]
pub struct RemoteCommand {
    line: String,
    stdin: Option<SecretString>,
}

impl RemoteCommand {
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            stdin: None,
        }
    }

    /// Feed `secret` to the command's standard input instead of its arguments.
    pub fn with_stdin(mut self, secret: SecretString) -> Self {
        self.stdin = Some(secret);
        self
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn stdin(&self) -> Option<&SecretString> {
        self.stdin.as_ref()
    }

    /// Prefix the command with `cd <dir> &&` so it runs as one invocation.
    pub fn in_dir(&self, working_dir: Option<&str>) -> RemoteCommand {
        match working_dir {
            Some(dir) => RemoteCommand {
                line: format!("cd {} && {}", crate::utils::shell_quote(dir), self.line),
                stdin: self.stdin.clone(),
            },
            None => self.clone(),
        }
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line)
    }
}

impl fmt::Debug for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCommand")
            .field("line", &self.line)
            .field("stdin", &self.stdin.is_some())
            .finish()
    }
}

impl From<&str> for RemoteCommand {
    fn from(line: &str) -> Self {
        RemoteCommand::new(line)
    }
}

impl From<String> for RemoteCommand {
    fn from(line: String) -> Self {
        RemoteCommand::new(line)
    }
}

/// A local program invocation
#[derive(Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, SecretString)>,
    /// Written to the process's standard input, which is otherwise null
    pub stdin: Option<SecretString>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an environment variable; values are always treated as secret
    pub fn env(mut self, key: impl Into<String>, value: SecretString) -> Self {
        self.env.push((key.into(), value));
        self
    }

    pub fn stdin(mut self, stdin: Option<SecretString>) -> Self {
        self.stdin = stdin;
        self
    }

    /// The last argument, which for ssh invocations is the remote command line
    pub fn last_arg(&self) -> Option<&str> {
        self.args.last().map(String::as_str)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", crate::utils::shell_quote(arg))?;
        }
        Ok(())
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("Invocation")
            .field("command", &self.to_string())
            .field("env", &env_keys)
            .field("stdin", &self.stdin.is_some())
            .finish()
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status; -1 when the process was killed by a signal
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

/// Runs local processes; the seam every remote operation goes through
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `invocation` to completion and capture its output.
    ///
    /// An `Err` means the process could not be started at all.
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, DeployError>;
}

/// Production runner backed by `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, DeployError> {
        debug!("Running: {}", invocation);

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &invocation.env {
            command.env(key, value.expose_secret());
        }

        let transport = |e: std::io::Error| {
            DeployError::TransportError(format!("Failed to run {}: {}", invocation.program, e))
        };
        let mut child = command.spawn().map_err(transport)?;
        if let (Some(secret), Some(mut pipe)) = (&invocation.stdin, child.stdin.take()) {
            pipe.write_all(secret.expose_secret().as_bytes())
                .await
                .map_err(transport)?;
            // Closing the pipe signals end of input
            drop(pipe);
        }
        let output = child.wait_with_output().await.map_err(transport)?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
