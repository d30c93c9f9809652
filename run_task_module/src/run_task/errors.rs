use std::fmt;
use std::io;
use std::path::PathBuf;

#[derive(Debug)]
pub enum RunTaskError {
    Io(io::Error),
    EmptyCommand,
    CommandNotFound {
        program: PathBuf,
    },
    CommandTimeout {
        command: String,
        timeout_secs: u64,
        output: String,
    },
    CommandFailed {
        command: String,
        status: Option<i32>,
        output: String,
    },
    LogWrite {
        path: PathBuf,
        source: io::Error,
    },
}

impl fmt::Display for RunTaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunTaskError::Io(err) => write!(f, "I/O error: {}", err),
            RunTaskError::EmptyCommand => write!(f, "No command given to run."),
            RunTaskError::CommandNotFound { program } => {
                write!(f, "Command not found: {}", program.display())
            }
            RunTaskError::CommandTimeout {
                command,
                timeout_secs,
                output,
            } => write!(
                f,
                "{} timed out after {}s and was killed. Output tail:\n{}",
                command, timeout_secs, output
            ),
            RunTaskError::CommandFailed {
                command,
                status,
                output,
            } => write!(
                f,
                "{} failed (status: {:?}). Output tail:\n{}",
                command, status, output
            ),
            RunTaskError::LogWrite { path, source } => {
                write!(f, "Failed to write log file {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for RunTaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunTaskError::Io(err) => Some(err),
            RunTaskError::LogWrite { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for RunTaskError {
    fn from(err: io::Error) -> Self {
        RunTaskError::Io(err)
    }
}

impl RunTaskError {
    /// Exit status of the child when it ran to completion.
    pub fn exit_status(&self) -> Option<i32> {
        match self {
            RunTaskError::CommandFailed { status, .. } => *status,
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RunTaskError::CommandTimeout { .. })
    }
}
