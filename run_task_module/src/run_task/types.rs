use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RunJobParams {
    /// Short name used in log lines and error messages.
    pub label: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
    pub timeout: Duration,
    /// When set, stdout and stderr of the run are appended here.
    pub log_path: Option<PathBuf>,
}

impl RunJobParams {
    pub fn new(label: impl Into<String>, program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            envs: Vec::new(),
            timeout,
            log_path: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct RunJobOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}
