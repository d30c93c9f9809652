use chrono::Local;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use super::errors::RunTaskError;

pub(super) fn append_run_log(
    path: &Path,
    label: &str,
    status_line: &str,
    stdout: &str,
    stderr: &str,
) -> Result<(), RunTaskError> {
    write_log(path, label, status_line, stdout, stderr).map_err(|source| {
        RunTaskError::LogWrite {
            path: path.to_path_buf(),
            source,
        }
    })
}

fn write_log(
    path: &Path,
    label: &str,
    status_line: &str,
    stdout: &str,
    stderr: &str,
) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    writeln!(file, "=== {} {} ({}) ===", timestamp, label, status_line)?;
    if !stdout.trim().is_empty() {
        writeln!(file, "--- stdout ---")?;
        writeln!(file, "{}", stdout.trim_end())?;
    }
    if !stderr.trim().is_empty() {
        writeln!(file, "--- stderr ---")?;
        writeln!(file, "{}", stderr.trim_end())?;
    }
    Ok(())
}
