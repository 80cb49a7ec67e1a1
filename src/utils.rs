use std::{
    fs,
    io::IsTerminal,
    os::unix::fs::PermissionsExt,
    path::Path,
    process::Stdio,
    time::Duration,
};

use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use tokio::process::Command;

use crate::error::{NodeError, Result};

const ERROR_OUTPUT_LINES: usize = 10;

#[derive(Debug)]
pub struct CommandResult {
    pub output: String,
    pub exit_status: i32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

fn command_line(program: &str, args: &[&str]) -> String {
    shell_words::join(std::iter::once(program).chain(args.iter().copied()))
}

/// Run a command to completion, capturing stdout and stderr together.
pub async fn execute(program: &str, args: &[&str]) -> Result<CommandResult> {
    let line = command_line(program, args);
    debug!("Executing: {}", line);

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| NodeError::Backend(format!("Failed to run '{}': {}", line, e)))?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    Ok(CommandResult {
        output: text,
        exit_status: output.status.code().unwrap_or(-1),
    })
}

/// Run a command and turn a non-zero exit into a backend error.
pub async fn execute_checked(program: &str, args: &[&str]) -> Result<CommandResult> {
    let result = execute(program, args).await?;
    if !result.success() {
        return Err(NodeError::Backend(format!(
            "'{}' exited with status {}: {}",
            command_line(program, args),
            result.exit_status,
            truncate_error_message(result.output.trim(), ERROR_OUTPUT_LINES)
        )));
    }
    Ok(result)
}

/// Run a command attached to the current terminal (e.g. following logs).
pub async fn execute_attached(program: &str, args: &[&str]) -> Result<()> {
    let line = command_line(program, args);
    debug!("Executing attached: {}", line);

    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|e| NodeError::Backend(format!("Failed to run '{}': {}", line, e)))?;

    if !status.success() {
        return Err(NodeError::Backend(format!(
            "'{}' exited with status {}",
            line,
            status.code().unwrap_or(-1)
        )));
    }
    Ok(())
}

pub fn create_file(path: &Path, content: &str, mode: Option<u32>) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent, None)?;
    }
    fs::write(path, content).map_err(|e| {
        NodeError::Backend(format!("Failed to write {}: {}", path.display(), e))
    })?;
    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| {
            NodeError::Backend(format!("Failed to chmod {}: {}", path.display(), e))
        })?;
    }
    Ok(())
}

/// `mkdir -p`; an existing directory is fine.
pub fn create_dir(path: &Path, mode: Option<u32>) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| {
        NodeError::Backend(format!("Failed to create {}: {}", path.display(), e))
    })?;
    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| {
            NodeError::Backend(format!("Failed to chmod {}: {}", path.display(), e))
        })?;
    }
    Ok(())
}

/// `rm -rf`; a missing directory is fine.
pub fn remove_dir(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(NodeError::Backend(format!(
            "Failed to remove {}: {}",
            path.display(),
            e
        ))),
    }
}

pub fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(NodeError::Backend(format!(
            "Failed to remove {}: {}",
            path.display(),
            e
        ))),
    }
}

pub async fn daemon_reload() -> Result<CommandResult> {
    execute_checked("systemctl", &["daemon-reload"]).await
}

pub async fn enable_service(service: &str) -> Result<CommandResult> {
    execute_checked("systemctl", &["enable", service]).await
}

pub async fn disable_service(service: &str) -> Result<CommandResult> {
    execute("systemctl", &["disable", service]).await
}

pub async fn start_service(service: &str) -> Result<CommandResult> {
    execute_checked("systemctl", &["start", service]).await
}

pub async fn stop_service(service: &str) -> Result<CommandResult> {
    execute_checked("systemctl", &["stop", service]).await
}

pub async fn restart_service(service: &str) -> Result<CommandResult> {
    execute_checked("systemctl", &["restart", service]).await
}

pub async fn service_is_active(service: &str) -> Result<bool> {
    let result = execute("systemctl", &["is-active", "--quiet", service]).await?;
    Ok(result.success())
}

/// Main PID of a unit; `None` when the unit is not running.
pub async fn service_main_pid(service: &str) -> Result<Option<u32>> {
    let result = execute("systemctl", &["show", "--property=MainPID", "--value", service]).await?;
    if !result.success() {
        return Ok(None);
    }
    Ok(result
        .output
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|pid| *pid != 0))
}

/// Spinner for a slow step; hidden when stderr is not a terminal.
pub fn spinner(message: String) -> ProgressBar {
    if !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Truncate error message to a reasonable number of lines for display
pub fn truncate_error_message(message: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = message.lines().collect();
    if lines.len() <= max_lines {
        message.to_string()
    } else {
        let truncated_lines = &lines[..max_lines];
        format!(
            "{}\n... (truncated {} more lines)",
            truncated_lines.join("\n"),
            lines.len() - max_lines
        )
    }
}
