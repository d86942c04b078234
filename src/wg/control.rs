//! Live interface control through the WireGuard tools
//!
//! Uses `wg`, `wg-quick` and `systemctl`. Each call is a short-lived child
//! process; a missing binary or a non-zero exit is reported immediately.

use crate::config::{InterfaceConfig, ReloadStrategy};
use std::io::{self, Write};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Failed to execute {command}: {source}")]
    SpawnError { command: String, source: io::Error },
    #[error("Command `{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
    #[error("Unexpected output from {command}: {reason}")]
    BadOutput { command: String, reason: String },
}

/// Operations on the live peer table
pub trait InterfaceControl: Send + Sync {
    fn add_peer(&self, public_key: &str, address: Ipv4Addr) -> Result<(), ControlError>;
    /// Removing a peer the interface does not know is not an error.
    fn remove_peer(&self, public_key: &str) -> Result<(), ControlError>;
    /// Raw `wg show <iface> dump` output
    fn dump(&self) -> Result<String, ControlError>;
    /// Make the live interface match the config file at `config_path`
    fn reload(&self, config_path: &Path) -> Result<(), ControlError>;
}

/// `InterfaceControl` backed by the `wg` command-line tools
pub struct WgCommand {
    interface: String,
    strategy: ReloadStrategy,
    wg_path: PathBuf,
}

impl WgCommand {
    pub fn new(interface: impl Into<String>, strategy: ReloadStrategy) -> Self {
        Self {
            interface: interface.into(),
            strategy,
            wg_path: PathBuf::from("wg"),
        }
    }

    pub fn from_config(config: &InterfaceConfig) -> Self {
        Self::new(config.name.clone(), config.reload)
    }

    /// Use a specific `wg` binary instead of the one on `PATH`
    pub fn with_wg_path(mut self, wg_path: impl Into<PathBuf>) -> Self {
        self.wg_path = wg_path.into();
        self
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    fn wg(&self, args: &[&str]) -> Result<String, ControlError> {
        run(Command::new(&self.wg_path).args(args), "wg", args, None)
    }

    fn syncconf(&self, config_path: &Path) -> Result<(), ControlError> {
        let path = config_path.to_string_lossy().into_owned();
        let args = ["strip", path.as_str()];
        let stripped = run(Command::new("wg-quick").args(args), "wg-quick", &args, None)?;

        // wg syncconf wants a file; the stripped config carries the private key
        let mut file = tempfile::NamedTempFile::new().map_err(|source| ControlError::SpawnError {
            command: "wg syncconf".to_string(),
            source,
        })?;
        file.write_all(stripped.as_bytes())
            .map_err(|source| ControlError::SpawnError {
                command: "wg syncconf".to_string(),
                source,
            })?;

        let tmp = file.path().to_string_lossy().into_owned();
        self.wg(&["syncconf", self.interface.as_str(), tmp.as_str()])?;
        Ok(())
    }

    fn restart(&self) -> Result<(), ControlError> {
        let unit = format!("wg-quick@{}", self.interface);
        let args = ["restart", unit.as_str()];
        run(Command::new("systemctl").args(args), "systemctl", &args, None)?;
        Ok(())
    }
}

impl InterfaceControl for WgCommand {
    fn add_peer(&self, public_key: &str, address: Ipv4Addr) -> Result<(), ControlError> {
        let allowed = format!("{}/32", address);
        self.wg(&[
            "set",
            self.interface.as_str(),
            "peer",
            public_key,
            "allowed-ips",
            allowed.as_str(),
        ])?;
        Ok(())
    }

    fn remove_peer(&self, public_key: &str) -> Result<(), ControlError> {
        self.wg(&["set", self.interface.as_str(), "peer", public_key, "remove"])?;
        Ok(())
    }

    fn dump(&self) -> Result<String, ControlError> {
        self.wg(&["show", self.interface.as_str(), "dump"])
    }

    fn reload(&self, config_path: &Path) -> Result<(), ControlError> {
        debug!(
            "Reloading {} from {} ({:?})",
            self.interface,
            config_path.display(),
            self.strategy
        );
        match self.strategy {
            ReloadStrategy::Syncconf => self.syncconf(config_path),
            ReloadStrategy::Restart => self.restart(),
        }
    }
}

/// Run a command, optionally feeding `stdin`, and return its stdout.
pub(crate) fn run(
    command: &mut Command,
    name: &str,
    args: &[&str],
    stdin: Option<&str>,
) -> Result<String, ControlError> {
    let shown = format!("{} {}", name, args.join(" "));
    trace!(cmd = %shown, "Executing command");

    let spawn_error = |source: io::Error| ControlError::SpawnError {
        command: name.to_string(),
        source,
    };

    let output: Output = match stdin {
        None => command.output().map_err(spawn_error)?,
        Some(input) => {
            let mut child = command
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(spawn_error)?;
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input.as_bytes()).map_err(spawn_error)?;
            }
            child.wait_with_output().map_err(spawn_error)?
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(ControlError::CommandFailed {
            command: shown,
            stderr,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_error_display() {
        let err = ControlError::CommandFailed {
            command: "wg show wg0 dump".to_string(),
            stderr: "Unable to access interface: No such device".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Command `wg show wg0 dump` failed: Unable to access interface: No such device"
        );
    }

    #[test]
    fn test_wg_command_from_config() {
        let config = crate::config::Config::default();
        let control = WgCommand::from_config(&config.interface);
        assert_eq!(control.interface(), "wg0");
    }

    #[test]
    fn test_missing_binary_is_spawn_error() {
        let control = WgCommand::new("wg0", ReloadStrategy::Syncconf)
            .with_wg_path("/nonexistent/bin/wg-does-not-exist");

        let result = control.dump();

        assert!(matches!(result, Err(ControlError::SpawnError { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_captures_stdout_and_stdin() {
        let out = run(&mut Command::new("cat"), "cat", &[], Some("hello")).unwrap();
        assert_eq!(out, "hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_reports_failure() {
        let result = run(&mut Command::new("false"), "false", &[], None);
        assert!(matches!(result, Err(ControlError::CommandFailed { .. })));
    }
}
