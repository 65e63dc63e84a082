//! Interface to the Android Debug Bridge (`adb`).
//!
//! [`DeviceChannel`] is the seam between the automation logic and the
//! process that talks to the device: implementors only need to run one `adb`
//! invocation and to pause for a settle delay. [`Adb`] is the real
//! implementation, spawning the `adb` executable for every call.
//!
//! This module also hosts the parsers for the text that `adb shell` tools
//! print (`wm size`, `dumpsys`, `getprop`, ...). They are exposed so they can
//! be tested without a device.
//!
//! # Example
//!
//! ```no_run
//! use andromate_core::adb::{Adb, DeviceChannel};
//!
//! let adb = Adb::new("adb");
//! let size = adb.shell("wm size").unwrap();
//! println!("{}", size);
//! ```

use std::process::Command;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::AndromateConfig;
use crate::element::BoundsError;
use crate::hierarchy::{HierarchyError, Selector};

/// Errors that can occur when driving a device.
#[derive(Error, Debug)]
pub enum AdbError {
    /// An `adb` invocation exited with a non-zero status.
    #[error("`adb {command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// The `adb` executable could not be started.
    #[error("adb not found - install the Android SDK platform-tools or set adb_path")]
    NotInstalled,

    /// Output from the device did not have the expected shape.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// A view required to perform the operation is not on screen.
    #[error("No view with {selector} containing '{value}'")]
    ViewNotFound { selector: Selector, value: String },

    /// The runtime permission prompt never appeared or could not be tapped.
    #[error("Permission prompt not shown")]
    PermissionPromptMissing,

    /// A view's bounds attribute is corrupt.
    #[error(transparent)]
    Bounds(#[from] BoundsError),

    /// An I/O error occurred while executing the command.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<HierarchyError> for AdbError {
    fn from(e: HierarchyError) -> Self {
        AdbError::MalformedResponse(e.to_string())
    }
}

/// Captured result of one `adb` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` if the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl CommandOutput {
    /// A successful output with the given stdout, mostly useful for fakes.
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed output with the given stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            stdout: Vec::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Stdout decoded lossily, with trailing whitespace removed.
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim_end().to_string()
    }
}

/// The device control channel.
///
/// Only [`run`](DeviceChannel::run) and [`settle`](DeviceChannel::settle) are
/// required; the other methods are built on top of them. [`now`](DeviceChannel::now)
/// defaults to the wall clock.
pub trait DeviceChannel {
    /// Runs `adb <args>` and captures its output, whatever the exit status.
    fn run(&self, args: &[&str]) -> Result<CommandOutput, AdbError>;

    /// Blocks for `duration`, letting the device settle after an input.
    fn settle(&self, duration: Duration);

    /// Monotonic clock that wait deadlines are measured against.
    fn now(&self) -> Instant {
        Instant::now()
    }

    /// Runs `adb <args>` and fails with [`AdbError::CommandFailed`] on a
    /// non-zero exit status.
    fn checked(&self, args: &[&str]) -> Result<CommandOutput, AdbError> {
        let output = self.run(args)?;
        if !output.success() {
            return Err(AdbError::CommandFailed {
                command: args.join(" "),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    /// Runs a checked `adb <args>` and returns its stdout as text.
    fn adb(&self, args: &[&str]) -> Result<String, AdbError> {
        Ok(self.checked(args)?.stdout_text())
    }

    /// Runs a checked `adb shell <command>` and returns its stdout as text.
    fn shell(&self, command: &str) -> Result<String, AdbError> {
        self.adb(&["shell", command])
    }

    /// Runs a checked `adb exec-out <command>` and returns raw stdout bytes.
    fn exec_out(&self, command: &str) -> Result<Vec<u8>, AdbError> {
        Ok(self.checked(&["exec-out", command])?.stdout)
    }
}

/// Process-backed [`DeviceChannel`] that shells out to `adb`.
#[derive(Debug, Clone)]
pub struct Adb {
    path: String,
    serial: Option<String>,
}

impl Adb {
    /// Creates a channel using the given `adb` executable, targeting the only
    /// attached device.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            serial: None,
        }
    }

    /// Creates a channel from the `adb_path` and `serial` settings.
    pub fn from_config(config: &AndromateConfig) -> Self {
        Self {
            path: config.adb_path.clone(),
            serial: config.serial.clone(),
        }
    }

    /// Targets a specific device serial (`adb -s`).
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// Check if the configured `adb` can be executed.
    pub fn is_installed(&self) -> bool {
        Command::new(&self.path)
            .arg("version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

impl DeviceChannel for Adb {
    fn run(&self, args: &[&str]) -> Result<CommandOutput, AdbError> {
        let mut command = Command::new(&self.path);
        if let Some(serial) = &self.serial {
            command.args(["-s", serial.as_str()]);
        }
        debug!(args = ?args, serial = ?self.serial, "adb");

        let output = command.args(args).output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AdbError::NotInstalled
            } else {
                AdbError::Io(e)
            }
        })?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn settle(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Display size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: i32,
    pub height: i32,
}

/// Foreground package and activity, as reported by `dumpsys activity top`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopActivity {
    pub package: String,
    /// Activity class name with any leading `.` removed.
    pub activity: String,
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("pattern is valid"))
}

/// Parses `wm size` output.
///
/// An `Override size:` line takes precedence over `Physical size:`.
pub fn parse_screen_size(output: &str) -> Result<ScreenSize, AdbError> {
    static SIZE_RE: OnceLock<Regex> = OnceLock::new();
    let re = regex(&SIZE_RE, r"(?m)^\s*(Physical|Override) size:\s*(\d+)x(\d+)");

    let mut size = None;
    for caps in re.captures_iter(output) {
        let parsed = ScreenSize {
            width: parse_int(&caps[2], output)?,
            height: parse_int(&caps[3], output)?,
        };
        if &caps[1] == "Override" || size.is_none() {
            size = Some(parsed);
        }
    }
    size.ok_or_else(|| malformed("wm size", output))
}

/// Extracts `displayHeight=N` from `dumpsys window` output, if present.
pub fn parse_display_height(output: &str) -> Option<i32> {
    static HEIGHT_RE: OnceLock<Regex> = OnceLock::new();
    regex(&HEIGHT_RE, r"displayHeight=(\d+)")
        .captures(output)
        .and_then(|caps| caps[1].parse().ok())
}

/// Parses the last `ACTIVITY` line of `dumpsys activity top`.
pub fn parse_top_activity(output: &str) -> Result<TopActivity, AdbError> {
    static ACTIVITY_RE: OnceLock<Regex> = OnceLock::new();
    let re = regex(&ACTIVITY_RE, r"ACTIVITY\s+([^/\s]+)/(\S+)");

    let line = output
        .lines()
        .filter(|l| l.contains("ACTIVITY"))
        .last()
        .ok_or_else(|| malformed("dumpsys activity top", output))?;
    let caps = re
        .captures(line)
        .ok_or_else(|| malformed("dumpsys activity top", line))?;

    Ok(TopActivity {
        package: caps[1].trim().to_string(),
        activity: caps[2].trim().trim_start_matches('.').to_string(),
    })
}

/// Parses `getprop ro.build.version.sdk`.
pub fn parse_api_level(output: &str) -> Result<u32, AdbError> {
    output
        .trim()
        .parse()
        .map_err(|_| malformed("getprop ro.build.version.sdk", output))
}

/// Splits `ls -a` output into names, dropping `.` and `..`.
pub fn parse_ls(output: &str) -> Vec<String> {
    output
        .split_whitespace()
        .filter(|name| !name.chars().all(|c| c == '.'))
        .map(String::from)
        .collect()
}

/// Parses `cmd connectivity airplane-mode` output.
pub fn parse_airplane_mode(output: &str) -> Result<bool, AdbError> {
    match output.trim() {
        "enabled" => Ok(true),
        "disabled" => Ok(false),
        other => Err(malformed("cmd connectivity airplane-mode", other)),
    }
}

fn parse_int(digits: &str, context: &str) -> Result<i32, AdbError> {
    digits
        .parse()
        .map_err(|_| AdbError::MalformedResponse(format!("integer out of range in '{}'", context.trim())))
}

fn malformed(source: &str, output: &str) -> AdbError {
    AdbError::MalformedResponse(format!("unexpected `{}` output: '{}'", source, output.trim()))
}
