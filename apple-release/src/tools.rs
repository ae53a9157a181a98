// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Invocation of the external Apple tools the pipeline drives.

use {
    crate::error::ReleaseError,
    log::debug,
    std::{
        ffi::OsString,
        path::{Path, PathBuf},
    },
};

pub const SECURITY_PATH_ENV_VARIABLE: &str = "APPLE_RELEASE_SECURITY_EXE";
pub const CODESIGN_PATH_ENV_VARIABLE: &str = "APPLE_RELEASE_CODESIGN_EXE";
pub const XCRUN_PATH_ENV_VARIABLE: &str = "APPLE_RELEASE_XCRUN_EXE";

/// Arguments whose following value must never reach logs.
const SECRET_ARGUMENTS: &[&str] = &["--password", "-p"];

/// Find an executable.
///
/// An explicit path in the environment variable `env` wins. Then `PATH` is
/// searched for `name`. Then `default_path` is tried.
pub fn find_tool(env: &str, name: &str, default_path: &str) -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(env) {
        Some(PathBuf::from(path))
    } else if let Ok(path) = which::which(name) {
        Some(path)
    } else {
        let candidate = PathBuf::from(default_path);

        if candidate.exists() {
            Some(candidate)
        } else {
            None
        }
    }
}

/// Captured result of running an external tool to completion.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ToolOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Construct a successful output with the given stdout.
    pub fn ok(stdout: impl ToString) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    /// Construct a failed output with the given stderr.
    pub fn failed(code: i32, stderr: impl ToString) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    /// Raw diagnostic text suitable for surfacing to the operator.
    ///
    /// Tools like `codesign` write diagnostics to stderr, but some `xcrun`
    /// subcommands use stdout. Falls back to describing the exit status.
    pub fn diagnostics(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();

        if !stderr.is_empty() {
            stderr.to_string()
        } else if !stdout.is_empty() {
            stdout.to_string()
        } else {
            match self.code {
                Some(code) => format!("exited with status {}", code),
                None => "terminated by signal".to_string(),
            }
        }
    }
}

/// Render a command line for logging, hiding secret values.
pub fn redacted_command_line(program: &Path, args: &[OsString]) -> String {
    let mut parts = vec![program.display().to_string()];
    let mut hide_next = false;

    for arg in args {
        let arg = arg.to_string_lossy();

        if hide_next {
            parts.push("<redacted>".to_string());
            hide_next = false;
        } else {
            hide_next = SECRET_ARGUMENTS.contains(&arg.as_ref());
            parts.push(arg.to_string());
        }
    }

    parts.join(" ")
}

/// Run a program to completion, capturing its output.
///
/// A non-zero exit is not an error here: callers decide what a failure
/// means. `Err` is only returned if the program could not be run at all.
pub fn run_tool(program: &Path, args: &[OsString]) -> Result<ToolOutput, ReleaseError> {
    debug!("running {}", redacted_command_line(program, args));

    let output = duct::cmd(program, args)
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .run()
        .map_err(|source| ReleaseError::ToolInvocation {
            program: program.display().to_string(),
            source,
        })?;

    Ok(ToolOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_prefers_stderr() {
        let mut output = ToolOutput::failed(1, "  resource fork not allowed\n");
        output.stdout = "ignored".into();
        assert_eq!(output.diagnostics(), "resource fork not allowed");

        let output = ToolOutput {
            success: false,
            code: Some(65),
            stdout: "Processing: invalid".into(),
            stderr: String::new(),
        };
        assert_eq!(output.diagnostics(), "Processing: invalid");

        assert_eq!(
            ToolOutput::failed(3, "").diagnostics(),
            "exited with status 3"
        );
    }

    #[test]
    fn command_line_redaction() {
        let args = ["notarytool", "submit", "--password", "hunter2", "--team-id", "T"]
            .iter()
            .map(OsString::from)
            .collect::<Vec<_>>();

        let rendered = redacted_command_line(Path::new("/usr/bin/xcrun"), &args);
        assert_eq!(
            rendered,
            "/usr/bin/xcrun notarytool submit --password <redacted> --team-id T"
        );
    }

    #[test]
    fn missing_program() {
        let res = run_tool(
            Path::new("/nonexistent/apple-release-test-tool"),
            &[OsString::from("--version")],
        );

        assert!(matches!(res, Err(ReleaseError::ToolInvocation { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn captures_failure() -> Result<(), ReleaseError> {
        let output = run_tool(
            Path::new("/bin/sh"),
            &["-c", "echo out; echo err >&2; exit 7"]
                .iter()
                .map(OsString::from)
                .collect::<Vec<_>>(),
        )?;

        assert!(!output.success);
        assert_eq!(output.code, Some(7));
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.diagnostics(), "err");

        Ok(())
    }
}
