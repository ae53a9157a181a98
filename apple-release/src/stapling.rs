// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Attaching notarization tickets to bundles.

Once a submission is accepted, Apple publishes a ticket for the signed
code. Gatekeeper can fetch that ticket online on first launch. Stapling
embeds the ticket in the bundle so verification also works offline.
*/

use {
    crate::{
        bundle::Bundle,
        error::ReleaseError,
        tools::{find_tool, run_tool, ToolOutput, XCRUN_PATH_ENV_VARIABLE},
    },
    log::{info, warn},
    std::{
        ffi::OsString,
        path::{Path, PathBuf},
    },
};

/// Interface to a ticket stapling tool.
pub trait StapleTool {
    /// Fetch the ticket for `path` and embed it.
    fn staple(&self, path: &Path) -> Result<ToolOutput, ReleaseError>;

    /// Check that `path` carries a valid ticket.
    fn validate(&self, path: &Path) -> Result<ToolOutput, ReleaseError>;
}

/// [StapleTool] backed by `xcrun stapler`.
pub struct StaplerCli {
    xcrun_exe: Option<PathBuf>,
}

impl StaplerCli {
    pub fn new() -> Self {
        Self {
            xcrun_exe: find_tool(XCRUN_PATH_ENV_VARIABLE, "xcrun", "/usr/bin/xcrun"),
        }
    }

    fn run(&self, action: &str, path: &Path) -> Result<ToolOutput, ReleaseError> {
        let exe = self
            .xcrun_exe
            .as_ref()
            .ok_or(ReleaseError::ToolNotFound("xcrun", XCRUN_PATH_ENV_VARIABLE))?;

        run_tool(
            exe,
            &[
                OsString::from("stapler"),
                OsString::from(action),
                path.as_os_str().to_os_string(),
            ],
        )
    }
}

impl Default for StaplerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl StapleTool for StaplerCli {
    fn staple(&self, path: &Path) -> Result<ToolOutput, ReleaseError> {
        self.run("staple", path)
    }

    fn validate(&self, path: &Path) -> Result<ToolOutput, ReleaseError> {
        self.run("validate", path)
    }
}

pub struct Stapler<'a> {
    tool: &'a dyn StapleTool,
}

impl<'a> Stapler<'a> {
    pub fn new(tool: &'a dyn StapleTool) -> Self {
        Self { tool }
    }

    /// Staple the notarization ticket to a bundle and validate the result.
    ///
    /// Any failure, including the tool being unavailable, is reported as
    /// [ReleaseError::Staple].
    pub fn staple(&self, bundle: &Bundle) -> Result<(), ReleaseError> {
        let path = bundle.root();

        let check = |output: Result<ToolOutput, ReleaseError>| match output {
            Ok(output) if output.success => Ok(()),
            Ok(output) => Err(ReleaseError::Staple {
                path: path.to_path_buf(),
                diagnostics: output.diagnostics(),
            }),
            Err(e) => Err(ReleaseError::Staple {
                path: path.to_path_buf(),
                diagnostics: e.to_string(),
            }),
        };

        info!("stapling notarization ticket to {}", path.display());
        check(self.tool.staple(path))?;

        info!("validating stapled ticket");
        check(self.tool.validate(path)).map_err(|e| {
            warn!("stapled ticket failed validation");
            e
        })?;

        warn!("{} has a stapled notarization ticket", path.display());

        Ok(())
    }
}
