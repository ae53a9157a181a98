// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Local verification of freshly applied signatures.
//!
//! An invalid local signature is always rejected by the notary service, so
//! this runs before anything is uploaded.

use {
    crate::{error::ReleaseError, signing::CodeSignTool},
    log::{info, warn},
    std::path::Path,
};

pub struct SignatureVerifier<'a> {
    tool: &'a dyn CodeSignTool,
}

impl<'a> SignatureVerifier<'a> {
    pub fn new(tool: &'a dyn CodeSignTool) -> Self {
        Self { tool }
    }

    /// Strictly verify every signature in `path`, including nested code.
    pub fn verify(&self, path: &Path) -> Result<(), ReleaseError> {
        info!("verifying signatures in {}", path.display());

        let output = self.tool.verify(path).map_err(|e| ReleaseError::Verify {
            path: path.to_path_buf(),
            diagnostics: e.to_string(),
        })?;

        if output.success {
            info!("{} signature valid", path.display());
            Ok(())
        } else {
            for line in output.diagnostics().lines() {
                warn!("codesign> {}", line);
            }

            Err(ReleaseError::Verify {
                path: path.to_path_buf(),
                diagnostics: output.diagnostics(),
            })
        }
    }
}
