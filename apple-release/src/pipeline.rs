// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The release pipeline.

A release moves through these states:

```text
Built -> Assembled -> Unsigned ---------------------------------> Packaged
                   -> Signed -> Verified -> NotNotarized -------> Packaged
                                         -> Submitted -> Accepted -> Packaged
                                                      -> Rejected (abort)
```

Signing happens only if a signing identity is available. Notarization
happens only if the bundle was signed and credentials are configured.
Missing optional inputs degrade the [TrustLevel] of the result. Any other
failure aborts the run with an error naming the stage that failed, and the
bundle is removed from the output directory.
*/

use {
    crate::{
        artifact::Artifact,
        bundle::{Bundle, BundleAssembler},
        config::ReleaseConfig,
        error::{ReleaseError, Stage},
        identity::{IdentityResolver, IdentityStore, SecurityIdentityStore},
        notarization::{
            notarization_archive_path, remove_stale_archive, NotaryService, Notarizer,
            NotarytoolCli,
        },
        packaging::{Packager, ReleaseReport, TrustLevel},
        signing::{CodeSignTool, CodesignCli, Signer},
        stapling::{StapleTool, Stapler, StaplerCli},
        verify::SignatureVerifier,
    },
    log::{info, warn},
    std::path::{Path, PathBuf},
};

/// What a release run has achieved so far.
///
/// Flags only ever go from `false` to `true` within a run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReleaseState {
    signed: bool,
    verified: bool,
    notarized: bool,
    stapled: bool,
}

impl ReleaseState {
    pub fn signed(&self) -> bool {
        self.signed
    }

    pub fn verified(&self) -> bool {
        self.verified
    }

    pub fn notarized(&self) -> bool {
        self.notarized
    }

    pub fn stapled(&self) -> bool {
        self.stapled
    }

    pub fn mark_signed(&mut self) {
        self.signed = true;
    }

    pub fn mark_verified(&mut self) {
        self.verified = true;
    }

    pub fn mark_notarized(&mut self) {
        self.notarized = true;
    }

    pub fn mark_stapled(&mut self) {
        self.stapled = true;
    }

    /// The trust level these flags amount to.
    pub fn trust_level(&self) -> TrustLevel {
        if !(self.signed && self.verified) {
            TrustLevel::Unsigned
        } else if !self.notarized {
            TrustLevel::SignedOnly
        } else if !self.stapled {
            TrustLevel::NotarizedOnlineOnly
        } else {
            TrustLevel::NotarizedOfflineCapable
        }
    }
}

/// The external tools a release is performed with.
pub struct Toolchain {
    pub identity_store: Box<dyn IdentityStore>,
    pub codesign: Box<dyn CodeSignTool>,
    pub notary: Box<dyn NotaryService>,
    pub stapler: Box<dyn StapleTool>,
}

impl Toolchain {
    /// Tools installed on this machine.
    pub fn system() -> Self {
        Self {
            identity_store: Box::new(SecurityIdentityStore::new()),
            codesign: Box::new(CodesignCli::new()),
            notary: Box::new(NotarytoolCli::new()),
            stapler: Box::new(StaplerCli::new()),
        }
    }
}

/// Resolve a path to an absolute form suitable for prefix comparisons.
///
/// Symlinks are resolved for the longest existing ancestor.
fn absolute_path(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }

    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
            absolute_path(parent).join(name)
        }
        _ => std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf()),
    }
}

/// Removes an assembled bundle unless disarmed.
struct BundleGuard {
    path: Option<PathBuf>,
}

impl BundleGuard {
    fn new(path: &Path) -> Self {
        Self {
            path: Some(path.to_path_buf()),
        }
    }

    fn disarm(&mut self) {
        self.path = None;
    }
}

impl Drop for BundleGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if path.exists() {
                warn!("removing {} from aborted release", path.display());
                if let Err(e) = std::fs::remove_dir_all(&path) {
                    warn!("failed to remove {}: {}", path.display(), e);
                }
            }
        }
    }
}

pub struct ReleasePipeline {
    config: ReleaseConfig,
    toolchain: Toolchain,
}

impl ReleasePipeline {
    pub fn new(config: ReleaseConfig, toolchain: Toolchain) -> Self {
        Self { config, toolchain }
    }

    pub fn config(&self) -> &ReleaseConfig {
        &self.config
    }

    /// Perform a release.
    ///
    /// If `clean` is set, the output directory is deleted first.
    pub fn run(&self, clean: bool) -> Result<ReleaseReport, ReleaseError> {
        let output_dir = &self.config.output_dir;
        let layout = self.config.bundle_layout();
        let archive_path = notarization_archive_path(output_dir, &layout.bundle_name);

        self.prepare_output_dir(clean, &archive_path)
            .and_then(|_| {
                Packager::new(output_dir)
                    .remove_previous(&layout.bundle_name, &layout.metadata.version)
            })
            .map_err(|e| e.during(Stage::Assemble))?;

        let artifact = self
            .config
            .artifact_path()
            .and_then(Artifact::from_path)
            .map_err(|e| e.during(Stage::Assemble))?;

        if artifact.is_universal() {
            warn!("artifact is a universal binary");
        }

        let bundle = BundleAssembler::new(output_dir)
            .assemble(&artifact, &layout)
            .map_err(|e| e.during(Stage::Assemble))?;
        warn!("assembled {}", bundle.root().display());

        let mut guard = BundleGuard::new(bundle.root());
        let mut state = ReleaseState::default();

        self.sign_and_verify(&bundle, &mut state)?;

        let submission_id = self.notarize_and_staple(&bundle, &archive_path, &mut state)?;

        let trust_level = state.trust_level();

        let (archive, notes) = Packager::new(output_dir)
            .package(&bundle, &layout.metadata.version, trust_level)
            .map_err(|e| e.during(Stage::Package))?;

        guard.disarm();

        warn!("release complete; trust level: {}", trust_level);

        Ok(ReleaseReport {
            trust_level,
            bundle_path: bundle.root().to_path_buf(),
            archive_path: archive,
            notes_path: notes,
            architectures: artifact.architectures().to_vec(),
            submission_id,
        })
    }

    fn prepare_output_dir(&self, clean: bool, archive_path: &Path) -> Result<(), ReleaseError> {
        let output_dir = &self.config.output_dir;

        if clean && output_dir.exists() {
            self.check_clean_is_safe()?;

            warn!("removing output directory {}", output_dir.display());
            std::fs::remove_dir_all(output_dir)?;
        }

        std::fs::create_dir_all(output_dir)?;

        remove_stale_archive(archive_path)
    }

    /// Refuse to clean an output directory holding the release's own inputs.
    fn check_clean_is_safe(&self) -> Result<(), ReleaseError> {
        let output_dir = absolute_path(&self.config.output_dir);

        let inputs = [
            ("artifact", self.config.artifact.as_deref()),
            ("config file", self.config.source_path.as_deref()),
        ];

        for (what, path) in inputs {
            if let Some(path) = path {
                if absolute_path(path).starts_with(&output_dir) {
                    return Err(ReleaseError::ConfigInvalid(format!(
                        "refusing to clean output directory {}: it contains the {} {}",
                        self.config.output_dir.display(),
                        what,
                        path.display()
                    )));
                }
            }
        }

        Ok(())
    }

    fn sign_and_verify(
        &self,
        bundle: &Bundle,
        state: &mut ReleaseState,
    ) -> Result<(), ReleaseError> {
        let resolver = IdentityResolver::new(self.config.signing.identity.clone());

        let identity = match resolver.resolve(self.toolchain.identity_store.as_ref()) {
            Some(identity) => identity,
            None => {
                warn!(
                    "{}; continuing with an unsigned bundle",
                    ReleaseError::IdentityNotFound
                );
                return Ok(());
            }
        };

        let entitlements = self
            .config
            .entitlements()
            .map_err(|e| e.during(Stage::Sign))?;

        Signer::new(self.toolchain.codesign.as_ref(), identity, entitlements)
            .sign_bundle(bundle)
            .map_err(|e| e.during(Stage::Sign))?;
        state.mark_signed();

        SignatureVerifier::new(self.toolchain.codesign.as_ref())
            .verify(bundle.root())
            .map_err(|e| e.during(Stage::Verify))?;
        state.mark_verified();

        Ok(())
    }

    /// Returns the accepted submission ID, if notarization happened.
    fn notarize_and_staple(
        &self,
        bundle: &Bundle,
        archive_path: &Path,
        state: &mut ReleaseState,
    ) -> Result<Option<String>, ReleaseError> {
        if !state.verified() {
            info!("notarization requires a signed bundle; skipping");
            return Ok(None);
        }

        let credentials = match &self.config.credentials {
            Some(credentials) => credentials.clone(),
            None => {
                warn!("notarization credentials not configured; skipping notarization");
                return Ok(None);
            }
        };

        let status = Notarizer::new(
            self.toolchain.notary.as_ref(),
            credentials,
            self.config.poll_policy(),
        )
        .notarize(bundle, archive_path)
        .map_err(|e| e.during(Stage::Notarize))?;
        state.mark_notarized();

        // Stapling failures only degrade the trust level.
        match Stapler::new(self.toolchain.stapler.as_ref()).staple(bundle) {
            Ok(()) => state.mark_stapled(),
            Err(e) => {
                warn!("{}", e);
                warn!("bundle is notarized but first launch requires network access");
            }
        }

        Ok(Some(status.submission_id))
    }
}
