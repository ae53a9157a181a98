// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Production of the distributable archive and the release report.

use {
    crate::{archive::ZipBuilder, bundle::Bundle, error::ReleaseError},
    log::{info, warn},
    std::path::{Path, PathBuf},
};

/// Name of the usage notes file placed in and next to the distributable.
pub const USAGE_NOTES_FILE: &str = "README.txt";

/// How much the target platform will trust a released bundle.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum TrustLevel {
    Unsigned,
    SignedOnly,
    NotarizedOnlineOnly,
    NotarizedOfflineCapable,
}

impl TrustLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unsigned => "unsigned",
            Self::SignedOnly => "signed-only",
            Self::NotarizedOnlineOnly => "notarized-online-only",
            Self::NotarizedOfflineCapable => "notarized-offline-capable",
        }
    }

    /// What the operator needs to do to reach the next level.
    pub fn next_action(&self) -> Option<&'static str> {
        match self {
            Self::Unsigned => Some(
                "install a Developer ID Application certificate (or set signing.identity) \
                 and re-run to sign",
            ),
            Self::SignedOnly => {
                Some("set APPLE_ID, APPLE_PASSWORD, and APPLE_TEAM_ID and re-run to notarize")
            }
            Self::NotarizedOnlineOnly => {
                Some("re-run once the notarization ticket can be stapled for offline launch")
            }
            Self::NotarizedOfflineCapable => None,
        }
    }

    /// Instructions for end users, shipped alongside the bundle.
    pub fn usage_notes(&self, bundle_name: &str) -> String {
        match self {
            Self::Unsigned => format!(
                "This application is not signed. macOS will refuse to open it by default.\n\
                 \n\
                 To run it, move {name} to /Applications and then either:\n\
                 \n\
                 \x20 * right-click {name}, choose Open, and confirm; or\n\
                 \x20 * run: xattr -dr com.apple.quarantine /Applications/{name}\n",
                name = bundle_name
            ),
            Self::SignedOnly => format!(
                "This application is signed but not notarized. On first launch macOS\n\
                 will warn that it cannot check it for malicious software.\n\
                 \n\
                 To run it, move {name} to /Applications, right-click it, choose Open,\n\
                 and confirm.\n",
                name = bundle_name
            ),
            Self::NotarizedOnlineOnly => format!(
                "This application is signed and notarized by Apple.\n\
                 \n\
                 Move {name} to /Applications and open it. The first launch needs an\n\
                 internet connection so macOS can confirm the notarization.\n",
                name = bundle_name
            ),
            Self::NotarizedOfflineCapable => format!(
                "This application is signed and notarized by Apple.\n\
                 \n\
                 Move {name} to /Applications and open it.\n",
                name = bundle_name
            ),
        }
    }
}

impl std::fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a completed release.
#[derive(Clone, Debug)]
pub struct ReleaseReport {
    pub trust_level: TrustLevel,
    pub bundle_path: PathBuf,
    pub archive_path: PathBuf,
    pub notes_path: PathBuf,
    pub architectures: Vec<String>,
    pub submission_id: Option<String>,
}

impl std::fmt::Display for ReleaseReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "trust level: {}", self.trust_level)?;
        writeln!(f, "bundle: {}", self.bundle_path.display())?;
        writeln!(f, "archive: {}", self.archive_path.display())?;
        if !self.architectures.is_empty() {
            writeln!(f, "architectures: {}", self.architectures.join(", "))?;
        }
        if let Some(id) = &self.submission_id {
            writeln!(f, "notarization submission: {}", id)?;
        }
        match self.trust_level.next_action() {
            Some(action) => write!(f, "next step: {}", action),
            None => write!(f, "next step: none; ready for distribution"),
        }
    }
}

/// Writes the distributable archive for a bundle.
pub struct Packager {
    output_dir: PathBuf,
}

impl Packager {
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    /// Path of the distributable archive.
    pub fn archive_path(&self, bundle_name: &str, version: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}-{}.zip", bundle_name, version))
    }

    /// Remove the archive and usage notes left by an earlier release.
    ///
    /// They describe a trust level that a new run has not established yet.
    pub fn remove_previous(&self, bundle_name: &str, version: &str) -> Result<(), ReleaseError> {
        for path in [
            self.archive_path(bundle_name, version),
            self.output_dir.join(USAGE_NOTES_FILE),
        ] {
            if path.exists() {
                warn!("removing {} from previous release", path.display());
                std::fs::remove_file(&path)?;
            }
        }

        Ok(())
    }

    /// Zip the bundle together with usage notes for its trust level.
    ///
    /// Returns the paths of the archive and the standalone notes file.
    pub fn package(
        &self,
        bundle: &Bundle,
        version: &str,
        trust_level: TrustLevel,
    ) -> Result<(PathBuf, PathBuf), ReleaseError> {
        let bundle_name = bundle.name();
        let stem = bundle_name.trim_end_matches(".app");
        let archive_path = self.archive_path(stem, version);
        let notes_path = self.output_dir.join(USAGE_NOTES_FILE);
        let notes = trust_level.usage_notes(&bundle_name);

        if archive_path.exists() {
            warn!("replacing {}", archive_path.display());
            std::fs::remove_file(&archive_path)?;
        }

        info!("writing {}", archive_path.display());
        let res = (|| {
            let mut builder = ZipBuilder::new(std::fs::File::create(&archive_path)?);
            builder.add_tree(bundle.root())?;
            builder.add_file(USAGE_NOTES_FILE, notes.as_bytes())?;
            builder.finish()?;

            Ok::<(), ReleaseError>(())
        })();

        if let Err(e) = res {
            // Never leave a truncated archive that looks distributable.
            if archive_path.exists() {
                std::fs::remove_file(&archive_path)?;
            }

            return Err(match e {
                ReleaseError::Packaging(_) => e,
                e => ReleaseError::Packaging(format!(
                    "writing {}: {}",
                    archive_path.display(),
                    e
                )),
            });
        }

        std::fs::write(&notes_path, notes.as_bytes())?;

        Ok((archive_path, notes_path))
    }
}
