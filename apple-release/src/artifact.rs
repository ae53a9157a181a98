// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The raw executable produced by the build.

use {
    crate::error::ReleaseError,
    goblin::mach::{cputype::get_arch_name_from_types, Mach},
    log::{info, warn},
    std::path::{Path, PathBuf},
};

/// A built executable that a release is produced from.
///
/// The artifact is owned by the build and never modified by the pipeline.
#[derive(Clone, Debug)]
pub struct Artifact {
    path: PathBuf,
    architectures: Vec<String>,
}

impl Artifact {
    /// Open an artifact at a filesystem path.
    ///
    /// Errors if the path doesn't exist or holds no data.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ReleaseError> {
        let path = path.as_ref();

        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ReleaseError::LayoutArtifactMissing(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        if !metadata.is_file() {
            return Err(ReleaseError::Layout(format!(
                "artifact is not a regular file: {}",
                path.display()
            )));
        }

        if metadata.len() == 0 {
            return Err(ReleaseError::LayoutArtifactEmpty(path.to_path_buf()));
        }

        let data = std::fs::read(path)?;
        let architectures = macho_architectures(&data);

        if architectures.is_empty() {
            warn!(
                "{} does not appear to be a Mach-O binary; signing may fail",
                path.display()
            );
        } else {
            info!(
                "artifact {} architectures: {}",
                path.display(),
                architectures.join(", ")
            );
        }

        Ok(Self {
            path: path.to_path_buf(),
            architectures,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Names of the CPU architectures in the binary.
    ///
    /// Empty if the artifact isn't a Mach-O binary.
    pub fn architectures(&self) -> &[String] {
        &self.architectures
    }

    /// Whether this is a multi-architecture (fat) binary.
    pub fn is_universal(&self) -> bool {
        self.architectures.len() > 1
    }
}

/// Resolve architecture names from Mach-O data.
///
/// Returns an empty list if the data doesn't parse as Mach-O.
pub fn macho_architectures(data: &[u8]) -> Vec<String> {
    let name = |cputype, cpusubtype| {
        get_arch_name_from_types(cputype, cpusubtype)
            .unwrap_or("unknown")
            .to_string()
    };

    match Mach::parse(data) {
        Ok(Mach::Binary(macho)) => vec![name(macho.header.cputype, macho.header.cpusubtype)],
        Ok(Mach::Fat(multi_arch)) => multi_arch
            .iter_arches()
            .filter_map(|arch| arch.ok())
            .map(|arch| name(arch.cputype, arch.cpusubtype))
            .collect(),
        Err(_) => vec![],
    }
}
