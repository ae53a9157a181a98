// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Zip archive production.

use {
    crate::error::ReleaseError,
    std::{
        io::{Seek, Write},
        path::Path,
    },
    zip::{write::FileOptions, CompressionMethod, ZipWriter},
};

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;

    if metadata.permissions().mode() & 0o111 != 0 {
        0o755
    } else {
        0o644
    }
}

#[cfg(not(unix))]
fn file_mode(_metadata: &std::fs::Metadata) -> u32 {
    0o644
}

/// Incrementally writes a zip archive.
pub struct ZipBuilder<W: Write + Seek> {
    zf: ZipWriter<W>,
}

impl<W: Write + Seek> ZipBuilder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            zf: ZipWriter::new(writer),
        }
    }

    /// Add a directory tree under a directory named after its root.
    ///
    /// e.g. passing `dist/MyApp.app` yields entries like
    /// `MyApp.app/Contents/Info.plist`. Entries are added in sorted order
    /// so archives of identical trees are identical.
    pub fn add_tree(&mut self, root: &Path) -> Result<(), ReleaseError> {
        let top = root
            .file_name()
            .ok_or_else(|| {
                ReleaseError::Packaging(format!("{} has no file name", root.display()))
            })?
            .to_string_lossy()
            .to_string();

        for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
            let entry = entry?;

            let rel = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| ReleaseError::Packaging(e.to_string()))?;

            let name = if rel.as_os_str().is_empty() {
                top.clone()
            } else {
                format!("{}/{}", top, rel.to_string_lossy().replace('\\', "/"))
            };

            let file_type = entry.file_type();

            if file_type.is_dir() {
                self.zf.add_directory(
                    name,
                    FileOptions::default().unix_permissions(0o755),
                )?;
            } else if file_type.is_symlink() {
                let target = std::fs::read_link(entry.path())?;
                self.zf.add_symlink(
                    name,
                    target.to_string_lossy(),
                    FileOptions::default(),
                )?;
            } else {
                let metadata = entry.metadata()?;
                let options = FileOptions::default()
                    .compression_method(CompressionMethod::Deflated)
                    .unix_permissions(file_mode(&metadata));

                self.zf.start_file(name, options)?;
                self.zf.write_all(&std::fs::read(entry.path())?)?;
            }
        }

        Ok(())
    }

    /// Add a single regular file with in-memory content.
    pub fn add_file(&mut self, name: &str, data: &[u8]) -> Result<(), ReleaseError> {
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644);

        self.zf.start_file(name, options)?;
        self.zf.write_all(data)?;

        Ok(())
    }

    pub fn finish(mut self) -> Result<W, ReleaseError> {
        Ok(self.zf.finish()?)
    }
}
