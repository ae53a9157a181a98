// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! macOS application bundle assembly.

An application bundle is a directory named `<Name>.app` with the layout

```text
MyApp.app/
  Contents/
    Info.plist
    MacOS/
      <executable>
    Resources/
      <Name>.icns
```

`Contents/Info.plist` is the metadata descriptor. Its `CFBundleExecutable`
key must name the file in `Contents/MacOS`.
*/

use {
    crate::{artifact::Artifact, error::ReleaseError},
    log::{info, warn},
    std::{
        collections::BTreeMap,
        path::{Path, PathBuf},
    },
};

/// Value of `CFBundleInfoDictionaryVersion`. Versions the key set we write.
pub const INFO_DICTIONARY_VERSION: &str = "6.0";

/// Metadata written to `Contents/Info.plist`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BundleMetadata {
    pub display_name: String,
    pub identifier: String,
    pub version: String,
    pub short_version: String,
    pub minimum_system_version: String,
    /// `Info.plist` key to justification string, e.g. `NSCameraUsageDescription`.
    pub usage_descriptions: BTreeMap<String, String>,
    pub category: Option<String>,
}

/// Describes how an artifact is laid out as a bundle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BundleLayout {
    /// Name of the bundle, without the `.app` suffix.
    pub bundle_name: String,
    /// File name of the main executable in `Contents/MacOS`.
    pub executable_name: String,
    /// Path to an `.icns` file to install as the bundle icon.
    pub icon: Option<PathBuf>,
    pub metadata: BundleMetadata,
}

impl BundleLayout {
    /// File name of the installed icon, if one is configured.
    pub fn icon_file_name(&self) -> Option<String> {
        self.icon
            .as_ref()
            .map(|_| format!("{}.icns", self.bundle_name))
    }

    /// Produce the `Info.plist` dictionary for this layout.
    ///
    /// Keys are emitted in a fixed order.
    pub fn info_plist(&self) -> plist::Dictionary {
        let m = &self.metadata;
        let mut dict = plist::Dictionary::new();

        let mut set = |key: &str, value: plist::Value| {
            dict.insert(key.to_string(), value);
        };

        set(
            "CFBundleInfoDictionaryVersion",
            INFO_DICTIONARY_VERSION.into(),
        );
        set("CFBundlePackageType", "APPL".into());
        set("CFBundleName", self.bundle_name.clone().into());
        set("CFBundleDisplayName", m.display_name.clone().into());
        set("CFBundleIdentifier", m.identifier.clone().into());
        set("CFBundleVersion", m.version.clone().into());
        set("CFBundleShortVersionString", m.short_version.clone().into());
        set("CFBundleExecutable", self.executable_name.clone().into());
        set(
            "LSMinimumSystemVersion",
            m.minimum_system_version.clone().into(),
        );
        set("NSHighResolutionCapable", true.into());

        for (key, value) in &m.usage_descriptions {
            set(key, value.clone().into());
        }

        if let Some(category) = &m.category {
            set("LSApplicationCategoryType", category.clone().into());
        }

        if let Some(icon) = self.icon_file_name() {
            set("CFBundleIconFile", icon.into());
        }

        dict
    }
}

/// An assembled application bundle on disk.
#[derive(Clone, Debug)]
pub struct Bundle {
    root: PathBuf,
    executable_name: String,
    identifier: String,
}

impl Bundle {
    /// Open an existing bundle directory.
    ///
    /// Validates that the metadata descriptor names an executable which
    /// exists in `Contents/MacOS`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, ReleaseError> {
        let root = root.as_ref();

        let info_plist = root.join("Contents").join("Info.plist");
        let value = plist::Value::from_file(&info_plist)?;
        let dict = value.as_dictionary().ok_or_else(|| {
            ReleaseError::Layout(format!("{} is not a dictionary", info_plist.display()))
        })?;

        let string_key = |key: &str| {
            dict.get(key)
                .and_then(|v| v.as_string())
                .map(|s| s.to_string())
                .ok_or_else(|| {
                    ReleaseError::Layout(format!(
                        "{} does not define {}",
                        info_plist.display(),
                        key
                    ))
                })
        };

        let bundle = Self {
            root: root.to_path_buf(),
            executable_name: string_key("CFBundleExecutable")?,
            identifier: string_key("CFBundleIdentifier")?,
        };

        if !bundle.executable_path().is_file() {
            return Err(ReleaseError::Layout(format!(
                "bundle executable {} does not exist",
                bundle.executable_path().display()
            )));
        }

        Ok(bundle)
    }

    /// Root directory of the bundle, e.g. `dist/MyApp.app`.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory name of the bundle, e.g. `MyApp.app`.
    pub fn name(&self) -> String {
        self.root
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn executable_path(&self) -> PathBuf {
        self.root
            .join("Contents")
            .join("MacOS")
            .join(&self.executable_name)
    }

    pub fn info_plist_path(&self) -> PathBuf {
        self.root.join("Contents").join("Info.plist")
    }

    /// Relative paths of all files in the bundle, sorted.
    pub fn files(&self) -> Result<Vec<PathBuf>, ReleaseError> {
        let mut files = vec![];

        for entry in walkdir::WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry?;

            if entry.file_type().is_file() {
                let rel = entry
                    .path()
                    .strip_prefix(&self.root)
                    .map_err(|e| ReleaseError::Layout(e.to_string()))?;
                files.push(rel.to_path_buf());
            }
        }

        Ok(files)
    }
}

/// Creates bundles in an output directory.
pub struct BundleAssembler {
    output_dir: PathBuf,
}

impl BundleAssembler {
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    /// Where a bundle for the given layout is placed.
    pub fn bundle_path(&self, layout: &BundleLayout) -> PathBuf {
        self.output_dir.join(format!("{}.app", layout.bundle_name))
    }

    /// Assemble a bundle from an artifact.
    ///
    /// A bundle from a previous run at the destination is deleted first,
    /// so no file from an earlier layout survives.
    pub fn assemble(
        &self,
        artifact: &Artifact,
        layout: &BundleLayout,
    ) -> Result<Bundle, ReleaseError> {
        let root = self.bundle_path(layout);

        if let Some(source) = &layout.icon {
            if !source.is_file() {
                return Err(ReleaseError::Layout(format!(
                    "icon {} does not exist",
                    source.display()
                )));
            }
        }

        if root.exists() {
            warn!("removing existing bundle {}", root.display());
            std::fs::remove_dir_all(&root)?;
        }

        let contents = root.join("Contents");
        let macos = contents.join("MacOS");
        let resources = contents.join("Resources");

        std::fs::create_dir_all(&macos)?;
        std::fs::create_dir_all(&resources)?;

        let executable = macos.join(&layout.executable_name);
        info!(
            "installing {} as {}",
            artifact.path().display(),
            executable.display()
        );
        std::fs::copy(artifact.path(), &executable)?;
        set_executable(&executable)?;

        if let (Some(source), Some(name)) = (&layout.icon, layout.icon_file_name()) {
            info!("installing icon {}", source.display());
            std::fs::copy(source, resources.join(name))?;
        }

        let info_plist = contents.join("Info.plist");
        info!("writing {}", info_plist.display());
        plist::Value::Dictionary(layout.info_plist()).to_file_xml(&info_plist)?;

        Bundle::open(&root)
    }
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<(), std::io::Error> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = std::fs::metadata(path)?.permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(path, permissions)
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<(), std::io::Error> {
    Ok(())
}
