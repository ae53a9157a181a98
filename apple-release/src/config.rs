// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Release configuration.
//!
//! All process-wide inputs to a release (file settings, command line
//! overrides, credentials from the environment) are resolved into a
//! [ReleaseConfig] up front and handed to the pipeline. Pipeline components
//! never consult the environment themselves.

use {
    crate::{
        bundle::{BundleLayout, BundleMetadata},
        error::ReleaseError,
        notarization::PollPolicy,
        signing::Entitlements,
    },
    serde::Deserialize,
    std::{
        collections::BTreeMap,
        path::{Path, PathBuf},
        time::Duration,
    },
};

pub const DEFAULT_CONFIG_FILE: &str = "release.toml";

pub const APPLE_ID_ENV_VARIABLE: &str = "APPLE_ID";
pub const APPLE_PASSWORD_ENV_VARIABLE: &str = "APPLE_PASSWORD";
pub const APPLE_TEAM_ID_ENV_VARIABLE: &str = "APPLE_TEAM_ID";

fn default_output_dir() -> PathBuf {
    PathBuf::from("dist")
}

fn default_minimum_system_version() -> String {
    "11.0".to_string()
}

fn default_max_wait_seconds() -> u64 {
    1800
}

fn default_initial_poll_seconds() -> u64 {
    5
}

fn default_max_poll_seconds() -> u64 {
    60
}

/// Describes the application bundle to produce.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BundleConfig {
    /// Bundle name. Becomes `<name>.app`.
    pub name: String,
    pub display_name: Option<String>,
    /// Reverse DNS bundle identifier.
    pub identifier: String,
    pub version: String,
    pub short_version: Option<String>,
    #[serde(default = "default_minimum_system_version")]
    pub minimum_system_version: String,
    /// `LSApplicationCategoryType` value.
    pub category: Option<String>,
    /// Path to an `.icns` file.
    pub icon: Option<PathBuf>,
    /// Name of the executable inside `Contents/MacOS`. Defaults to `name`.
    pub executable_name: Option<String>,
    /// Justification strings for guarded capabilities, keyed by `Info.plist` key.
    #[serde(default)]
    pub usage_descriptions: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SigningConfig {
    /// Explicit signing identity. Bypasses keychain enumeration.
    pub identity: Option<String>,
    pub entitlements_file: Option<PathBuf>,
    #[serde(default)]
    pub entitlements: BTreeMap<String, toml::Value>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NotarizationConfig {
    #[serde(default = "default_max_wait_seconds")]
    pub max_wait_seconds: u64,
    #[serde(default = "default_initial_poll_seconds")]
    pub initial_poll_seconds: u64,
    #[serde(default = "default_max_poll_seconds")]
    pub max_poll_seconds: u64,
}

impl Default for NotarizationConfig {
    fn default() -> Self {
        Self {
            max_wait_seconds: default_max_wait_seconds(),
            initial_poll_seconds: default_initial_poll_seconds(),
            max_poll_seconds: default_max_poll_seconds(),
        }
    }
}

/// Everything a release run needs to know.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ReleaseConfig {
    /// Path to the built executable.
    pub artifact: Option<PathBuf>,
    /// Directory receiving the bundle and distributable archive.
    ///
    /// Do not run two releases against the same output directory
    /// concurrently: each run replaces the bundle wholesale and the
    /// result of racing runs is undefined.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    pub bundle: BundleConfig,
    #[serde(default)]
    pub signing: SigningConfig,
    #[serde(default)]
    pub notarization: NotarizationConfig,
    /// Notarization credentials. Never read from the config file.
    #[serde(skip)]
    pub credentials: Option<Credentials>,
    /// File this config was loaded from, if any.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl ReleaseConfig {
    /// Parse a config from TOML source.
    ///
    /// Relative paths are kept as-is.
    pub fn from_toml_str(source: &str, origin: &Path) -> Result<Self, ReleaseError> {
        let config = toml::from_str::<Self>(source)
            .map_err(|e| ReleaseError::ConfigParse(origin.to_path_buf(), e))?;

        config.validate()?;

        Ok(config)
    }

    /// Load a config file.
    ///
    /// Relative paths in the file are resolved against the file's directory.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ReleaseError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;

        let mut config = Self::from_toml_str(&source, path)?;

        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        config.source_path = Some(path.to_path_buf());

        Ok(config)
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };

        if let Some(p) = self.artifact.as_mut() {
            resolve(p);
        }
        resolve(&mut self.output_dir);
        if let Some(p) = self.bundle.icon.as_mut() {
            resolve(p);
        }
        if let Some(p) = self.signing.entitlements_file.as_mut() {
            resolve(p);
        }
    }

    fn validate(&self) -> Result<(), ReleaseError> {
        let bundle = &self.bundle;

        if bundle.name.is_empty() || bundle.name.contains(&['/', '\\'][..]) {
            return Err(ReleaseError::ConfigInvalid(format!(
                "bundle name must be a non-empty file name; got {:?}",
                bundle.name
            )));
        }

        if bundle.identifier.is_empty() || bundle.identifier.contains(char::is_whitespace) {
            return Err(ReleaseError::ConfigInvalid(format!(
                "bundle identifier is not valid: {:?}",
                bundle.identifier
            )));
        }

        if bundle.version.is_empty() {
            return Err(ReleaseError::ConfigInvalid(
                "bundle version must not be empty".into(),
            ));
        }

        if let Some(name) = &bundle.executable_name {
            if name.is_empty() || name.contains(&['/', '\\'][..]) {
                return Err(ReleaseError::ConfigInvalid(format!(
                    "executable name must be a non-empty file name; got {:?}",
                    name
                )));
            }
        }

        if self.signing.entitlements_file.is_some() && !self.signing.entitlements.is_empty() {
            return Err(ReleaseError::ConfigInvalid(
                "entitlements_file and an inline entitlements table are mutually exclusive"
                    .into(),
            ));
        }

        Ok(())
    }

    /// The artifact path, which must have been set by file or override.
    pub fn artifact_path(&self) -> Result<&Path, ReleaseError> {
        self.artifact.as_deref().ok_or_else(|| {
            ReleaseError::ConfigInvalid("no artifact path configured; pass --artifact".into())
        })
    }

    /// Resolve the on-disk layout of the bundle.
    pub fn bundle_layout(&self) -> BundleLayout {
        let bundle = &self.bundle;

        BundleLayout {
            bundle_name: bundle.name.clone(),
            executable_name: bundle
                .executable_name
                .clone()
                .unwrap_or_else(|| bundle.name.clone()),
            icon: bundle.icon.clone(),
            metadata: BundleMetadata {
                display_name: bundle
                    .display_name
                    .clone()
                    .unwrap_or_else(|| bundle.name.clone()),
                identifier: bundle.identifier.clone(),
                version: bundle.version.clone(),
                short_version: bundle
                    .short_version
                    .clone()
                    .unwrap_or_else(|| bundle.version.clone()),
                minimum_system_version: bundle.minimum_system_version.clone(),
                usage_descriptions: bundle.usage_descriptions.clone(),
                category: bundle.category.clone(),
            },
        }
    }

    /// Resolve the entitlements manifest to sign with, if any.
    pub fn entitlements(&self) -> Result<Option<Entitlements>, ReleaseError> {
        if let Some(path) = &self.signing.entitlements_file {
            Ok(Some(Entitlements::File(path.clone())))
        } else if self.signing.entitlements.is_empty() {
            Ok(None)
        } else {
            let mut dict = plist::Dictionary::new();

            for (key, value) in &self.signing.entitlements {
                dict.insert(key.clone(), toml_to_plist(key, value)?);
            }

            Ok(Some(Entitlements::Inline(dict)))
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        let n = &self.notarization;

        PollPolicy {
            initial_interval: Duration::from_secs(n.initial_poll_seconds.max(1)),
            max_interval: Duration::from_secs(n.max_poll_seconds.max(n.initial_poll_seconds)),
            multiplier: 2,
            timeout: Duration::from_secs(n.max_wait_seconds),
        }
    }
}

fn toml_to_plist(key: &str, value: &toml::Value) -> Result<plist::Value, ReleaseError> {
    Ok(match value {
        toml::Value::Boolean(v) => plist::Value::Boolean(*v),
        toml::Value::String(v) => plist::Value::String(v.clone()),
        toml::Value::Integer(v) => plist::Value::Integer((*v).into()),
        toml::Value::Array(values) => plist::Value::Array(
            values
                .iter()
                .map(|v| toml_to_plist(key, v))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        _ => {
            return Err(ReleaseError::ConfigInvalid(format!(
                "entitlement {} has an unsupported value type",
                key
            )));
        }
    })
}

/// Account credentials for the notary service.
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub account: String,
    pub password: String,
    pub team_id: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("password", &"<hidden>")
            .field("team_id", &self.team_id)
            .finish()
    }
}

impl Credentials {
    /// Resolve credentials from a variable lookup function.
    ///
    /// All three values are required. Empty values count as missing.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ReleaseError> {
        let mut missing = vec![];

        let mut get = |name: &'static str| match lookup(name) {
            Some(value) if !value.trim().is_empty() => value,
            _ => {
                missing.push(name);
                String::new()
            }
        };

        let account = get(APPLE_ID_ENV_VARIABLE);
        let password = get(APPLE_PASSWORD_ENV_VARIABLE);
        let team_id = get(APPLE_TEAM_ID_ENV_VARIABLE);

        if missing.is_empty() {
            Ok(Self {
                account,
                password,
                team_id,
            })
        } else {
            Err(ReleaseError::CredentialsMissing(missing))
        }
    }

    /// Resolve credentials from the process environment.
    pub fn from_env() -> Result<Self, ReleaseError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}
