// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {std::path::PathBuf, thiserror::Error};

/// A step of the release pipeline.
///
/// Used to attribute a fatal error to the step that raised it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    Assemble,
    Sign,
    Verify,
    Notarize,
    Package,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assemble => "assemble",
            Self::Sign => "sign",
            Self::Verify => "verify",
            Self::Notarize => "notarize",
            Self::Package => "package",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the release pipeline.
#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("{0}")]
    CliGeneralError(String),

    #[error("bad argument: {0}")]
    CliBadArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("plist error: {0}")]
    Plist(#[from] plist::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("error walking directory: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("error parsing configuration file {0}: {1}")]
    ConfigParse(PathBuf, toml::de::Error),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("artifact does not exist: {0}")]
    LayoutArtifactMissing(PathBuf),

    #[error("artifact is empty: {0}")]
    LayoutArtifactEmpty(PathBuf),

    #[error("bundle layout error: {0}")]
    Layout(String),

    #[error("unable to find executable for {0}; set {1} to its path")]
    ToolNotFound(&'static str, &'static str),

    #[error("error running {program}: {source}")]
    ToolInvocation {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no usable signing identity installed")]
    IdentityNotFound,

    #[error("error querying signing identities: {0}")]
    IdentityQuery(String),

    #[error("signing {path} failed: {diagnostics}")]
    Sign { path: PathBuf, diagnostics: String },

    #[error("signature verification of {path} failed: {diagnostics}")]
    Verify { path: PathBuf, diagnostics: String },

    #[error("notarization credentials missing: {}", .0.join(", "))]
    CredentialsMissing(Vec<&'static str>),

    #[error("error submitting to notary service: {0}")]
    NotarizationSubmit(String),

    #[error("error querying notary service: {0}")]
    NotarizationQuery(String),

    #[error("notarization submission {submission_id} did not complete within {waited_secs}s")]
    NotarizationTimeout {
        submission_id: String,
        waited_secs: u64,
    },

    #[error("notarization submission {submission_id} rejected; notary log:\n{log}")]
    SubmissionRejected { submission_id: String, log: String },

    #[error("stapling {path} failed: {diagnostics}")]
    Staple { path: PathBuf, diagnostics: String },

    #[error("packaging error: {0}")]
    Packaging(String),

    #[error("release aborted during {stage} stage: {source}")]
    Aborted {
        stage: Stage,
        #[source]
        source: Box<ReleaseError>,
    },
}

impl ReleaseError {
    /// Attribute this error to a pipeline stage.
    ///
    /// Errors already attributed to a stage are returned as-is.
    pub fn during(self, stage: Stage) -> Self {
        match self {
            Self::Aborted { .. } => self,
            _ => Self::Aborted {
                stage,
                source: Box::new(self),
            },
        }
    }

    /// The stage this error aborted, if it was raised by the pipeline.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Aborted { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Whether this error must abort a release.
    ///
    /// Non-fatal conditions only ever degrade the final trust level.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::IdentityNotFound
                | Self::IdentityQuery(_)
                | Self::CredentialsMissing(_)
                | Self::Staple { .. }
        )
    }
}
