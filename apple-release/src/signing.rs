// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Code signing of bundles.

A bundle is signed in two steps. The main executable is signed first. Then
the bundle directory itself is signed. The bundle signature seals a digest
of the already signed executable, so the order cannot be reversed.

Both signatures request the hardened runtime and a secure timestamp, which
notarization requires.
*/

use {
    crate::{
        bundle::Bundle,
        error::ReleaseError,
        identity::SigningIdentity,
        tools::{find_tool, run_tool, ToolOutput, CODESIGN_PATH_ENV_VARIABLE},
    },
    log::{debug, info, warn},
    std::{
        ffi::OsString,
        io::Write,
        path::{Path, PathBuf},
        time::SystemTime,
    },
};

/// Entitlements to embed in signatures.
#[derive(Clone, Debug, PartialEq)]
pub enum Entitlements {
    /// An existing entitlements plist file.
    File(PathBuf),
    /// Entitlements defined in configuration.
    Inline(plist::Dictionary),
}

/// An entitlements plist materialized on disk for the duration of signing.
pub struct EntitlementsFile {
    path: PathBuf,
    _temp: Option<tempfile::NamedTempFile>,
}

impl EntitlementsFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Entitlements {
    /// Obtain a file holding these entitlements.
    ///
    /// Inline entitlements are written to a temporary file that lives as
    /// long as the returned value.
    pub fn materialize(&self) -> Result<EntitlementsFile, ReleaseError> {
        match self {
            Self::File(path) => {
                if !path.is_file() {
                    return Err(ReleaseError::ConfigInvalid(format!(
                        "entitlements file {} does not exist",
                        path.display()
                    )));
                }

                Ok(EntitlementsFile {
                    path: path.clone(),
                    _temp: None,
                })
            }
            Self::Inline(dict) => {
                let mut temp = tempfile::Builder::new()
                    .prefix("apple-release-")
                    .suffix(".entitlements")
                    .tempfile()?;

                let mut data = vec![];
                plist::Value::Dictionary(dict.clone()).to_writer_xml(&mut data)?;
                temp.write_all(&data)?;
                temp.flush()?;

                Ok(EntitlementsFile {
                    path: temp.path().to_path_buf(),
                    _temp: Some(temp),
                })
            }
        }
    }
}

/// Arguments to a single signing tool invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignRequest {
    pub path: PathBuf,
    /// Identity reference understood by the signing tool.
    pub identity: String,
    /// Code signing identifier, normally the bundle identifier.
    pub identifier: String,
    pub entitlements: Option<PathBuf>,
    pub hardened_runtime: bool,
    pub timestamp: bool,
}

/// Interface to a code signing tool.
pub trait CodeSignTool {
    /// Strip any existing signature from a path.
    fn remove_signature(&self, path: &Path) -> Result<ToolOutput, ReleaseError>;

    /// Sign a path.
    fn sign(&self, request: &SignRequest) -> Result<ToolOutput, ReleaseError>;

    /// Strictly verify all signatures in a path, recursing into nested code.
    fn verify(&self, path: &Path) -> Result<ToolOutput, ReleaseError>;
}

/// [CodeSignTool] backed by Apple's `codesign`.
pub struct CodesignCli {
    codesign_exe: Option<PathBuf>,
}

impl CodesignCli {
    pub fn new() -> Self {
        Self {
            codesign_exe: find_tool(CODESIGN_PATH_ENV_VARIABLE, "codesign", "/usr/bin/codesign"),
        }
    }

    fn run(&self, args: Vec<OsString>) -> Result<ToolOutput, ReleaseError> {
        let exe = self
            .codesign_exe
            .as_ref()
            .ok_or(ReleaseError::ToolNotFound("codesign", CODESIGN_PATH_ENV_VARIABLE))?;

        run_tool(exe, &args)
    }

    /// Derive `codesign` arguments for a signing request.
    pub fn sign_arguments(request: &SignRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--force".into(),
            "--sign".into(),
            request.identity.clone().into(),
            "--identifier".into(),
            request.identifier.clone().into(),
        ];

        if request.hardened_runtime {
            args.push("--options".into());
            args.push("runtime".into());
        }

        if request.timestamp {
            args.push("--timestamp".into());
        }

        if let Some(path) = &request.entitlements {
            args.push("--entitlements".into());
            args.push(path.clone().into());
        }

        args.push(request.path.clone().into());

        args
    }
}

impl Default for CodesignCli {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeSignTool for CodesignCli {
    fn remove_signature(&self, path: &Path) -> Result<ToolOutput, ReleaseError> {
        self.run(vec!["--remove-signature".into(), path.into()])
    }

    fn sign(&self, request: &SignRequest) -> Result<ToolOutput, ReleaseError> {
        self.run(Self::sign_arguments(request))
    }

    fn verify(&self, path: &Path) -> Result<ToolOutput, ReleaseError> {
        self.run(vec![
            "--verify".into(),
            "--deep".into(),
            "--strict".into(),
            "--verbose=2".into(),
            path.into(),
        ])
    }
}

/// A signature that was applied to a path.
#[derive(Clone, Debug)]
pub struct Signature {
    pub path: PathBuf,
    pub identity: SigningIdentity,
    pub signed_at: SystemTime,
}

/// Signatures applied to a bundle, in the order they were made.
#[derive(Clone, Debug)]
pub struct BundleSignatures {
    pub executable: Signature,
    pub container: Signature,
}

/// Signs bundles with a single identity and entitlements set.
pub struct Signer<'a> {
    tool: &'a dyn CodeSignTool,
    identity: SigningIdentity,
    entitlements: Option<Entitlements>,
}

impl<'a> Signer<'a> {
    pub fn new(
        tool: &'a dyn CodeSignTool,
        identity: SigningIdentity,
        entitlements: Option<Entitlements>,
    ) -> Self {
        Self {
            tool,
            identity,
            entitlements,
        }
    }

    pub fn identity(&self) -> &SigningIdentity {
        &self.identity
    }

    /// Strip any existing signature from a path.
    ///
    /// Code that was never signed is reported as a failure by the tool, which
    /// is not an error here.
    pub fn remove_signature(&self, path: &Path) -> Result<(), ReleaseError> {
        match self.tool.remove_signature(path) {
            Ok(output) if output.success => {
                debug!("removed existing signature from {}", path.display());
                Ok(())
            }
            Ok(output) => {
                debug!("no signature removed: {}", output.diagnostics());
                Ok(())
            }
            Err(e) => Err(ReleaseError::Sign {
                path: path.to_path_buf(),
                diagnostics: e.to_string(),
            }),
        }
    }

    /// Sign a single path.
    ///
    /// `--force` replaces a signature already present on `path` itself, but
    /// callers signing nested code should strip it first with
    /// [Self::remove_signature].
    pub fn sign(
        &self,
        path: &Path,
        identifier: &str,
        entitlements: Option<&Path>,
    ) -> Result<Signature, ReleaseError> {
        let request = SignRequest {
            path: path.to_path_buf(),
            identity: self.identity.signing_reference().to_string(),
            identifier: identifier.to_string(),
            entitlements: entitlements.map(|p| p.to_path_buf()),
            hardened_runtime: true,
            timestamp: true,
        };

        info!("signing {}", path.display());

        let output = self.tool.sign(&request).map_err(|e| ReleaseError::Sign {
            path: path.to_path_buf(),
            diagnostics: e.to_string(),
        })?;

        if !output.success {
            return Err(ReleaseError::Sign {
                path: path.to_path_buf(),
                diagnostics: output.diagnostics(),
            });
        }

        Ok(Signature {
            path: path.to_path_buf(),
            identity: self.identity.clone(),
            signed_at: SystemTime::now(),
        })
    }

    /// Sign a bundle's main executable, then the bundle itself.
    ///
    /// Existing signatures are stripped before anything is signed. Stripping
    /// a bundle also strips its main executable, so doing it between the two
    /// signings would discard the inner signature.
    pub fn sign_bundle(&self, bundle: &Bundle) -> Result<BundleSignatures, ReleaseError> {
        let entitlements = self
            .entitlements
            .as_ref()
            .map(|e| e.materialize())
            .transpose()?;
        let entitlements_path = entitlements.as_ref().map(|e| e.path());

        if let Some(path) = entitlements_path {
            info!("using entitlements from {}", path.display());
        } else {
            warn!("signing without entitlements");
        }

        let executable_path = bundle.executable_path();
        self.remove_signature(&executable_path)?;
        self.remove_signature(bundle.root())?;

        let executable = self.sign(
            &executable_path,
            bundle.identifier(),
            entitlements_path,
        )?;
        let container = self.sign(bundle.root(), bundle.identifier(), entitlements_path)?;

        Ok(BundleSignatures {
            executable,
            container,
        })
    }
}
