// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test fixtures and in-memory stand-ins for the external Apple tools.

use {
    crate::{
        bundle::{BundleLayout, BundleMetadata},
        config::{Credentials, ReleaseConfig},
        error::ReleaseError,
        identity::{IdentityStore, SigningIdentity},
        notarization::{NotaryService, SubmissionStatus, Verdict},
        pipeline::Toolchain,
        signing::{CodeSignTool, SignRequest},
        stapling::StapleTool,
        tools::ToolOutput,
    },
    anyhow::Result,
    std::{
        collections::BTreeMap,
        path::{Path, PathBuf},
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
    },
    tempfile::TempDir,
};

/// A temporary directory holding a fake artifact and an output directory.
pub struct TestEnvironment {
    pub root: TempDir,
    pub artifact: PathBuf,
    pub output_dir: PathBuf,
    pub layout: BundleLayout,
}

impl TestEnvironment {
    pub fn new() -> Result<Self> {
        let root = tempfile::Builder::new()
            .prefix("apple-release-test-")
            .tempdir()?;

        let build_dir = root.path().join("build");
        std::fs::create_dir_all(&build_dir)?;
        let artifact = build_dir.join("myapp");
        std::fs::write(&artifact, b"#!/bin/sh\necho hello\n")?;

        let output_dir = root.path().join("dist");

        let layout = BundleLayout {
            bundle_name: "MyApp".into(),
            executable_name: "myapp".into(),
            icon: None,
            metadata: BundleMetadata {
                display_name: "My App".into(),
                identifier: "com.example.myapp".into(),
                version: "1.2.3".into(),
                short_version: "1.2.3".into(),
                minimum_system_version: "11.0".into(),
                usage_descriptions: BTreeMap::new(),
                category: None,
            },
        };

        Ok(Self {
            root,
            artifact,
            output_dir,
            layout,
        })
    }

    /// A release config matching [Self::layout].
    pub fn config(&self, with_credentials: bool) -> Result<ReleaseConfig> {
        let source = format!(
            "artifact = '{}'\n\
             output_dir = '{}'\n\
             \n\
             [bundle]\n\
             name = 'MyApp'\n\
             display_name = 'My App'\n\
             identifier = 'com.example.myapp'\n\
             version = '1.2.3'\n\
             executable_name = 'myapp'\n\
             \n\
             [signing.entitlements]\n\
             'com.apple.security.device.camera' = true\n",
            self.artifact.display(),
            self.output_dir.display()
        );

        let mut config = ReleaseConfig::from_toml_str(&source, Path::new("release.toml"))?;

        if with_credentials {
            config.credentials = Some(test_credentials());
        }

        Ok(config)
    }
}

pub fn test_credentials() -> Credentials {
    Credentials {
        account: "dev@example.com".into(),
        password: "abcd-efgh-ijkl-mnop".into(),
        team_id: "TEAM123456".into(),
    }
}

#[derive(Clone)]
pub struct FakeIdentityStore {
    identities: Option<Vec<SigningIdentity>>,
}

impl FakeIdentityStore {
    pub fn new(identities: Vec<SigningIdentity>) -> Self {
        Self {
            identities: Some(identities),
        }
    }

    /// A store whose query tool is missing.
    pub fn unavailable() -> Self {
        Self { identities: None }
    }
}

impl IdentityStore for FakeIdentityStore {
    fn code_signing_identities(&self) -> Result<Vec<SigningIdentity>, ReleaseError> {
        self.identities
            .clone()
            .ok_or(ReleaseError::ToolNotFound("security", "APPLE_RELEASE_SECURITY_EXE"))
    }
}

/// Records codesign operations and answers with scripted results.
#[derive(Clone, Default)]
pub struct FakeCodeSign {
    sign_error: Option<String>,
    verify_error: Option<String>,
    calls: Arc<Mutex<Vec<String>>>,
    requests: Arc<Mutex<Vec<SignRequest>>>,
}

impl FakeCodeSign {
    pub fn failing_sign(diagnostics: &str) -> Self {
        Self {
            sign_error: Some(diagnostics.to_string()),
            ..Default::default()
        }
    }

    pub fn failing_verify(diagnostics: &str) -> Self {
        Self {
            verify_error: Some(diagnostics.to_string()),
            ..Default::default()
        }
    }

    /// Operations performed, e.g. `sign <path>`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sign_requests(&self) -> Vec<SignRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn record(&self, action: &str, path: &Path) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", action, path.display()));
    }
}

impl CodeSignTool for FakeCodeSign {
    fn remove_signature(&self, path: &Path) -> Result<ToolOutput, ReleaseError> {
        self.record("remove", path);
        Ok(ToolOutput::failed(1, format!("{}: code object is not signed at all", path.display())))
    }

    fn sign(&self, request: &SignRequest) -> Result<ToolOutput, ReleaseError> {
        self.record("sign", &request.path);
        self.requests.lock().unwrap().push(request.clone());

        // Entitlements must still exist when the tool runs.
        if let Some(path) = &request.entitlements {
            assert!(path.is_file(), "entitlements file missing during signing");
        }

        Ok(match &self.sign_error {
            Some(message) => ToolOutput::failed(1, message),
            None => ToolOutput::ok(""),
        })
    }

    fn verify(&self, path: &Path) -> Result<ToolOutput, ReleaseError> {
        self.record("verify", path);

        Ok(match &self.verify_error {
            Some(message) => ToolOutput::failed(1, message),
            None => ToolOutput::ok(""),
        })
    }
}

/// A notary service with a scripted submission.
#[derive(Clone)]
pub struct FakeNotary {
    submission_id: String,
    verdict: Verdict,
    pending_polls: usize,
    failed_polls: usize,
    log: Option<String>,
    submit_error: Option<String>,
    submissions: Arc<AtomicUsize>,
    queries: Arc<AtomicUsize>,
    uploaded: Arc<Mutex<Vec<String>>>,
}

impl FakeNotary {
    pub fn new(submission_id: &str, verdict: Verdict) -> Self {
        Self {
            submission_id: submission_id.to_string(),
            verdict,
            pending_polls: 0,
            failed_polls: 0,
            log: Some(r#"{"status":"Accepted","issues":null}"#.to_string()),
            submit_error: None,
            submissions: Arc::new(AtomicUsize::new(0)),
            queries: Arc::new(AtomicUsize::new(0)),
            uploaded: Arc::new(Mutex::new(vec![])),
        }
    }

    /// Report the submission as in progress this many times first.
    pub fn with_pending_polls(mut self, count: usize) -> Self {
        self.pending_polls = count;
        self
    }

    /// Fail this many status queries first.
    pub fn with_failed_polls(mut self, count: usize) -> Self {
        self.failed_polls = count;
        self
    }

    pub fn with_log(mut self, log: &str) -> Self {
        self.log = Some(log.to_string());
        self
    }

    pub fn without_log(mut self) -> Self {
        self.log = None;
        self
    }

    pub fn failing_submit(mut self, message: &str) -> Self {
        self.submit_error = Some(message.to_string());
        self
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn status_queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Entry names of the last uploaded archive.
    pub fn uploaded_entries(&self) -> Vec<String> {
        self.uploaded.lock().unwrap().clone()
    }
}

impl NotaryService for FakeNotary {
    fn submit(
        &self,
        archive: &Path,
        _credentials: &Credentials,
    ) -> Result<SubmissionStatus, ReleaseError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = &self.submit_error {
            return Err(ReleaseError::NotarizationSubmit(message.clone()));
        }

        if let Ok(fh) = std::fs::File::open(archive) {
            if let Ok(za) = zip::ZipArchive::new(fh) {
                *self.uploaded.lock().unwrap() = za.file_names().map(|s| s.to_string()).collect();
            }
        }

        Ok(SubmissionStatus {
            submission_id: self.submission_id.clone(),
            verdict: Verdict::Pending,
            message: Some("Successfully uploaded file".into()),
        })
    }

    fn status(
        &self,
        submission_id: &str,
        _credentials: &Credentials,
    ) -> Result<SubmissionStatus, ReleaseError> {
        let query = self.queries.fetch_add(1, Ordering::SeqCst);
        assert_eq!(submission_id, self.submission_id);

        if query < self.failed_polls {
            return Err(ReleaseError::NotarizationQuery(
                "HTTP 503 Service Unavailable".into(),
            ));
        }

        let verdict = if query - self.failed_polls < self.pending_polls {
            Verdict::Pending
        } else {
            self.verdict
        };

        Ok(SubmissionStatus {
            submission_id: self.submission_id.clone(),
            verdict,
            message: None,
        })
    }

    fn fetch_log(
        &self,
        submission_id: &str,
        _credentials: &Credentials,
    ) -> Result<String, ReleaseError> {
        match &self.log {
            Some(log) => Ok(log.clone()),
            None => Err(ReleaseError::NotarizationQuery(format!(
                "no log for submission {}",
                submission_id
            ))),
        }
    }
}

/// A stapler that succeeds, fails, or is missing.
#[derive(Clone, Default)]
pub struct FakeStapler {
    error: Option<String>,
    missing: bool,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeStapler {
    pub fn failing(diagnostics: &str) -> Self {
        Self {
            error: Some(diagnostics.to_string()),
            ..Default::default()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            missing: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn run(&self, action: &str, path: &Path) -> Result<ToolOutput, ReleaseError> {
        if self.missing {
            return Err(ReleaseError::ToolNotFound("xcrun", "APPLE_RELEASE_XCRUN_EXE"));
        }

        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", action, path.display()));

        Ok(match &self.error {
            Some(message) => ToolOutput::failed(65, message),
            None => ToolOutput::ok("The staple and validate action worked!"),
        })
    }
}

impl StapleTool for FakeStapler {
    fn staple(&self, path: &Path) -> Result<ToolOutput, ReleaseError> {
        self.run("staple", path)
    }

    fn validate(&self, path: &Path) -> Result<ToolOutput, ReleaseError> {
        self.run("validate", path)
    }
}

/// A full set of fakes whose state stays observable after building a [Toolchain].
pub struct FakeTools {
    pub identities: FakeIdentityStore,
    pub codesign: FakeCodeSign,
    pub notary: FakeNotary,
    pub stapler: FakeStapler,
}

impl FakeTools {
    /// Fakes that accept everything, with the given identities installed.
    pub fn new(identities: Vec<SigningIdentity>) -> Self {
        Self {
            identities: FakeIdentityStore::new(identities),
            codesign: FakeCodeSign::default(),
            notary: FakeNotary::new("S1", Verdict::Accepted),
            stapler: FakeStapler::default(),
        }
    }

    pub fn with_codesign(mut self, codesign: FakeCodeSign) -> Self {
        self.codesign = codesign;
        self
    }

    pub fn with_notary(mut self, notary: FakeNotary) -> Self {
        self.notary = notary;
        self
    }

    pub fn with_stapler(mut self, stapler: FakeStapler) -> Self {
        self.stapler = stapler;
        self
    }

    pub fn toolchain(&self) -> Toolchain {
        Toolchain {
            identity_store: Box::new(self.identities.clone()),
            codesign: Box::new(self.codesign.clone()),
            notary: Box::new(self.notary.clone()),
            stapler: Box::new(self.stapler.clone()),
        }
    }
}
