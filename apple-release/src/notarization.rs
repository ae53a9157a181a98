// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Apple notarization.

Notarization works by uploading a zip of a signed bundle to Apple's notary
service, then waiting for the service to scan it. The service assigns the
upload a submission ID and eventually moves it to a terminal state. When a
submission is rejected, a JSON log keyed by the submission ID explains why.

This module hides the asynchronous nature of the service: [Notarizer::notarize]
blocks, polling with exponential backoff, until a verdict is known or a
time limit is reached.
*/

use {
    crate::{
        archive::ZipBuilder,
        bundle::Bundle,
        config::Credentials,
        error::ReleaseError,
        tools::{find_tool, run_tool, ToolOutput, XCRUN_PATH_ENV_VARIABLE},
    },
    log::{error, info, warn},
    serde::Deserialize,
    std::{
        ffi::OsString,
        path::{Path, PathBuf},
        time::{Duration, Instant},
    },
};

/// State of a notarization submission.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verdict {
    Pending,
    Accepted,
    Rejected,
}

impl Verdict {
    /// Interpret a status string reported by `notarytool`.
    pub fn from_status(status: &str) -> Self {
        match status {
            "Accepted" => Self::Accepted,
            "Invalid" | "Rejected" => Self::Rejected,
            _ => Self::Pending,
        }
    }
}

/// Status of a submission as reported by the notary service.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubmissionStatus {
    pub submission_id: String,
    pub verdict: Verdict,
    pub message: Option<String>,
}

/// Interface to Apple's notary service.
pub trait NotaryService {
    /// Upload an archive, returning as soon as a submission ID is assigned.
    fn submit(
        &self,
        archive: &Path,
        credentials: &Credentials,
    ) -> Result<SubmissionStatus, ReleaseError>;

    /// Query the current state of a submission.
    fn status(
        &self,
        submission_id: &str,
        credentials: &Credentials,
    ) -> Result<SubmissionStatus, ReleaseError>;

    /// Fetch the processing log of a submission.
    fn fetch_log(
        &self,
        submission_id: &str,
        credentials: &Credentials,
    ) -> Result<String, ReleaseError>;
}

#[derive(Deserialize)]
struct NotarytoolResponse {
    id: Option<String>,
    status: Option<String>,
    message: Option<String>,
}

/// Parse JSON printed by `notarytool ... --output-format json`.
pub fn parse_notarytool_json(data: &str) -> Result<SubmissionStatus, ReleaseError> {
    let response = serde_json::from_str::<NotarytoolResponse>(data.trim())?;

    let submission_id = response.id.ok_or_else(|| {
        ReleaseError::NotarizationQuery(format!("no submission id in response: {}", data.trim()))
    })?;

    Ok(SubmissionStatus {
        submission_id,
        verdict: response
            .status
            .as_deref()
            .map(Verdict::from_status)
            .unwrap_or(Verdict::Pending),
        message: response.message,
    })
}

/// [NotaryService] backed by `xcrun notarytool`.
pub struct NotarytoolCli {
    xcrun_exe: Option<PathBuf>,
}

impl NotarytoolCli {
    pub fn new() -> Self {
        Self {
            xcrun_exe: find_tool(XCRUN_PATH_ENV_VARIABLE, "xcrun", "/usr/bin/xcrun"),
        }
    }

    fn run(
        &self,
        command: &str,
        target: impl Into<OsString>,
        credentials: &Credentials,
        json: bool,
    ) -> Result<ToolOutput, ReleaseError> {
        let exe = self
            .xcrun_exe
            .as_ref()
            .ok_or(ReleaseError::ToolNotFound("xcrun", XCRUN_PATH_ENV_VARIABLE))?;

        let mut args: Vec<OsString> = vec![
            "notarytool".into(),
            command.into(),
            target.into(),
            "--apple-id".into(),
            credentials.account.clone().into(),
            "--password".into(),
            credentials.password.clone().into(),
            "--team-id".into(),
            credentials.team_id.clone().into(),
        ];

        if json {
            args.push("--output-format".into());
            args.push("json".into());
        }

        run_tool(exe, &args)
    }
}

impl Default for NotarytoolCli {
    fn default() -> Self {
        Self::new()
    }
}

impl NotaryService for NotarytoolCli {
    fn submit(
        &self,
        archive: &Path,
        credentials: &Credentials,
    ) -> Result<SubmissionStatus, ReleaseError> {
        let output = self.run("submit", archive, credentials, true)?;

        if !output.success {
            return Err(ReleaseError::NotarizationSubmit(output.diagnostics()));
        }

        parse_notarytool_json(&output.stdout)
    }

    fn status(
        &self,
        submission_id: &str,
        credentials: &Credentials,
    ) -> Result<SubmissionStatus, ReleaseError> {
        let output = self.run("info", submission_id, credentials, true)?;

        if !output.success {
            return Err(ReleaseError::NotarizationQuery(output.diagnostics()));
        }

        parse_notarytool_json(&output.stdout)
    }

    fn fetch_log(
        &self,
        submission_id: &str,
        credentials: &Credentials,
    ) -> Result<String, ReleaseError> {
        let output = self.run("log", submission_id, credentials, false)?;

        if !output.success {
            return Err(ReleaseError::NotarizationQuery(output.diagnostics()));
        }

        Ok(output.stdout)
    }
}

/// How to wait on a submission.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Delay after the first status query. The first query is immediate.
    pub initial_interval: Duration,
    /// Upper bound on the delay between queries.
    pub max_interval: Duration,
    /// Factor the delay grows by after each query.
    pub multiplier: u32,
    /// Give up once this much time has passed since submission.
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(60),
            multiplier: 2,
            timeout: Duration::from_secs(1800),
        }
    }
}

impl PollPolicy {
    pub fn next_interval(&self, current: Duration) -> Duration {
        current
            .checked_mul(self.multiplier.max(1))
            .unwrap_or(self.max_interval)
            .min(self.max_interval)
    }
}

/// The zip uploaded for notarization.
///
/// The file is deleted when this value is dropped, whether notarization
/// succeeded or not. If the process is killed the file remains and is
/// removed by [remove_stale_archive] on the next run.
pub struct TransientArchive {
    path: PathBuf,
}

impl TransientArchive {
    /// Write a zip of a bundle to `path`.
    pub fn create(bundle: &Bundle, path: impl AsRef<Path>) -> Result<Self, ReleaseError> {
        let path = path.as_ref();
        info!("writing notarization archive {}", path.display());

        // Construct the guard first so a partially written file is removed.
        let archive = Self {
            path: path.to_path_buf(),
        };

        let mut builder = ZipBuilder::new(std::fs::File::create(path)?);
        builder.add_tree(bundle.root())?;
        builder.finish()?;

        Ok(archive)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TransientArchive {
    fn drop(&mut self) {
        if self.path.exists() {
            info!("removing {}", self.path.display());
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!("failed to remove {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Path of the notarization archive for a bundle in an output directory.
pub fn notarization_archive_path(output_dir: &Path, bundle_name: &str) -> PathBuf {
    output_dir.join(format!("{}-notarization.zip", bundle_name))
}

/// Remove an archive left behind by an interrupted run.
pub fn remove_stale_archive(path: &Path) -> Result<(), ReleaseError> {
    if path.exists() {
        warn!(
            "removing notarization archive from interrupted run: {}",
            path.display()
        );
        std::fs::remove_file(path)?;
    }

    Ok(())
}

/// Performs notarizations.
pub struct Notarizer<'a> {
    service: &'a dyn NotaryService,
    credentials: Credentials,
    policy: PollPolicy,
}

impl<'a> Notarizer<'a> {
    pub fn new(
        service: &'a dyn NotaryService,
        credentials: Credentials,
        policy: PollPolicy,
    ) -> Self {
        Self {
            service,
            credentials,
            policy,
        }
    }

    /// Notarize a signed bundle.
    ///
    /// The bundle is zipped to `archive_path`, uploaded, and waited on. The
    /// zip is deleted before returning. Returns the accepted submission.
    pub fn notarize(
        &self,
        bundle: &Bundle,
        archive_path: &Path,
    ) -> Result<SubmissionStatus, ReleaseError> {
        let archive = TransientArchive::create(bundle, archive_path)?;

        self.submit_and_wait(archive.path())
    }

    /// Upload an archive and wait for a terminal verdict.
    pub fn submit_and_wait(&self, archive: &Path) -> Result<SubmissionStatus, ReleaseError> {
        info!("submitting {} to notary service", archive.display());

        let submission = self
            .service
            .submit(archive, &self.credentials)
            .map_err(|e| match e {
                ReleaseError::NotarizationSubmit(_) => e,
                e => ReleaseError::NotarizationSubmit(e.to_string()),
            })?;

        warn!("notarization submission ID: {}", submission.submission_id);

        let status = if submission.verdict == Verdict::Pending {
            self.wait(&submission.submission_id)?
        } else {
            submission
        };

        match status.verdict {
            Verdict::Accepted => {
                warn!("submission {} accepted", status.submission_id);
                Ok(status)
            }
            _ => {
                let log = self.rejection_log(&status.submission_id);
                for line in log.lines() {
                    error!("notary log> {}", line);
                }

                Err(ReleaseError::SubmissionRejected {
                    submission_id: status.submission_id,
                    log,
                })
            }
        }
    }

    /// Poll until the submission leaves the pending state.
    ///
    /// Query failures are assumed to be transient service trouble and are
    /// retried until the time limit.
    pub fn wait(&self, submission_id: &str) -> Result<SubmissionStatus, ReleaseError> {
        warn!(
            "waiting up to {}s for submission {} to finish processing",
            self.policy.timeout.as_secs(),
            submission_id
        );

        let start_time = Instant::now();
        let mut interval = self.policy.initial_interval;

        loop {
            match self.service.status(submission_id, &self.credentials) {
                Ok(status) if status.verdict != Verdict::Pending => return Ok(status),
                Ok(_) => {
                    info!(
                        "poll state after {}s: in progress",
                        start_time.elapsed().as_secs()
                    );
                }
                Err(e) => {
                    warn!("error querying submission {} (will retry): {}", submission_id, e);
                }
            }

            let elapsed = start_time.elapsed();
            if elapsed >= self.policy.timeout {
                warn!("reached wait limit after {}s", elapsed.as_secs());
                return Err(ReleaseError::NotarizationTimeout {
                    submission_id: submission_id.to_string(),
                    waited_secs: elapsed.as_secs(),
                });
            }

            std::thread::sleep(interval.min(self.policy.timeout - elapsed));
            interval = self.policy.next_interval(interval);
        }
    }

    /// Obtain the log explaining a rejection.
    ///
    /// Never empty: failure to fetch the log is described instead.
    fn rejection_log(&self, submission_id: &str) -> String {
        match self.service.fetch_log(submission_id, &self.credentials) {
            Ok(log) if !log.trim().is_empty() => log,
            Ok(_) => format!(
                "notary service returned an empty log for submission {}",
                submission_id
            ),
            Err(e) => format!(
                "unable to fetch notary log for submission {}: {}",
                submission_id, e
            ),
        }
    }
}
