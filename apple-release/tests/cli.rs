// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    anyhow::Result,
    assert_cmd::Command,
    indoc::indoc,
    predicates::prelude::*,
    std::path::Path,
};

const CONFIG: &str = indoc! {r#"
    artifact = "build/myapp"
    output_dir = "dist"

    [bundle]
    name = "MyApp"
    identifier = "com.example.myapp"
    version = "0.4.0"
    executable_name = "myapp"
"#};

/// A command with no signing identity or notary credentials available.
fn release_command(dir: &Path) -> Result<Command> {
    let mut cmd = Command::cargo_bin("apple-release")?;
    cmd.current_dir(dir)
        .env("APPLE_RELEASE_SECURITY_EXE", "/nonexistent/security")
        .env_remove("APPLE_ID")
        .env_remove("APPLE_PASSWORD")
        .env_remove("APPLE_TEAM_ID")
        .arg("release");

    Ok(cmd)
}

#[test]
fn help() -> Result<()> {
    Command::cargo_bin("apple-release")?
        .arg("release")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--max-wait-seconds"));

    Ok(())
}

#[test]
fn missing_config() -> Result<()> {
    let td = tempfile::Builder::new().prefix("apple-release-").tempdir()?;

    release_command(td.path())?
        .assert()
        .failure()
        .stderr(predicate::str::contains("release.toml does not exist"));

    Ok(())
}

#[test]
fn missing_artifact() -> Result<()> {
    let td = tempfile::Builder::new().prefix("apple-release-").tempdir()?;
    std::fs::write(td.path().join("release.toml"), CONFIG)?;

    release_command(td.path())?
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error: release aborted during assemble stage"));

    assert!(!td.path().join("dist/MyApp.app").exists());

    Ok(())
}

#[test]
fn unsigned_release() -> Result<()> {
    let td = tempfile::Builder::new().prefix("apple-release-").tempdir()?;
    std::fs::write(td.path().join("release.toml"), CONFIG)?;
    std::fs::create_dir(td.path().join("build"))?;
    std::fs::write(td.path().join("build/myapp"), b"#!/bin/sh\necho hello\n")?;

    release_command(td.path())?
        .assert()
        .success()
        .stdout(predicate::str::contains("trust level: unsigned"));

    let dist = td.path().join("dist");
    assert!(dist.join("MyApp.app/Contents/Info.plist").is_file());
    assert!(dist.join("MyApp.app/Contents/MacOS/myapp").is_file());
    assert!(dist.join("MyApp-0.4.0.zip").is_file());
    assert!(std::fs::read_to_string(dist.join("README.txt"))?.contains("not signed"));

    Ok(())
}

#[test]
fn bad_max_wait() -> Result<()> {
    let td = tempfile::Builder::new().prefix("apple-release-").tempdir()?;
    std::fs::write(td.path().join("release.toml"), CONFIG)?;

    release_command(td.path())?
        .arg("--max-wait-seconds")
        .arg("soon")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--max-wait-seconds"));

    Ok(())
}
