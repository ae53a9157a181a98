// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    apple_release::{
        CodesignCli, Credentials, IdentityStore, ReleaseConfig, ReleaseError, ReleasePipeline,
        SecurityIdentityStore, SignatureVerifier, Toolchain, DEFAULT_CONFIG_FILE,
        DEVELOPER_ID_APPLICATION_PREFIX,
    },
    clap::{Arg, ArgMatches, Command},
    log::{warn, LevelFilter},
    std::path::{Path, PathBuf},
};

const RELEASE_ABOUT: &str = "\
Produce a distributable release of a macOS application.

The executable named by the `artifact` config key (or --artifact) is
assembled into an application bundle in the output directory. If a
`Developer ID Application` signing identity is installed, the bundle is
signed and verified. If the APPLE_ID, APPLE_PASSWORD, and APPLE_TEAM_ID
environment variables are set, the signed bundle is notarized by Apple
and the notarization ticket is stapled to it. Finally, the bundle is
zipped together with usage notes.

APPLE_PASSWORD is an app-specific password for the Apple ID, not the
account password.

The final report names the trust level achieved:

* unsigned
* signed-only
* notarized-online-only
* notarized-offline-capable

Locations of the `security`, `codesign`, and `xcrun` tools can be forced
with the APPLE_RELEASE_SECURITY_EXE, APPLE_RELEASE_CODESIGN_EXE, and
APPLE_RELEASE_XCRUN_EXE environment variables.
";

fn load_config(args: &ArgMatches) -> Result<ReleaseConfig, ReleaseError> {
    let path = Path::new(args.value_of("config").unwrap_or(DEFAULT_CONFIG_FILE));

    if !path.exists() {
        return Err(ReleaseError::CliBadArgument(format!(
            "config file {} does not exist",
            path.display()
        )));
    }

    let mut config = ReleaseConfig::from_path(path)?;

    if let Some(value) = args.value_of("artifact") {
        config.artifact = Some(PathBuf::from(value));
    }

    if let Some(value) = args.value_of("output_dir") {
        config.output_dir = PathBuf::from(value);
    }

    if let Some(value) = args.value_of("identity") {
        config.signing.identity = Some(value.to_string());
    }

    if let Some(value) = args.value_of("max_wait_seconds") {
        config.notarization.max_wait_seconds = value.parse::<u64>().map_err(|_| {
            ReleaseError::CliBadArgument(format!(
                "--max-wait-seconds must be a number of seconds; got {}",
                value
            ))
        })?;
    }

    config.credentials = match Credentials::from_env() {
        Ok(credentials) => Some(credentials),
        Err(e) => {
            warn!("{}; notarization disabled", e);
            None
        }
    };

    Ok(config)
}

fn command_release(args: &ArgMatches) -> Result<(), ReleaseError> {
    let config = load_config(args)?;

    let pipeline = ReleasePipeline::new(config, Toolchain::system());
    let report = pipeline.run(args.is_present("clean"))?;

    println!("{}", report);

    Ok(())
}

fn command_identities(_args: &ArgMatches) -> Result<(), ReleaseError> {
    let identities = SecurityIdentityStore::new().code_signing_identities()?;

    let usable = identities
        .iter()
        .filter(|i| i.is_developer_id_application())
        .collect::<Vec<_>>();

    if usable.is_empty() {
        warn!("no {} identities found", DEVELOPER_ID_APPLICATION_PREFIX);
    }

    for (i, identity) in usable.iter().enumerate() {
        println!("{}{}", identity, if i == 0 { " (default)" } else { "" });
    }

    Ok(())
}

fn command_verify(args: &ArgMatches) -> Result<(), ReleaseError> {
    let path = args
        .value_of("path")
        .ok_or_else(|| ReleaseError::CliBadArgument("path argument is required".into()))?;

    let tool = CodesignCli::new();
    SignatureVerifier::new(&tool).verify(Path::new(path))?;

    println!("{} has valid signatures", path);

    Ok(())
}

fn main_impl() -> Result<(), ReleaseError> {
    let app = Command::new("apple-release")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Bundle, sign, notarize, and staple macOS applications")
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        );

    let app = app.subcommand(
        Command::new("release")
            .about("Produce a distributable release")
            .long_about(RELEASE_ABOUT)
            .arg(
                Arg::new("config")
                    .long("config")
                    .takes_value(true)
                    .default_value(DEFAULT_CONFIG_FILE)
                    .help("Path to release configuration file"),
            )
            .arg(
                Arg::new("artifact")
                    .long("artifact")
                    .takes_value(true)
                    .help("Path to the built executable"),
            )
            .arg(
                Arg::new("output_dir")
                    .long("output-dir")
                    .takes_value(true)
                    .help("Directory to write the bundle and archive to"),
            )
            .arg(
                Arg::new("identity")
                    .long("identity")
                    .takes_value(true)
                    .help("Signing identity to use instead of searching the keychain"),
            )
            .arg(
                Arg::new("max_wait_seconds")
                    .long("max-wait-seconds")
                    .takes_value(true)
                    .help("Maximum time in seconds to wait on notarization"),
            )
            .arg(
                Arg::new("clean")
                    .long("clean")
                    .help("Delete the output directory before releasing")
                    .long_help(
                        "Delete the output directory before releasing. Refused if the \
                        directory contains the artifact or the config file.",
                    ),
            ),
    );

    let app = app.subcommand(
        Command::new("identities")
            .about("Print Developer ID Application signing identities in the keychain"),
    );

    let app = app.subcommand(
        Command::new("verify")
            .about("Strictly verify the signatures of a bundle or binary")
            .arg(
                Arg::new("path")
                    .required(true)
                    .help("Path to bundle or binary to verify"),
            ),
    );

    let matches = app.get_matches();

    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    builder.init();

    match matches.subcommand() {
        Some(("release", args)) => command_release(args),
        Some(("identities", args)) => command_identities(args),
        Some(("verify", args)) => command_verify(args),
        _ => Err(ReleaseError::CliGeneralError(
            "unknown command; see --help".into(),
        )),
    }
}

fn main() {
    let exit_code = match main_impl() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {}", err);
            1
        }
    };

    std::process::exit(exit_code)
}
