// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Release macOS applications.
//!
//! This crate turns a built executable into something end users can download
//! and run. It drives Apple's own tools (`security`, `codesign`, `xcrun
//! notarytool` and `xcrun stapler`) and so only produces signed output on
//! macOS with Xcode command line tools installed.
//!
//! A release run ([ReleasePipeline::run]) goes through the following steps:
//!
//! 1. Assemble an application bundle (`MyApp.app`) from the executable.
//!    ([BundleAssembler])
//! 2. Find a `Developer ID Application` signing identity in the keychain.
//!    ([IdentityResolver])
//! 3. Sign the main executable, then the bundle. ([Signer])
//! 4. Verify the signatures. ([SignatureVerifier])
//! 5. Upload the bundle to Apple's notary service and wait for a verdict.
//!    ([Notarizer])
//! 6. Staple the notarization ticket to the bundle. ([Stapler])
//! 7. Zip the bundle with usage notes. ([Packager])
//!
//! Steps 3 to 6 are optional: without an identity the release is unsigned
//! and without notary credentials it is not notarized. The resulting
//! [TrustLevel] is reported so the operator knows what's missing.
//!
//! All external tool access goes through the [IdentityStore],
//! [CodeSignTool], [NotaryService], and [StapleTool] traits, collected in a
//! [Toolchain].

pub mod archive;
mod artifact;
pub use artifact::*;
mod bundle;
pub use bundle::*;
mod config;
pub use config::*;
mod error;
pub use error::*;
mod identity;
pub use identity::*;
mod notarization;
pub use notarization::*;
mod packaging;
pub use packaging::*;
mod pipeline;
pub use pipeline::*;
mod signing;
pub use signing::*;
mod stapling;
pub use stapling::*;
#[cfg(test)]
mod testutil;
pub mod tools;
mod verify;
pub use verify::*;
