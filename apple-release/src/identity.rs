// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Discovery of code signing identities installed in the keychain.

use {
    crate::{
        error::ReleaseError,
        tools::{find_tool, run_tool, SECURITY_PATH_ENV_VARIABLE},
    },
    log::{info, warn},
    std::{ffi::OsString, path::PathBuf},
};

/// Common name prefix of certificates for distribution outside the App Store.
pub const DEVELOPER_ID_APPLICATION_PREFIX: &str = "Developer ID Application:";

/// A code signing identity: a certificate plus private key in a keychain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SigningIdentity {
    /// SHA-1 fingerprint of the certificate, if known.
    pub fingerprint: Option<String>,
    /// Certificate common name, e.g. `Developer ID Application: Example (TEAM123456)`.
    pub name: String,
}

impl SigningIdentity {
    /// An identity known only by name.
    pub fn named(name: impl ToString) -> Self {
        Self {
            fingerprint: None,
            name: name.to_string(),
        }
    }

    /// Value to pass to `codesign --sign`.
    ///
    /// The fingerprint is preferred because names need not be unique.
    pub fn signing_reference(&self) -> &str {
        self.fingerprint.as_deref().unwrap_or(&self.name)
    }

    /// Whether this identity is for distribution outside the App Store.
    pub fn is_developer_id_application(&self) -> bool {
        self.name.starts_with(DEVELOPER_ID_APPLICATION_PREFIX)
    }
}

impl std::fmt::Display for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.fingerprint {
            Some(fingerprint) => write!(f, "{} ({})", self.name, fingerprint),
            None => f.write_str(&self.name),
        }
    }
}

/// A read-only source of installed code signing identities.
pub trait IdentityStore {
    /// All valid code signing identities, in the order the store reports them.
    fn code_signing_identities(&self) -> Result<Vec<SigningIdentity>, ReleaseError>;
}

/// Parse the output of `security find-identity`.
///
/// Lines look like `  1) <40 hex chars> "<common name>"`. Identities are
/// returned in listed order; repeats of a fingerprint are dropped.
pub fn parse_find_identity_output(output: &str) -> Vec<SigningIdentity> {
    let mut identities: Vec<SigningIdentity> = vec![];

    for line in output.lines() {
        let line = line.trim();

        let rest = match line.split_once(") ") {
            Some((index, rest))
                if !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()) =>
            {
                rest
            }
            _ => continue,
        };

        let (fingerprint, quoted) = match rest.split_once(' ') {
            Some(v) => v,
            None => continue,
        };

        if fingerprint.len() != 40 || !fingerprint.chars().all(|c| c.is_ascii_hexdigit()) {
            continue;
        }

        let name = match quoted
            .strip_prefix('"')
            .and_then(|s| s.rfind('"').map(|end| &s[..end]))
        {
            Some(name) => name,
            None => continue,
        };

        if identities
            .iter()
            .any(|i| i.fingerprint.as_deref() == Some(fingerprint))
        {
            continue;
        }

        identities.push(SigningIdentity {
            fingerprint: Some(fingerprint.to_string()),
            name: name.to_string(),
        });
    }

    identities
}

/// Identity store backed by the macOS `security` tool.
pub struct SecurityIdentityStore {
    security_exe: Option<PathBuf>,
}

impl SecurityIdentityStore {
    pub fn new() -> Self {
        Self {
            security_exe: find_tool(SECURITY_PATH_ENV_VARIABLE, "security", "/usr/bin/security"),
        }
    }
}

impl Default for SecurityIdentityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityStore for SecurityIdentityStore {
    fn code_signing_identities(&self) -> Result<Vec<SigningIdentity>, ReleaseError> {
        let exe = self
            .security_exe
            .as_ref()
            .ok_or(ReleaseError::ToolNotFound("security", SECURITY_PATH_ENV_VARIABLE))?;

        let args = ["find-identity", "-v", "-p", "codesigning"]
            .iter()
            .map(OsString::from)
            .collect::<Vec<_>>();

        let output = run_tool(exe, &args)?;

        if !output.success {
            return Err(ReleaseError::IdentityQuery(output.diagnostics()));
        }

        Ok(parse_find_identity_output(&output.stdout))
    }
}

/// Selects the identity a release is signed with.
#[derive(Clone, Debug, Default)]
pub struct IdentityResolver {
    explicit: Option<String>,
}

impl IdentityResolver {
    /// Construct an instance, optionally with an identity that bypasses lookup.
    pub fn new(explicit: Option<String>) -> Self {
        Self { explicit }
    }

    /// Resolve the identity to sign with.
    ///
    /// An explicitly configured identity always wins. Otherwise the first
    /// Developer ID Application identity in the store's enumeration order is
    /// chosen. Returns `None` when nothing matches or the store can't be
    /// queried; the release then proceeds unsigned.
    pub fn resolve(&self, store: &dyn IdentityStore) -> Option<SigningIdentity> {
        if let Some(name) = &self.explicit {
            warn!("using configured signing identity {}", name);
            return Some(SigningIdentity::named(name));
        }

        let identities = match store.code_signing_identities() {
            Ok(identities) => identities,
            Err(e) => {
                warn!("unable to enumerate signing identities: {}", e);
                return None;
            }
        };

        let candidates = identities
            .into_iter()
            .filter(|i| i.is_developer_id_application())
            .collect::<Vec<_>>();

        match candidates.len() {
            0 => {
                info!("no {} identity installed", DEVELOPER_ID_APPLICATION_PREFIX);
                None
            }
            1 => {
                warn!("using signing identity {}", candidates[0]);
                candidates.into_iter().next()
            }
            count => {
                warn!("found {} candidate signing identities:", count);
                for identity in &candidates {
                    warn!("  {}", identity);
                }
                warn!(
                    "using first listed identity {}; configure signing.identity to choose another",
                    candidates[0]
                );
                candidates.into_iter().next()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::testutil::FakeIdentityStore, indoc::indoc};

    const FIND_IDENTITY_OUTPUT: &str = indoc! {r#"
          1) 0123456789ABCDEF0123456789ABCDEF01234567 "Apple Development: dev@example.com (ABCDE12345)"
          2) 89ABCDEF0123456789ABCDEF0123456789ABCDEF "Developer ID Application: Example Inc (TEAM123456)"
          3) FEDCBA9876543210FEDCBA9876543210FEDCBA98 "Developer ID Application: Example Inc (TEAM999999)"
             3 valid identities found
    "#};

    #[test]
    fn parse_output() {
        let identities = parse_find_identity_output(FIND_IDENTITY_OUTPUT);

        assert_eq!(identities.len(), 3);
        assert_eq!(
            identities[1],
            SigningIdentity {
                fingerprint: Some("89ABCDEF0123456789ABCDEF0123456789ABCDEF".into()),
                name: "Developer ID Application: Example Inc (TEAM123456)".into(),
            }
        );
        assert!(!identities[0].is_developer_id_application());
        assert_eq!(
            identities[2].signing_reference(),
            "FEDCBA9876543210FEDCBA9876543210FEDCBA98"
        );
    }

    #[test]
    fn parse_output_deduplicates() {
        let doubled = format!("{}{}", FIND_IDENTITY_OUTPUT, FIND_IDENTITY_OUTPUT);
        assert_eq!(parse_find_identity_output(&doubled).len(), 3);
        assert!(parse_find_identity_output("     0 valid identities found\n").is_empty());
    }

    #[test]
    fn resolve_first_match() {
        let store = FakeIdentityStore::new(parse_find_identity_output(FIND_IDENTITY_OUTPUT));

        let identity = IdentityResolver::default().resolve(&store).unwrap();
        assert_eq!(
            identity.name,
            "Developer ID Application: Example Inc (TEAM123456)"
        );

        // Stable across calls.
        assert_eq!(IdentityResolver::default().resolve(&store), Some(identity));
    }

    #[test]
    fn resolve_none() {
        let store = FakeIdentityStore::new(vec![SigningIdentity::named(
            "Apple Development: dev@example.com (ABCDE12345)",
        )]);
        assert_eq!(IdentityResolver::default().resolve(&store), None);

        assert_eq!(
            IdentityResolver::default().resolve(&FakeIdentityStore::unavailable()),
            None
        );
    }

    #[test]
    fn resolve_explicit() {
        let resolver = IdentityResolver::new(Some("Developer ID Application: Other".into()));

        let identity = resolver
            .resolve(&FakeIdentityStore::unavailable())
            .unwrap();
        assert_eq!(identity.signing_reference(), "Developer ID Application: Other");
    }
}
