//! Resolved package versions, queried from the system RPM database.
//!
//! The query runs `rpm -q` as a subprocess; a missing `rpm` binary is
//! indistinguishable from a missing package and yields a not-installed
//! marker, which is the behavior journaling wants on any host.

use std::process::Command;

use crate::model::Package;

const QUERY_FORMAT: &str = "%{NAME}-%{VERSION}-%{RELEASE}.%{ARCH}\n";

/// Resolve one package name into its installed version records.
///
/// A package can legitimately resolve to several records (multi-arch
/// installs). A name with no match produces a single not-installed marker,
/// except the placeholder name `"unknown"`, which produces nothing.
pub fn resolve(name: &str) -> Vec<Package> {
    let output = Command::new("rpm")
        .args(["-q", "--queryformat", QUERY_FORMAT, name])
        .output();

    if let Ok(out) = output {
        if out.status.success() {
            let versions: Vec<Package> = String::from_utf8_lossy(&out.stdout)
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(|l| Package::installed(name, l))
                .collect();
            if !versions.is_empty() {
                return versions;
            }
        }
    }

    if name == "unknown" {
        Vec::new()
    } else {
        vec![Package::not_installed(name)]
    }
}

/// Resolve every name in order, flattening multi-record results.
pub fn resolve_all<S: AsRef<str>>(names: &[S]) -> Vec<Package> {
    names.iter().flat_map(|n| resolve(n.as_ref())).collect()
}

/// The journaling tool's own version record. Prefers the installed package,
/// falling back to the compiled-in crate version so the field is never a
/// bare not-installed marker.
pub fn harness_version() -> Package {
    let name = env!("CARGO_PKG_NAME");
    resolve(name)
        .into_iter()
        .find(|p| p.version.is_some())
        .unwrap_or_else(|| Package::installed(name, format!("{}-{}", name, env!("CARGO_PKG_VERSION"))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_missing_package_yields_marker() {
        let records = resolve("definitely-not-a-real-package-name-xyz");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "definitely-not-a-real-package-name-xyz");
        assert!(records[0].version.is_none());
    }

    #[test]
    fn test_resolve_unknown_placeholder_yields_nothing() {
        // rpm has no package literally named "unknown" on any sane host.
        assert!(resolve("unknown").is_empty());
    }

    #[test]
    fn test_resolve_all_flattens() {
        let records = resolve_all(&["no-such-pkg-a", "no-such-pkg-b"]);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_harness_version_always_resolves() {
        let harness = harness_version();
        assert_eq!(harness.name, "journ");
        assert!(harness.version.is_some());
    }
}
