//! Runtime configuration for the journal engine.
//!
//! Every entry point receives an explicit `Config`; nothing below the CLI
//! edge reads the process environment. The binary resolves flag/env
//! fallbacks in `main` and hands the finished value down.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Config {
    /// Where the journal document lives. Supplied externally, never computed.
    pub journal_path: PathBuf,
    /// Full test name, e.g. `/CoreOS/bash/Regression/bz1172214-memleak`.
    pub test_name: Option<String>,
    /// External run identifier, recorded verbatim when present.
    pub test_id: Option<String>,
    /// Package under test. Derived from the test name when not declared.
    pub package: Option<String>,
    /// Additional packages whose versions are recorded at init.
    pub extra_packages: Vec<String>,
    /// Directory scanned for `*.sh` plugin files at init.
    pub plugin_dir: Option<PathBuf>,
    /// Legacy compatibility: attach messages, metrics, and package records
    /// to the log container when no phase is open instead of failing.
    pub attach_root: bool,
}

impl Config {
    pub fn new(journal_path: PathBuf) -> Self {
        Config {
            journal_path,
            test_name: None,
            test_id: None,
            package: None,
            extra_packages: Vec::new(),
            plugin_dir: None,
            attach_root: false,
        }
    }

    /// Sidecar path for the advisory lock guarding load-mutate-save cycles.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .journal_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "journal".to_string());
        name.push_str(".lock");
        self.journal_path.with_file_name(name)
    }

    /// The package under test: the declared one, else the third component
    /// of the test name path, else `"unknown"`.
    pub fn resolved_package(&self) -> String {
        if let Some(pkg) = &self.package {
            return pkg.clone();
        }
        self.test_name
            .as_deref()
            .and_then(|t| t.split('/').nth(2))
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// All package names to resolve at init: the package under test first,
    /// then the declared extras, deduplicated in order.
    pub fn package_names(&self) -> Vec<String> {
        let mut names = vec![self.resolved_package()];
        for extra in &self.extra_packages {
            if !names.iter().any(|n| n == extra) {
                names.push(extra.clone());
            }
        }
        names
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_package_prefers_declared() {
        let mut config = Config::new(PathBuf::from("/tmp/journal.json"));
        config.test_name = Some("/CoreOS/bash/Regression/case".to_string());
        config.package = Some("coreutils".to_string());
        assert_eq!(config.resolved_package(), "coreutils");
    }

    #[test]
    fn test_resolved_package_derived_from_test_name() {
        let mut config = Config::new(PathBuf::from("/tmp/journal.json"));
        config.test_name = Some("/CoreOS/bash/Regression/case".to_string());
        assert_eq!(config.resolved_package(), "bash");
    }

    #[test]
    fn test_resolved_package_unknown_without_sources() {
        let config = Config::new(PathBuf::from("/tmp/journal.json"));
        assert_eq!(config.resolved_package(), "unknown");

        let mut short = Config::new(PathBuf::from("/tmp/journal.json"));
        short.test_name = Some("bare-name".to_string());
        assert_eq!(short.resolved_package(), "unknown");
    }

    #[test]
    fn test_package_names_dedupes_extras() {
        let mut config = Config::new(PathBuf::from("/tmp/journal.json"));
        config.package = Some("bash".to_string());
        config.extra_packages = vec!["bash".to_string(), "glibc".to_string()];
        assert_eq!(config.package_names(), vec!["bash", "glibc"]);
    }

    #[test]
    fn test_lock_path_is_a_sidecar() {
        let config = Config::new(PathBuf::from("/var/tmp/run1/journal.json"));
        assert_eq!(
            config.lock_path(),
            PathBuf::from("/var/tmp/run1/journal.json.lock")
        );
    }
}
