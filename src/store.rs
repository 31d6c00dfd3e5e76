//! Load, initialize, and save the persisted journal document.
//!
//! Every command is one short-lived process execution: state is never
//! retained in memory between invocations, so each mutation is a full
//! load -> mutate -> save cycle against the configured path. An advisory
//! file lock wraps the cycle; when the lock cannot be taken the store
//! degrades, with a warning, to the historical unlocked behavior.

use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;

use fs2::FileExt;
use glob::glob;
use tracing::{debug, warn};

use crate::config::Config;
use crate::errors::JournalError;
use crate::model::{now_stamp, scrub, Journal};
use crate::{host, pkg};

pub struct Store {
    journal_path: PathBuf,
    lock_path: PathBuf,
}

impl Store {
    pub fn new(config: &Config) -> Self {
        Store {
            journal_path: config.journal_path.clone(),
            lock_path: config.lock_path(),
        }
    }

    pub fn exists(&self) -> bool {
        self.journal_path.exists()
    }

    /// Read and parse the persisted document. The stored open-phase
    /// reference is re-derived on every load so documents produced by the
    /// metafile compiler or older revisions stay consistent.
    pub fn load(&self) -> Result<Journal, JournalError> {
        let content = fs::read_to_string(&self.journal_path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                JournalError::NotFound {
                    path: self.journal_path.clone(),
                }
            } else {
                JournalError::ReadFailed {
                    path: self.journal_path.clone(),
                    source,
                }
            }
        })?;

        let mut journal: Journal =
            serde_json::from_str(&content).map_err(|source| JournalError::Malformed {
                path: self.journal_path.clone(),
                source,
            })?;
        journal.refresh_open_phase();
        Ok(journal)
    }

    /// Serialize the whole document and overwrite the persisted file.
    pub fn save(&self, journal: &Journal) -> Result<(), JournalError> {
        let json =
            serde_json::to_string_pretty(journal).map_err(|source| JournalError::WriteFailed {
                path: self.journal_path.clone(),
                source: std::io::Error::other(source),
            })?;
        fs::write(&self.journal_path, json).map_err(|source| JournalError::WriteFailed {
            path: self.journal_path.clone(),
            source,
        })
    }

    /// Create the journal skeleton unless one already exists. Idempotent:
    /// an existing document is returned untouched, byte for byte.
    ///
    /// Returns `true` when a new document was created.
    pub fn ensure_initialized(&self, config: &Config) -> Result<bool, JournalError> {
        if self.exists() {
            debug!(path = %self.journal_path.display(), "journal already initialized");
            return Ok(false);
        }
        let journal = build_skeleton(config);
        self.save(&journal)?;
        Ok(true)
    }

    /// Load the journal, lazily creating it first when missing. Commands
    /// arriving before `init` self-initialize rather than failing the run.
    pub fn open_or_init(&self, config: &Config) -> Result<Journal, JournalError> {
        match self.load() {
            Ok(journal) => Ok(journal),
            Err(err) if err.is_not_found() => {
                warn!("journal not initialized, creating it now");
                self.ensure_initialized(config)?;
                self.load()
            }
            Err(err) => Err(err),
        }
    }

    /// Take the advisory lock for one load-mutate-save cycle. `None` means
    /// the cycle proceeds unlocked, exactly as the legacy design did.
    pub fn lock(&self) -> Option<JournalLock> {
        match JournalLock::acquire(&self.lock_path) {
            Ok(lock) => Some(lock),
            Err(err) => {
                warn!(path = %self.lock_path.display(), error = %err, "proceeding without journal lock");
                None
            }
        }
    }
}

/// Exclusive advisory lock on the journal's sidecar lock file. Released on
/// drop; concurrent invocations serialize their load-mutate-save cycles
/// instead of silently losing updates.
pub struct JournalLock {
    file: File,
}

impl JournalLock {
    fn acquire(path: &std::path::Path) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        file.lock_exclusive()?;
        Ok(JournalLock { file })
    }
}

impl Drop for JournalLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// Gather the environment metadata recorded exactly once, at creation.
fn build_skeleton(config: &Config) -> Journal {
    let now = now_stamp();
    Journal {
        test_id: config.test_id.clone(),
        package: config.resolved_package(),
        packages: pkg::resolve_all(&config.package_names()),
        harness: Some(pkg::harness_version()),
        start_time: now.clone(),
        end_time: now,
        test_name: config
            .test_name
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        release: host::release(),
        hostname: host::hostname(),
        arch: host::arch(),
        hw_cpu: host::cpu_summary(),
        hw_ram: host::ram_summary(),
        hw_hdd: host::disk_summary(),
        plugins: scan_plugins(config),
        purpose: read_purpose(),
        log: Vec::new(),
        open_phase: None,
    }
}

/// Shell plugin files (`*.sh`) in the configured plugin directory, by name.
fn scan_plugins(config: &Config) -> Vec<String> {
    let Some(dir) = &config.plugin_dir else {
        return Vec::new();
    };
    let pattern = dir.join("*.sh").to_string_lossy().to_string();
    let Ok(entries) = glob(&pattern) else {
        return Vec::new();
    };
    let mut plugins: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    plugins.sort();
    plugins
}

/// Test purpose text from a `PURPOSE` file in the working directory.
fn read_purpose() -> String {
    match fs::read_to_string("PURPOSE") {
        Ok(text) => scrub(&text),
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Node, Phase};
    use tempfile::tempdir;

    fn make_config(dir: &std::path::Path) -> Config {
        let mut config = Config::new(dir.join("journal.json"));
        config.test_name = Some("/distribution/bash/sanity".to_string());
        config.test_id = Some("J:12345".to_string());
        config
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let store = Store::new(&make_config(dir.path()));
        let err = store.load().unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_init_creates_skeleton() {
        let dir = tempdir().unwrap();
        let config = make_config(dir.path());
        let store = Store::new(&config);

        assert!(store.ensure_initialized(&config).unwrap());
        let journal = store.load().unwrap();
        assert_eq!(journal.package, "bash");
        assert_eq!(journal.test_name, "/distribution/bash/sanity");
        assert_eq!(journal.test_id.as_deref(), Some("J:12345"));
        assert!(!journal.start_time.is_empty());
        assert_eq!(journal.start_time, journal.end_time);
        assert!(journal.log.is_empty());
        assert!(journal.harness.is_some());
    }

    #[test]
    fn test_init_is_idempotent_byte_for_byte() {
        let dir = tempdir().unwrap();
        let config = make_config(dir.path());
        let store = Store::new(&config);

        assert!(store.ensure_initialized(&config).unwrap());
        let first = fs::read(&config.journal_path).unwrap();

        assert!(!store.ensure_initialized(&config).unwrap());
        let second = fs::read(&config.journal_path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let config = make_config(dir.path());
        let store = Store::new(&config);
        store.ensure_initialized(&config).unwrap();

        let mut journal = store.load().unwrap();
        journal.log.push(Node::Phase(Phase::open("setup", "FAIL")));
        journal.refresh_open_phase();
        store.save(&journal).unwrap();

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.phases().count(), 1);
        assert_eq!(reloaded.open_phase, Some(0));
        assert_eq!(reloaded, journal);
    }

    #[test]
    fn test_load_rederives_stale_open_phase() {
        let dir = tempdir().unwrap();
        let config = make_config(dir.path());
        let store = Store::new(&config);
        store.ensure_initialized(&config).unwrap();

        let mut journal = store.load().unwrap();
        journal.log.push(Node::Phase(Phase::open("setup", "FAIL")));
        journal.open_phase = Some(42);
        store.save(&journal).unwrap();

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.open_phase, Some(0));
    }

    #[test]
    fn test_open_or_init_self_initializes() {
        let dir = tempdir().unwrap();
        let config = make_config(dir.path());
        let store = Store::new(&config);

        let journal = store.open_or_init(&config).unwrap();
        assert_eq!(journal.package, "bash");
        assert!(store.exists());
    }

    #[test]
    fn test_malformed_document_is_parse_error() {
        let dir = tempdir().unwrap();
        let config = make_config(dir.path());
        fs::write(&config.journal_path, "{ not json").unwrap();
        let store = Store::new(&config);
        let err = store.load().unwrap_err();
        assert!(matches!(err, JournalError::Malformed { .. }));
    }

    #[test]
    fn test_lock_acquire_and_release() {
        let dir = tempdir().unwrap();
        let config = make_config(dir.path());
        let store = Store::new(&config);

        {
            let lock = store.lock();
            assert!(lock.is_some());
        }
        // Released on drop; a second cycle can lock again.
        assert!(store.lock().is_some());
    }

    #[test]
    fn test_scan_plugins_lists_shell_files() {
        let dir = tempdir().unwrap();
        let plugin_dir = dir.path().join("plugins");
        fs::create_dir_all(&plugin_dir).unwrap();
        fs::write(plugin_dir.join("b.sh"), "#!/bin/sh\n").unwrap();
        fs::write(plugin_dir.join("a.sh"), "#!/bin/sh\n").unwrap();
        fs::write(plugin_dir.join("notes.txt"), "skip me").unwrap();

        let mut config = make_config(dir.path());
        config.plugin_dir = Some(plugin_dir);
        assert_eq!(scan_plugins(&config), vec!["a.sh", "b.sh"]);
    }
}
