//! CLI command implementations.
//!
//! Each handler is one full load -> mutate -> save cycle against the
//! configured journal, run under the advisory lock, and returns the process
//! exit code for `main` to report. State never survives an invocation; the
//! persisted document is the only memory between commands.

use std::io::{self, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};

use journ::config::Config;
use journ::model::Severity;
use journ::report::{self, DumpStyle};
use journ::store::Store;
use journ::{ledger, metafile, pkg};

pub fn cmd_init(config: &Config) -> Result<i32> {
    let store = Store::new(config);
    let _lock = store.lock();
    let created = store.ensure_initialized(config)?;
    if created {
        println!("Journal initialized at {}", config.journal_path.display());
    } else {
        println!(
            "Journal already initialized at {}",
            config.journal_path.display()
        );
    }
    Ok(0)
}

pub fn cmd_addphase(config: &Config, name: &str, kind: &str) -> Result<i32> {
    let store = Store::new(config);
    let _lock = store.lock();
    let mut journal = store.open_or_init(config)?;
    ledger::open_phase(&mut journal, name, kind);
    store.save(&journal)?;

    let mut out = io::stdout().lock();
    report::head_line(&mut out, name)?;
    Ok(0)
}

pub fn cmd_log(config: &Config, message: &str, severity: Severity) -> Result<i32> {
    let store = Store::new(config);
    let _lock = store.lock();
    let mut journal = store.open_or_init(config)?;
    ledger::add_message(&mut journal, message, severity, config.attach_root)?;
    store.save(&journal)?;
    Ok(0)
}

pub fn cmd_test(
    config: &Config,
    message: &str,
    result: &str,
    command: Option<&str>,
) -> Result<i32> {
    let store = Store::new(config);
    let _lock = store.lock();
    let mut journal = store.open_or_init(config)?;
    ledger::add_assertion(&mut journal, message, result, command)?;
    store.save(&journal)?;

    let mut out = io::stdout().lock();
    report::log_line(&mut out, result, message)?;
    Ok(0)
}

pub fn cmd_metric(
    config: &Config,
    kind: &str,
    name: &str,
    value: f64,
    tolerance: f64,
) -> Result<i32> {
    let store = Store::new(config);
    let _lock = store.lock();
    let mut journal = store.open_or_init(config)?;
    ledger::add_metric(&mut journal, kind, name, value, tolerance, config.attach_root)?;
    store.save(&journal)?;
    Ok(0)
}

pub fn cmd_finphase(config: &Config) -> Result<i32> {
    let store = Store::new(config);
    let _lock = store.lock();
    let mut journal = store.open_or_init(config)?;
    let summary = ledger::finish_phase(&mut journal)?;
    store.save(&journal)?;

    println!("{}:{}:{}", summary.kind, summary.result, summary.name);
    Ok(summary.score.min(report::SCORE_CAP) as i32)
}

pub fn cmd_teststate(config: &Config) -> Result<i32> {
    let store = Store::new(config);
    let _lock = store.lock();
    let journal = store.open_or_init(config)?;
    Ok(report::test_state(&journal) as i32)
}

pub fn cmd_phasestate(config: &Config) -> Result<i32> {
    let store = Store::new(config);
    let _lock = store.lock();
    let journal = store.open_or_init(config)?;
    Ok(report::phase_state(&journal, config.attach_root)? as i32)
}

pub fn cmd_rpm(config: &Config, package: &str) -> Result<i32> {
    let store = Store::new(config);
    let _lock = store.lock();
    let mut journal = store.open_or_init(config)?;
    let records = pkg::resolve(package);
    ledger::add_packages(&mut journal, records, config.attach_root)?;
    store.save(&journal)?;
    Ok(0)
}

pub fn cmd_dump(config: &Config, style: DumpStyle) -> Result<i32> {
    let store = Store::new(config);
    let _lock = store.lock();
    let journal = store.open_or_init(config)?;
    let text = report::dump(&journal, style).context("Failed to serialize journal")?;
    println!("{}", text);
    Ok(0)
}

pub fn cmd_printlog(config: &Config, severity: Severity, full: bool) -> Result<i32> {
    let store = Store::new(config);
    let _lock = store.lock();
    let journal = store.open_or_init(config)?;
    let mut out = io::stdout().lock();
    report::render_transcript(&journal, severity, full, &mut out)?;
    out.flush()?;
    Ok(0)
}

/// Compile a metafile (file or stdin) into a journal document, saving it to
/// the configured path when one is set and printing it otherwise.
pub fn cmd_compile(metafile: Option<&Path>, config: Option<&Config>) -> Result<i32> {
    let input = match metafile {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read metafile {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read metafile from stdin")?;
            buffer
        }
    };

    let journal = metafile::compile(&input)?;

    match config {
        Some(config) => {
            let store = Store::new(config);
            let _lock = store.lock();
            store.save(&journal)?;
        }
        None => {
            let text = report::dump(&journal, DumpStyle::Pretty)
                .context("Failed to serialize journal")?;
            println!("{}", text);
        }
    }
    Ok(0)
}
