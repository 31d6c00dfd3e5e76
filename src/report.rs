//! Read-only consumers of the journal: pass/fail aggregation and the
//! human-readable transcript.
//!
//! The aggregator works from the raw assertion tally, never from the stored
//! phase results, and clamps to the process-exit-code domain. The renderer
//! mirrors the journal structure: environment header, one boxed section per
//! phase, and an overall verdict. PASS/FAIL tags are colorized only when
//! stdout is an interactive terminal (`console` handles the detection).

use std::io::{self, Write};

use console::style;

use crate::errors::JournalError;
use crate::model::{now_stamp, parse_stamp, Journal, Node, Phase, Severity, FAIL, PASS};

/// Failure counts are reported as process exit codes, so they clamp here.
pub const SCORE_CAP: u32 = 255;

/// Total failed assertions across every phase, clamped. The raw tally is
/// authoritative; phase `result` fields are ignored.
pub fn test_state(journal: &Journal) -> u32 {
    let failed: u32 = journal.phases().map(|p| p.tally().1).sum();
    failed.min(SCORE_CAP)
}

/// Failed assertions in the current open phase, clamped. With the legacy
/// root-attach mode, assertions stranded directly in the log container are
/// counted when no phase is open.
pub fn phase_state(journal: &Journal, attach_root: bool) -> Result<u32, JournalError> {
    match journal.current_phase() {
        Some(phase) => Ok(phase.tally().1.min(SCORE_CAP)),
        None if attach_root => {
            let failed = journal
                .log
                .iter()
                .filter(|n| matches!(n, Node::Assertion(a) if a.failed()))
                .count() as u32;
            Ok(failed.min(SCORE_CAP))
        }
        None => Err(JournalError::NoOpenPhase),
    }
}

/// How `dump` serializes the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpStyle {
    Raw,
    Pretty,
}

/// The full document as JSON, compact or pretty-printed.
pub fn dump(journal: &Journal, style: DumpStyle) -> serde_json::Result<String> {
    match style {
        DumpStyle::Raw => serde_json::to_string(journal),
        DumpStyle::Pretty => serde_json::to_string_pretty(journal),
    }
}

fn paint(prefix: &str) -> String {
    let centered = format!("{:^10}", prefix);
    match prefix {
        "PASS" => style(centered).green().to_string(),
        "FAIL" => style(centered).red().to_string(),
        "INFO" => style(centered).blue().to_string(),
        "WARNING" => style(centered).yellow().to_string(),
        _ => centered,
    }
}

/// One transcript line per message line, `:: [ PREFIX ] :: text`.
pub fn log_line<W: Write>(out: &mut W, prefix: &str, message: &str) -> io::Result<()> {
    for line in message.split('\n') {
        writeln!(out, ":: [{}] :: {}", paint(prefix), line)?;
    }
    Ok(())
}

/// Boxed section header.
pub fn head_line<W: Write>(out: &mut W, message: &str) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "{}", ":".repeat(80))?;
    log_line(out, "LOG", message)?;
    writeln!(out, "{}", ":".repeat(80))?;
    writeln!(out)
}

/// Phase wall-clock seconds, from the stored timestamp format. An open
/// phase is measured against now. `None` when a stamp does not re-parse
/// (timezone anomalies during the run are a known way to get there).
fn phase_duration(phase: &Phase) -> Option<i64> {
    let start = parse_stamp(&phase.start_time)?;
    let end = if phase.end_time.is_empty() {
        parse_stamp(&now_stamp())?
    } else {
        parse_stamp(&phase.end_time)?
    };
    Some((end - start).num_seconds())
}

fn format_duration(total: i64) -> String {
    let mut secs = total;
    let mut out = String::new();
    if secs / 3600 > 0 {
        out.push_str(&format!("{}h ", secs / 3600));
        secs %= 3600;
    }
    if secs / 60 > 0 {
        out.push_str(&format!("{}m ", secs / 60));
        secs %= 60;
    }
    out.push_str(&format!("{}s", secs));
    out
}

/// Render one phase section. Returns its failed-assertion count.
fn render_phase<W: Write>(
    out: &mut W,
    phase: &Phase,
    threshold: Severity,
) -> io::Result<u32> {
    head_line(out, &phase.name)?;

    let mut passed = 0u32;
    let mut failed = 0u32;
    for node in &phase.children {
        match node {
            Node::Message(m) => {
                if m.severity.passes(threshold) {
                    log_line(out, m.severity.as_str(), &m.text)?;
                }
            }
            Node::Assertion(a) => {
                if a.failed() {
                    failed += 1;
                    log_line(out, FAIL, &a.message)?;
                } else {
                    passed += 1;
                    log_line(out, PASS, &a.message)?;
                }
            }
            Node::Metric(m) => {
                log_line(out, "METRIC", &format!("{}: {}", m.name, m.value))?;
            }
            // Package records and nested phases are not part of a phase
            // transcript.
            _ => {}
        }
    }

    let duration = match phase_duration(phase) {
        Some(secs) => format_duration(secs),
        None => "duration unknown (error when computing)".to_string(),
    };
    log_line(out, "LOG", &format!("Duration: {}", duration))?;
    log_line(
        out,
        "LOG",
        &format!("Assertions: {} good, {} bad", passed, failed),
    )?;
    log_line(out, &phase.result, &format!("RESULT: {}", phase.name))?;
    Ok(failed)
}

/// Render the whole transcript: environment header, filtered per-phase
/// sections, and the overall verdict. `full` adds the hardware fields.
pub fn render_transcript<W: Write>(
    journal: &Journal,
    threshold: Severity,
    full: bool,
    out: &mut W,
) -> io::Result<()> {
    head_line(out, "TEST PROTOCOL")?;

    if let Some(test_id) = &journal.test_id {
        log_line(out, "LOG", &format!("Test run ID   : {}", test_id))?;
    }
    log_line(out, "LOG", &format!("Package       : {}", journal.package))?;
    for package in &journal.packages {
        log_line(out, "LOG", &format!("Installed     : {}", package.describe()))?;
    }
    if let Some(harness) = &journal.harness {
        log_line(out, "LOG", &format!("Harness       : {}", harness.describe()))?;
    }
    log_line(out, "LOG", &format!("Test started  : {}", journal.start_time))?;
    log_line(out, "LOG", &format!("Test finished : {}", journal.end_time))?;
    log_line(out, "LOG", &format!("Test name     : {}", journal.test_name))?;
    log_line(out, "LOG", &format!("Distro        : {}", journal.release))?;
    log_line(out, "LOG", &format!("Hostname      : {}", journal.hostname))?;
    log_line(out, "LOG", &format!("Architecture  : {}", journal.arch))?;
    if full {
        log_line(out, "LOG", &format!("CPUs          : {}", journal.hw_cpu))?;
        log_line(out, "LOG", &format!("RAM size      : {}", journal.hw_ram))?;
        log_line(out, "LOG", &format!("HDD size      : {}", journal.hw_hdd))?;
    }
    for plugin in &journal.plugins {
        log_line(out, "LOG", &format!("Plugin        : {}", plugin))?;
    }
    if !journal.purpose.is_empty() {
        head_line(out, "Test description")?;
        writeln!(out, "{}", textwrap::fill(&journal.purpose, 80))?;
    }

    let mut phases_processed = 0u32;
    let mut phases_failed = 0u32;
    for node in &journal.log {
        match node {
            Node::Message(m) => {
                if m.severity.passes(threshold) {
                    log_line(out, m.severity.as_str(), &m.text)?;
                }
            }
            Node::Assertion(a) => {
                // Assertions belong in phases; flag strays loudly.
                log_line(out, "WARNING", "Assertion outside any phase")?;
                let prefix = if a.failed() { FAIL } else { PASS };
                log_line(out, prefix, &a.message)?;
            }
            Node::Metric(m) => {
                log_line(out, "METRIC", &format!("{}: {}", m.name, m.value))?;
            }
            Node::Phase(phase) => {
                phases_processed += 1;
                if render_phase(out, phase, threshold)? > 0 {
                    phases_failed += 1;
                }
            }
            Node::Package(_) => {}
        }
    }

    head_line(out, &journal.test_name)?;
    log_line(
        out,
        "LOG",
        &format!(
            "Phases: {} good, {} bad",
            phases_processed - phases_failed,
            phases_failed
        ),
    )?;
    let verdict = if phases_failed == 0 { PASS } else { FAIL };
    log_line(out, verdict, &format!("RESULT: {}", journal.test_name))
}
