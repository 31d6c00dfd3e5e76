//! The typed document model for a persisted test-run journal.
//!
//! A journal is a flat tree: run-level metadata, then one `log` container
//! holding `Phase` nodes, each of which holds the records produced while the
//! phase was open. Node kinds are an explicit tagged enum so consumers match
//! on a discriminant instead of comparing tag-name strings.
//!
//! The whole tree is serde-derived; the persisted file is exactly this
//! structure serialized as JSON.

use chrono::{DateTime, FixedOffset, Local, TimeZone};
use serde::{Deserialize, Serialize};

/// Timestamp format used everywhere in the document. The numeric offset
/// (`%z`) round-trips through chrono, which the duration computation relies
/// on; stamps that fail to re-parse degrade to an "unknown" duration.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// Lifecycle state of a phase that has been opened but not finished.
pub const UNFINISHED: &str = "unfinished";
/// Result recorded for assertions and phases with nothing failed.
pub const PASS: &str = "PASS";
/// The one assertion result that counts against a phase's score.
pub const FAIL: &str = "FAIL";

/// Current local time in the journal's timestamp format.
pub fn now_stamp() -> String {
    Local::now().format(TIME_FORMAT).to_string()
}

/// Re-parse a stored timestamp. `None` covers both empty fields and stamps
/// mangled by timezone anomalies in the observed run.
pub fn parse_stamp(stamp: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(stamp, TIME_FORMAT).ok()
}

/// Format a unix-seconds value as a journal timestamp, local time.
pub fn stamp_from_unix(secs: i64) -> Option<String> {
    Local
        .timestamp_opt(secs, 0)
        .single()
        .map(|dt| dt.format(TIME_FORMAT).to_string())
}

/// Drop characters that must never enter the document: C0 controls other
/// than tab/newline/carriage-return, plus the U+FFFE/U+FFFF non-characters.
/// Free text is repaired, never rejected.
pub fn scrub(text: &str) -> String {
    text.chars()
        .filter(|&c| {
            !matches!(c,
                '\u{00}'..='\u{08}'
                | '\u{0b}'
                | '\u{0c}'
                | '\u{0e}'..='\u{1f}'
                | '\u{fffe}'
                | '\u{ffff}')
        })
        .collect()
}

/// Classification of a log message. Ordering is DEBUG < INFO < WARNING <
/// ERROR < FATAL < LOG; because LOG ranks above every threshold it is always
/// rendered, which is the documented contract, not an accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
    Log,
}

impl Severity {
    pub fn rank(self) -> u8 {
        match self {
            Severity::Debug => 0,
            Severity::Info => 1,
            Severity::Warning => 2,
            Severity::Error => 3,
            Severity::Fatal => 4,
            Severity::Log => 5,
        }
    }

    /// Whether a message of this severity is rendered under `threshold`.
    pub fn passes(self, threshold: Severity) -> bool {
        self.rank() >= threshold.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
            Severity::Log => "LOG",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Severity::Debug),
            "INFO" => Ok(Severity::Info),
            "WARNING" => Ok(Severity::Warning),
            "ERROR" => Ok(Severity::Error),
            "FATAL" => Ok(Severity::Fatal),
            "LOG" => Ok(Severity::Log),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// A free-text log message recorded inside a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    pub severity: Severity,
}

/// A single recorded test check. Any result other than `FAIL` tallies as a
/// pass; the result string is extensible on purpose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    pub message: String,
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl Assertion {
    pub fn failed(&self) -> bool {
        self.result == FAIL
    }
}

/// A named numeric measurement. Names are unique within their owning phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub kind: String,
    pub name: String,
    pub value: f64,
    pub tolerance: f64,
}

/// A package name with its resolved version, or `None` when the package is
/// not installed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Package {
    pub fn installed(name: impl Into<String>, version: impl Into<String>) -> Self {
        Package {
            name: name.into(),
            version: Some(version.into()),
        }
    }

    pub fn not_installed(name: impl Into<String>) -> Self {
        Package {
            name: name.into(),
            version: None,
        }
    }

    /// Human-readable form used by the transcript renderer.
    pub fn describe(&self) -> String {
        match &self.version {
            Some(v) => v.clone(),
            None => format!("{} not installed", self.name),
        }
    }
}

/// A named span of test execution with its own tally and lifecycle state.
///
/// `result` is `"unfinished"` while open, then `"PASS"` or the declared
/// `kind` once finished. `score` is the count of failed assertions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    pub kind: String,
    pub result: String,
    pub start_time: String,
    pub end_time: String,
    pub score: u32,
    #[serde(default)]
    pub children: Vec<Node>,
}

impl Phase {
    /// A freshly opened phase: unfinished, started now, no end time yet.
    pub fn open(name: &str, kind: &str) -> Self {
        Phase {
            name: scrub(name),
            kind: scrub(kind),
            result: UNFINISHED.to_string(),
            start_time: now_stamp(),
            end_time: String::new(),
            score: 0,
            children: Vec::new(),
        }
    }

    pub fn is_unfinished(&self) -> bool {
        self.result == UNFINISHED
    }

    /// Count (passed, failed) across assertion children. The raw tally is
    /// authoritative; the stored `result` field is never consulted.
    pub fn tally(&self) -> (u32, u32) {
        let mut passed = 0;
        let mut failed = 0;
        for node in &self.children {
            if let Node::Assertion(a) = node {
                if a.failed() {
                    failed += 1;
                } else {
                    passed += 1;
                }
            }
        }
        (passed, failed)
    }

    pub fn has_metric(&self, name: &str) -> bool {
        self.children
            .iter()
            .any(|n| matches!(n, Node::Metric(m) if m.name == name))
    }
}

/// One record inside the log container or a phase, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    Phase(Phase),
    Message(Message),
    Assertion(Assertion),
    Metric(Metric),
    Package(Package),
}

impl Node {
    pub fn as_phase(&self) -> Option<&Phase> {
        match self {
            Node::Phase(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_phase_mut(&mut self) -> Option<&mut Phase> {
        match self {
            Node::Phase(p) => Some(p),
            _ => None,
        }
    }
}

/// The root record: run-level metadata plus the ordered log container.
///
/// `open_phase` is the explicit reference to the phase currently accepting
/// records. It is revalidated against the "last phase flagged unfinished"
/// rule whenever the document is loaded, so documents written by older
/// revisions or by the metafile compiler stay consistent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Journal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
    #[serde(default)]
    pub package: String,
    #[serde(default)]
    pub packages: Vec<Package>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub harness: Option<Package>,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
    #[serde(default)]
    pub test_name: String,
    #[serde(default)]
    pub release: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub hw_cpu: String,
    #[serde(default)]
    pub hw_ram: String,
    #[serde(default)]
    pub hw_hdd: String,
    #[serde(default)]
    pub plugins: Vec<String>,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub log: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_phase: Option<usize>,
}

impl Journal {
    pub fn phases(&self) -> impl Iterator<Item = &Phase> {
        self.log.iter().filter_map(Node::as_phase)
    }

    /// Index of the last phase still flagged unfinished, scanning the log
    /// container one level deep. Phases never nest, so one level is the
    /// whole story.
    pub fn last_unfinished(&self) -> Option<usize> {
        self.log.iter().enumerate().rev().find_map(|(i, n)| match n {
            Node::Phase(p) if p.is_unfinished() => Some(i),
            _ => None,
        })
    }

    /// The stored open-phase index when it still points at an unfinished
    /// phase, otherwise the scan result.
    fn open_index(&self) -> Option<usize> {
        self.open_phase
            .filter(|&i| matches!(self.log.get(i), Some(Node::Phase(p)) if p.is_unfinished()))
            .or_else(|| self.last_unfinished())
    }

    pub fn current_phase(&self) -> Option<&Phase> {
        self.open_index().and_then(|i| self.log[i].as_phase())
    }

    pub fn current_phase_mut(&mut self) -> Option<&mut Phase> {
        let idx = self.open_index()?;
        self.log[idx].as_phase_mut()
    }

    /// Re-derive `open_phase` from the log contents. Called after load and
    /// after any operation that can close a phase.
    pub fn refresh_open_phase(&mut self) {
        self.open_phase = self.last_unfinished();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Debug.rank() < Severity::Info.rank());
        assert!(Severity::Info.rank() < Severity::Warning.rank());
        assert!(Severity::Warning.rank() < Severity::Error.rank());
        assert!(Severity::Error.rank() < Severity::Fatal.rank());
        assert!(Severity::Fatal.rank() < Severity::Log.rank());
    }

    #[test]
    fn test_severity_filter_log_exception() {
        // LOG outranks every threshold, so it always renders.
        assert!(Severity::Log.passes(Severity::Warning));
        assert!(Severity::Log.passes(Severity::Fatal));
        assert!(!Severity::Debug.passes(Severity::Warning));
        assert!(!Severity::Info.passes(Severity::Warning));
        assert!(Severity::Warning.passes(Severity::Warning));
        assert!(Severity::Error.passes(Severity::Warning));
    }

    #[test]
    fn test_severity_parse_case_insensitive() {
        assert_eq!("warning".parse::<Severity>().unwrap(), Severity::Warning);
        assert_eq!("LOG".parse::<Severity>().unwrap(), Severity::Log);
        assert!("verbose".parse::<Severity>().is_err());
    }

    #[test]
    fn test_scrub_drops_control_characters() {
        assert_eq!(scrub("he\u{01}llo\u{0b}"), "hello");
        assert_eq!(scrub("tab\tand\nnewline\r"), "tab\tand\nnewline\r");
        assert_eq!(scrub("end\u{ffff}"), "end");
    }

    #[test]
    fn test_stamp_round_trip() {
        let stamp = now_stamp();
        assert!(parse_stamp(&stamp).is_some());
        assert!(parse_stamp("").is_none());
        assert!(parse_stamp("2026-02-30 99:00:00").is_none());
    }

    #[test]
    fn test_phase_tally_counts_only_fail_as_failed() {
        let mut phase = Phase::open("setup", "FAIL");
        phase.children.push(Node::Assertion(Assertion {
            message: "a".into(),
            result: PASS.into(),
            command: None,
        }));
        phase.children.push(Node::Assertion(Assertion {
            message: "b".into(),
            result: FAIL.into(),
            command: None,
        }));
        // An unrecognized result string is extensible and counts as a pass.
        phase.children.push(Node::Assertion(Assertion {
            message: "c".into(),
            result: "SKIP".into(),
            command: None,
        }));
        phase.children.push(Node::Message(Message {
            text: "noise".into(),
            severity: Severity::Log,
        }));
        assert_eq!(phase.tally(), (2, 1));
    }

    #[test]
    fn test_open_phase_lookup_returns_last_unfinished() {
        let mut journal = Journal::default();
        let mut first = Phase::open("first", "FAIL");
        first.result = PASS.to_string();
        journal.log.push(Node::Phase(first));
        journal.log.push(Node::Phase(Phase::open("second", "FAIL")));
        journal.log.push(Node::Phase(Phase::open("third", "WARN")));
        journal.refresh_open_phase();
        assert_eq!(journal.open_phase, Some(2));
        assert_eq!(journal.current_phase().unwrap().name, "third");
    }

    #[test]
    fn test_stale_open_phase_index_falls_back_to_scan() {
        let mut journal = Journal::default();
        journal.log.push(Node::Phase(Phase::open("only", "FAIL")));
        journal.open_phase = Some(7);
        assert_eq!(journal.current_phase().unwrap().name, "only");
    }

    #[test]
    fn test_node_serde_round_trip_keeps_discriminant() {
        let node = Node::Metric(Metric {
            kind: "perf".to_string(),
            name: "latency".into(),
            value: 12.5,
            tolerance: 0.5,
        });
        let json = serde_json::to_string(&node).unwrap();
        assert!(json.contains("\"node\":\"metric\""));
        let parsed: Node = serde_json::from_str(&json).unwrap();
        assert_eq!(node, parsed);
    }

    #[test]
    fn test_journal_serde_defaults_tolerate_missing_fields() {
        let journal: Journal = serde_json::from_str(r#"{"package":"bash"}"#).unwrap();
        assert_eq!(journal.package, "bash");
        assert!(journal.log.is_empty());
        assert!(journal.open_phase.is_none());
    }
}
