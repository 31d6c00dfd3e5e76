//! Phase lifecycle operations.
//!
//! All mutation flows through the current open phase: the last phase in the
//! log container still flagged unfinished. Opening a phase while another is
//! unfinished is accepted (historical contract); finishing always closes the
//! most recently opened unfinished phase and re-derives the open-phase
//! reference from whatever remains.

use crate::errors::JournalError;
use crate::model::{
    now_stamp, scrub, Assertion, Journal, Message, Metric, Node, Package, Phase, Severity, PASS,
};

/// What `finish_phase` reports back for caller-side printing and exit codes.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSummary {
    pub result: String,
    pub score: u32,
    pub kind: String,
    pub name: String,
}

/// Append a new unfinished phase and point the open-phase reference at it.
pub fn open_phase(journal: &mut Journal, name: &str, kind: &str) {
    journal.log.push(Node::Phase(Phase::open(name, kind)));
    journal.open_phase = Some(journal.log.len() - 1);
}

/// Append an assertion to the open phase. Assertions are never attached to
/// the log container; without an open phase the call is refused.
pub fn add_assertion(
    journal: &mut Journal,
    message: &str,
    result: &str,
    command: Option<&str>,
) -> Result<(), JournalError> {
    let phase = journal
        .current_phase_mut()
        .ok_or(JournalError::NoOpenPhase)?;
    phase.children.push(Node::Assertion(Assertion {
        message: scrub(message),
        result: scrub(result),
        command: command.map(scrub),
    }));
    Ok(())
}

/// Append a log message to the open phase, or to the log container itself
/// when `attach_root` compatibility is enabled.
pub fn add_message(
    journal: &mut Journal,
    text: &str,
    severity: Severity,
    attach_root: bool,
) -> Result<(), JournalError> {
    let message = Node::Message(Message {
        text: scrub(text),
        severity,
    });
    push_to_target(journal, message, attach_root)
}

/// Append a metric, rejecting a duplicate name without touching the
/// document.
pub fn add_metric(
    journal: &mut Journal,
    kind: &str,
    name: &str,
    value: f64,
    tolerance: f64,
    attach_root: bool,
) -> Result<(), JournalError> {
    let name = scrub(name);
    let metric = Metric {
        kind: scrub(kind),
        name: name.clone(),
        value,
        tolerance,
    };
    match journal.current_phase_mut() {
        Some(phase) => {
            if phase.has_metric(&name) {
                return Err(JournalError::DuplicateMetricName { name });
            }
            phase.children.push(Node::Metric(metric));
            Ok(())
        }
        None if attach_root => {
            let duplicate = journal
                .log
                .iter()
                .any(|n| matches!(n, Node::Metric(m) if m.name == name));
            if duplicate {
                return Err(JournalError::DuplicateMetricName { name });
            }
            journal.log.push(Node::Metric(metric));
            Ok(())
        }
        None => Err(JournalError::NoOpenPhase),
    }
}

/// Append resolved package version records to the open phase.
pub fn add_packages(
    journal: &mut Journal,
    packages: Vec<Package>,
    attach_root: bool,
) -> Result<(), JournalError> {
    if journal.current_phase_mut().is_none() && !attach_root {
        return Err(JournalError::NoOpenPhase);
    }
    for package in packages {
        push_to_target(journal, Node::Package(package), attach_root)?;
    }
    Ok(())
}

/// Close the open phase: stamp its end time, recompute the tally, and
/// refresh both the run-level end timestamp and the open-phase reference.
pub fn finish_phase(journal: &mut Journal) -> Result<PhaseSummary, JournalError> {
    let idx = journal.last_unfinished().ok_or(JournalError::NoOpenPhase)?;
    let now = now_stamp();

    let Some(Node::Phase(phase)) = journal.log.get_mut(idx) else {
        return Err(JournalError::NoOpenPhase);
    };
    phase.end_time = now.clone();
    let (_, failed) = phase.tally();
    phase.score = failed;
    phase.result = if failed == 0 {
        PASS.to_string()
    } else {
        phase.kind.clone()
    };

    let summary = PhaseSummary {
        result: phase.result.clone(),
        score: failed,
        kind: phase.kind.clone(),
        name: phase.name.clone(),
    };

    journal.end_time = now;
    journal.refresh_open_phase();
    Ok(summary)
}

fn push_to_target(
    journal: &mut Journal,
    node: Node,
    attach_root: bool,
) -> Result<(), JournalError> {
    match journal.current_phase_mut() {
        Some(phase) => {
            phase.children.push(node);
            Ok(())
        }
        None if attach_root => {
            journal.log.push(node);
            Ok(())
        }
        None => Err(JournalError::NoOpenPhase),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FAIL;

    fn journal_with_phase(name: &str, kind: &str) -> Journal {
        let mut journal = Journal::default();
        open_phase(&mut journal, name, kind);
        journal
    }

    #[test]
    fn test_finish_empty_phase_passes() {
        let mut journal = journal_with_phase("p", "FAIL-severity-kind");
        let summary = finish_phase(&mut journal).unwrap();
        assert_eq!(summary.result, "PASS");
        assert_eq!(summary.score, 0);
        assert_eq!(summary.kind, "FAIL-severity-kind");
        assert_eq!(summary.name, "p");

        let phase = journal.phases().next().unwrap();
        assert!(!phase.end_time.is_empty());
        assert!(journal.open_phase.is_none());
    }

    #[test]
    fn test_finish_with_failures_scores_declared_kind() {
        let mut journal = journal_with_phase("checks", "FAIL-severity-kind");
        for _ in 0..3 {
            add_assertion(&mut journal, "fine", PASS, None).unwrap();
        }
        for _ in 0..2 {
            add_assertion(&mut journal, "broken", FAIL, None).unwrap();
        }
        let summary = finish_phase(&mut journal).unwrap();
        assert_eq!(summary.score, 2);
        assert_eq!(summary.result, "FAIL-severity-kind");
    }

    #[test]
    fn test_finish_refreshes_run_end_time() {
        let mut journal = journal_with_phase("p", "FAIL");
        journal.end_time = "2020-01-01 00:00:00 +0000".to_string();
        finish_phase(&mut journal).unwrap();
        assert_ne!(journal.end_time, "2020-01-01 00:00:00 +0000");
        assert_eq!(journal.end_time, journal.phases().next().unwrap().end_time);
    }

    #[test]
    fn test_assertion_requires_open_phase() {
        let mut journal = Journal::default();
        let err = add_assertion(&mut journal, "orphan", FAIL, None).unwrap_err();
        assert!(matches!(err, JournalError::NoOpenPhase));
        assert!(journal.log.is_empty());
    }

    #[test]
    fn test_message_requires_open_phase_by_default() {
        let mut journal = Journal::default();
        let err = add_message(&mut journal, "hi", Severity::Log, false).unwrap_err();
        assert!(matches!(err, JournalError::NoOpenPhase));
    }

    #[test]
    fn test_message_attach_root_compatibility() {
        let mut journal = Journal::default();
        add_message(&mut journal, "stray", Severity::Warning, true).unwrap();
        assert!(matches!(journal.log[0], Node::Message(_)));
    }

    #[test]
    fn test_assertion_command_recorded() {
        let mut journal = journal_with_phase("p", "FAIL");
        add_assertion(&mut journal, "ran it", PASS, Some("true")).unwrap();
        let phase = journal.phases().next().unwrap();
        match &phase.children[0] {
            Node::Assertion(a) => assert_eq!(a.command.as_deref(), Some("true")),
            other => panic!("expected assertion, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_metric_rejected_without_mutation() {
        let mut journal = journal_with_phase("perf", "FAIL");
        add_metric(&mut journal, "time", "latency", 12.5, 0.1, false).unwrap();
        let err = add_metric(&mut journal, "time", "latency", 99.0, 0.1, false).unwrap_err();
        assert!(matches!(err, JournalError::DuplicateMetricName { .. }));

        let phase = journal.phases().next().unwrap();
        assert_eq!(phase.children.len(), 1);
        match &phase.children[0] {
            Node::Metric(m) => assert_eq!(m.value, 12.5),
            other => panic!("expected metric, got {other:?}"),
        }
    }

    #[test]
    fn test_metric_names_scoped_per_phase() {
        let mut journal = journal_with_phase("one", "FAIL");
        add_metric(&mut journal, "time", "latency", 1.0, 0.0, false).unwrap();
        finish_phase(&mut journal).unwrap();

        open_phase(&mut journal, "two", "FAIL");
        add_metric(&mut journal, "time", "latency", 2.0, 0.0, false).unwrap();
    }

    #[test]
    fn test_interleaved_phases_finish_last_first() {
        let mut journal = Journal::default();
        open_phase(&mut journal, "outer", "FAIL");
        open_phase(&mut journal, "inner", "WARN");

        let first = finish_phase(&mut journal).unwrap();
        assert_eq!(first.name, "inner");
        // The older unfinished phase becomes current again.
        assert_eq!(journal.current_phase().unwrap().name, "outer");

        let second = finish_phase(&mut journal).unwrap();
        assert_eq!(second.name, "outer");
        assert!(journal.open_phase.is_none());
        assert!(matches!(
            finish_phase(&mut journal).unwrap_err(),
            JournalError::NoOpenPhase
        ));
    }

    #[test]
    fn test_add_packages_to_open_phase() {
        let mut journal = journal_with_phase("p", "FAIL");
        add_packages(
            &mut journal,
            vec![
                Package::installed("bash", "bash-5.2.26-1.x86_64"),
                Package::not_installed("zsh"),
            ],
            false,
        )
        .unwrap();
        let phase = journal.phases().next().unwrap();
        assert_eq!(phase.children.len(), 2);
    }

    #[test]
    fn test_add_packages_without_phase_fails_closed() {
        let mut journal = Journal::default();
        let err = add_packages(&mut journal, vec![Package::not_installed("zsh")], false)
            .unwrap_err();
        assert!(matches!(err, JournalError::NoOpenPhase));
        assert!(journal.log.is_empty());
    }
}
