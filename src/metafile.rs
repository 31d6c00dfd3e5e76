//! Batch compiler for the line-oriented metafile format.
//!
//! A metafile is the compact journal a shell run appends to: one record per
//! line, nesting expressed by leading spaces (one space per level), element
//! attributes as `--key=value` tokens with base64-encoded values, and a bare
//! `--` token introducing a base64 text payload. A line whose first token
//! starts with two dashes closes or updates the current element instead of
//! opening a new one.
//!
//! Compilation runs in three passes: tokenize lines, replay them through an
//! indentation-driven stack machine into a generic element tree, then
//! back-fill container timestamp ranges and lower the tree into the typed
//! document model so the aggregator and renderer work on it unchanged.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{debug, warn};

use crate::errors::JournalError;
use crate::model::{
    scrub, stamp_from_unix, Assertion, Journal, Message, Metric, Node, Package, Phase, Severity,
    FAIL, PASS, UNFINISHED,
};

/// One parsed element in the intermediate tree.
#[derive(Debug, Default, Clone)]
struct Element {
    name: String,
    line: usize,
    attrs: Vec<(String, String)>,
    content: String,
    timestamp: Option<String>,
    end_override: Option<String>,
    start_time: String,
    end_time: String,
    children: Vec<Element>,
}

impl Element {
    fn root() -> Self {
        Element {
            name: "journal".to_string(),
            ..Default::default()
        }
    }

    fn from_line(name: String, line: Line) -> Self {
        Element {
            name,
            line: line.number,
            attrs: line.attrs,
            content: line.content.unwrap_or_default(),
            timestamp: line.timestamp,
            end_override: None,
            start_time: String::new(),
            end_time: String::new(),
            children: Vec::new(),
        }
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn set_attr(&mut self, key: String, value: String) {
        if let Some(slot) = self.attrs.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.attrs.push((key, value));
        }
    }
}

/// One tokenized metafile line. `name == None` marks a close/update line.
#[derive(Debug, PartialEq)]
struct Line {
    number: usize,
    indent: usize,
    name: Option<String>,
    attrs: Vec<(String, String)>,
    timestamp: Option<String>,
    content: Option<String>,
}

impl Line {
    /// A close line carrying nothing to apply is ignored entirely.
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.attrs.is_empty()
            && self.timestamp.is_none()
            && self.content.is_none()
    }
}

/// Strip one surrounding quote pair, when present.
fn strip_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Decode a base64 value, keeping the raw text when it is not valid base64,
/// does not decode to UTF-8, or decodes to control-character noise (short
/// plain words like `FAIL` are valid base64 by accident). Journaling repairs
/// encoding anomalies instead of aborting on them.
fn decode_lenient(raw: &str) -> String {
    if let Ok(bytes) = BASE64.decode(raw) {
        if let Ok(text) = String::from_utf8(bytes) {
            if text == scrub(&text) {
                return text;
            }
        }
    }
    raw.to_string()
}

/// Tokenize one raw line. `None` means the line holds nothing (blank or
/// comment-only).
fn parse_line(raw: &str, number: usize) -> Result<Option<Line>, JournalError> {
    // Everything after '#' is comment.
    let stripped = raw.split('#').next().unwrap_or("");
    let indent = stripped.chars().take_while(|c| c.is_whitespace()).count();
    let tokens: Vec<&str> = stripped.split_whitespace().collect();
    if tokens.is_empty() {
        return Ok(None);
    }

    let (name, rest): (Option<String>, &[&str]) = if tokens[0].starts_with("--") {
        // Close/update line; a bare leading "--" is just the marker.
        if tokens[0] == "--" {
            (None, &tokens[1..])
        } else {
            (None, &tokens[..])
        }
    } else {
        (Some(tokens[0].to_string()), &tokens[1..])
    };

    let mut attrs = Vec::new();
    let mut timestamp = None;
    let mut content = None;
    let mut content_next = false;

    for token in rest {
        if content_next {
            content = Some(scrub(&decode_lenient(strip_quotes(token))));
            break;
        }
        if *token == "--" {
            content_next = true;
            continue;
        }
        if let Some(value) = token.strip_prefix("--timestamp=") {
            let value = strip_quotes(value);
            let secs: i64 = value.parse().map_err(|_| JournalError::MetafileParse {
                line: number,
                message: format!("timestamp '{value}' is not an integer"),
            })?;
            let stamp = stamp_from_unix(secs).ok_or_else(|| JournalError::MetafileParse {
                line: number,
                message: format!("timestamp {secs} is out of range"),
            })?;
            timestamp = Some(stamp);
            continue;
        }
        if let Some(body) = token.strip_prefix("--") {
            if let Some(eq) = body.find('=') {
                let key = &body[..eq];
                if !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric()) {
                    let value = scrub(&decode_lenient(strip_quotes(&body[eq + 1..])));
                    attrs.push((key.to_string(), value));
                    continue;
                }
            }
        }
        debug!(line = number, token, "ignoring unrecognized metafile token");
    }

    Ok(Some(Line {
        number,
        indent,
        name,
        attrs,
        timestamp,
        content,
    }))
}

fn underflow(line: usize) -> JournalError {
    JournalError::MetafileParse {
        line,
        message: "indentation underflow: no open element at this level".to_string(),
    }
}

/// Apply a close/update line to the element it closes: attribute updates in
/// place, and the line's timestamp (when given) becomes the end time.
fn apply_close(element: &mut Element, line: Line) {
    for (key, value) in line.attrs {
        element.set_attr(key, value);
    }
    if let Some(stamp) = line.timestamp {
        element.end_override = Some(stamp);
    }
    if line.content.is_some() {
        debug!(line = line.number, "ignoring content on close line");
    }
}

/// Replay tokenized lines through the indentation stack machine.
fn build_tree(input: &str) -> Result<Element, JournalError> {
    let mut old_indent: i64 = -1;
    let mut previous = Element::root();
    let mut stack: Vec<Element> = Vec::new();

    for (idx, raw) in input.lines().enumerate() {
        let number = idx + 1;
        let Some(line) = parse_line(raw, number)? else {
            continue;
        };
        if line.is_empty() {
            continue;
        }
        let indent = line.indent as i64;

        if indent > old_indent {
            let Some(name) = line.name.clone() else {
                return Err(JournalError::MetafileParse {
                    line: number,
                    message: "close line without an open element".to_string(),
                });
            };
            stack.push(std::mem::take(&mut previous));
            previous = Element::from_line(name, line);
        } else if indent == old_indent {
            match line.name.clone() {
                None => apply_close(&mut previous, line),
                Some(name) => {
                    let parent = stack.last_mut().ok_or_else(|| underflow(number))?;
                    parent.children.push(std::mem::take(&mut previous));
                    previous = Element::from_line(name, line);
                }
            }
        } else {
            // One pop per space of dedent: indentation is one space per level.
            let diff = (old_indent - indent) as usize;
            for _ in 0..diff {
                let mut parent = stack.pop().ok_or_else(|| underflow(number))?;
                parent.children.push(std::mem::take(&mut previous));
                previous = parent;
            }
            match line.name.clone() {
                None => apply_close(&mut previous, line),
                Some(name) => {
                    let parent = stack.last_mut().ok_or_else(|| underflow(number))?;
                    parent.children.push(std::mem::take(&mut previous));
                    previous = Element::from_line(name, line);
                }
            }
        }
        old_indent = indent;
    }

    // Close everything still open, up to the root.
    while let Some(mut parent) = stack.pop() {
        parent.children.push(std::mem::take(&mut previous));
        previous = parent;
    }
    Ok(previous)
}

/// Post-order back-fill of container timestamp ranges: start/end come from
/// the first and last `timestamp` attribute among an element's descendants
/// (document order), the end overridden by a closing-line timestamp.
fn backfill(element: &mut Element) {
    for child in &mut element.children {
        backfill(child);
    }
    let mut first = None;
    let mut last = None;
    collect_range(element, &mut first, &mut last);
    element.start_time = first.unwrap_or_default();
    element.end_time = element
        .end_override
        .clone()
        .or(last)
        .unwrap_or_default();
}

fn collect_range(element: &Element, first: &mut Option<String>, last: &mut Option<String>) {
    if let Some(stamp) = &element.timestamp {
        if first.is_none() {
            *first = Some(stamp.clone());
        }
        *last = Some(stamp.clone());
    }
    for child in &element.children {
        collect_range(child, first, last);
    }
}

/// Lower the generic element tree into the typed document model.
fn lower_journal(root: Element) -> Result<Journal, JournalError> {
    let mut journal = Journal {
        start_time: root.start_time.clone(),
        end_time: root.end_time.clone(),
        ..Default::default()
    };

    for child in root.children {
        match child.name.as_str() {
            "test_id" => journal.test_id = Some(child.content).filter(|s| !s.is_empty()),
            "package" => journal.package = child.content,
            "testname" => journal.test_name = child.content,
            "release" => journal.release = child.content,
            "hostname" => journal.hostname = child.content,
            "arch" => journal.arch = child.content,
            "hw_cpu" => journal.hw_cpu = child.content,
            "hw_ram" => journal.hw_ram = child.content,
            "hw_hdd" => journal.hw_hdd = child.content,
            "purpose" => journal.purpose = child.content,
            "plugin" => journal.plugins.push(child.content),
            "pkgversion" => {
                let package = lower_package(child);
                journal.packages.push(package);
            }
            "harness" => journal.harness = Some(lower_package(child)),
            "log" => {
                for node in child.children {
                    let lowered = lower_node(node)?;
                    journal.log.push(lowered);
                }
            }
            // Phases written without an enclosing log container still land
            // in the log.
            "phase" | "test" | "message" | "metric" => {
                let lowered = lower_node(child)?;
                journal.log.push(lowered);
            }
            other => {
                return Err(JournalError::MetafileParse {
                    line: child.line,
                    message: format!("unknown element '{other}'"),
                });
            }
        }
    }

    journal.refresh_open_phase();
    Ok(journal)
}

fn lower_node(element: Element) -> Result<Node, JournalError> {
    match element.name.as_str() {
        "phase" => {
            let mut phase = Phase {
                name: element.attr("name").unwrap_or_default().to_string(),
                kind: element.attr("type").unwrap_or_default().to_string(),
                result: UNFINISHED.to_string(),
                start_time: element.start_time.clone(),
                end_time: element.end_time.clone(),
                score: 0,
                children: Vec::new(),
            };
            for child in element.children {
                if child.name == "phase" {
                    return Err(JournalError::MetafileParse {
                        line: child.line,
                        message: "phases do not nest".to_string(),
                    });
                }
                phase.children.push(lower_node(child)?);
            }
            // Same rule as finishing a phase incrementally: the raw
            // assertion tally decides, whatever attributes the lines had.
            let (_, failed) = phase.tally();
            phase.score = failed;
            phase.result = if failed == 0 {
                PASS.to_string()
            } else {
                phase.kind.clone()
            };
            Ok(Node::Phase(phase))
        }
        "test" => Ok(Node::Assertion(Assertion {
            message: element.content.clone(),
            result: element
                .attr("result")
                .filter(|r| !r.is_empty())
                .unwrap_or(FAIL)
                .to_string(),
            command: element.attr("command").map(|c| c.to_string()),
        })),
        "message" => {
            let severity = match element.attr("severity") {
                Some(raw) => raw.parse().unwrap_or_else(|_| {
                    warn!(line = element.line, severity = raw, "invalid severity, defaulting to LOG");
                    Severity::Log
                }),
                None => Severity::Log,
            };
            Ok(Node::Message(Message {
                text: element.content,
                severity,
            }))
        }
        "metric" => {
            let value: f64 =
                element
                    .content
                    .trim()
                    .parse()
                    .map_err(|_| JournalError::MetafileParse {
                        line: element.line,
                        message: format!("metric value '{}' is not numeric", element.content),
                    })?;
            let tolerance = element
                .attr("tolerance")
                .and_then(|t| t.trim().parse().ok())
                .unwrap_or(0.0);
            Ok(Node::Metric(Metric {
                kind: element.attr("type").unwrap_or_default().to_string(),
                name: element.attr("name").unwrap_or_default().to_string(),
                value,
                tolerance,
            }))
        }
        "pkgversion" => Ok(Node::Package(lower_package(element))),
        other => Err(JournalError::MetafileParse {
            line: element.line,
            message: format!("unknown element '{other}'"),
        }),
    }
}

fn lower_package(element: Element) -> Package {
    let name = element.attr("name").unwrap_or_default().to_string();
    let version = Some(element.content).filter(|c| !c.is_empty());
    Package { name, version }
}

/// Compile a full metafile into a journal document.
pub fn compile(input: &str) -> Result<Journal, JournalError> {
    let mut root = build_tree(input)?;
    backfill(&mut root);
    lower_journal(root)
}
