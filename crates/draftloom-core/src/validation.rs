//! Output validation for generated section content.
//!
//! Every generation or differentiation response passes through [`validate`]
//! before the retry decision. Content must be non-blank, inside the length
//! bounds for its node kind, and free of structural markup (headings, code
//! fences, bullets). [`cleanup`] is the best-effort fallback applied once
//! retries are exhausted.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{LengthBounds, ValidationSettings};
use crate::tree::{NodeId, SectionTree};

/// One rule a piece of content failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Violation {
    Empty,
    TooShort { len: usize, min: usize },
    TooLong { len: usize, max: usize },
    ForbiddenMarkup { token: String, line: usize },
    /// Outline responses only: nothing the outline parser recognizes.
    NoHeadings,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Empty => write!(f, "content is empty"),
            Violation::TooShort { len, min } => {
                write!(f, "content too short ({} chars, min {})", len, min)
            }
            Violation::TooLong { len, max } => {
                write!(f, "content too long ({} chars, max {})", len, max)
            }
            Violation::ForbiddenMarkup { token, line } => {
                write!(f, "forbidden markup '{}' on line {}", token, line)
            }
            Violation::NoHeadings => write!(f, "no recognizable outline headings"),
        }
    }
}

/// Which length bounds apply to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Leaf,
    Parent,
}

impl ContentKind {
    pub fn bounds(&self, settings: &ValidationSettings) -> LengthBounds {
        match self {
            ContentKind::Leaf => settings.leaf,
            ContentKind::Parent => settings.parent,
        }
    }
}

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}(#{1,6})(\s|$)").expect("heading pattern is valid"));
static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(```|~~~)").expect("fence pattern is valid"));
static BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([-*+•])\s+").expect("bullet pattern is valid"));

/// Length of `content` in characters, ignoring surrounding whitespace.
pub fn content_len(content: &str) -> usize {
    content.trim().chars().count()
}

/// Check `content` against every rule. An empty vector means it passed.
pub fn validate(content: &str, bounds: LengthBounds) -> Vec<Violation> {
    let mut violations = Vec::new();

    if content.trim().is_empty() {
        violations.push(Violation::Empty);
        return violations;
    }

    let len = content_len(content);
    if len < bounds.min {
        violations.push(Violation::TooShort { len, min: bounds.min });
    } else if len > bounds.max {
        violations.push(Violation::TooLong { len, max: bounds.max });
    }

    for (idx, line) in content.lines().enumerate() {
        if let Some(token) = forbidden_token(line) {
            violations.push(Violation::ForbiddenMarkup {
                token: token.to_string(),
                line: idx + 1,
            });
        }
    }

    violations
}

fn forbidden_token(line: &str) -> Option<&str> {
    if let Some(caps) = HEADING.captures(line) {
        return caps.get(1).map(|m| m.as_str());
    }
    if let Some(caps) = FENCE.captures(line) {
        return caps.get(1).map(|m| m.as_str());
    }
    if let Some(caps) = BULLET.captures(line) {
        return caps.get(1).map(|m| m.as_str());
    }
    None
}

/// Whether any forbidden markup token remains in `content`.
pub fn has_forbidden_markup(content: &str) -> bool {
    content.lines().any(|line| forbidden_token(line).is_some())
}

/// Strip forbidden markup: fence lines are dropped, heading and bullet
/// markers are removed while their text is kept, and blank runs collapse.
pub fn cleanup(content: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    for line in content.lines() {
        let Some(line) = strip_markers(line) else {
            continue;
        };
        let line = line.trim_end();
        if line.trim().is_empty() && out.last().is_none_or(|prev| prev.trim().is_empty()) {
            continue;
        }
        out.push(line.to_string());
    }
    while out.last().is_some_and(|l| l.trim().is_empty()) {
        out.pop();
    }
    out.join("\n")
}

/// Remove leading markers until none is left. Stripping `- ` can expose
/// `# ` or a fence, so this repeats; `None` means the line was a fence.
fn strip_markers(line: &str) -> Option<String> {
    let mut line = line.to_string();
    while forbidden_token(&line).is_some() {
        if FENCE.is_match(&line) {
            return None;
        }
        let stripped = BULLET.replace(&HEADING.replace(&line, ""), "").into_owned();
        if stripped == line {
            break;
        }
        line = stripped;
    }
    Some(line)
}

/// One node's entry in a [`ValidationReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeValidation {
    pub node: NodeId,
    pub title: String,
    pub violations: Vec<Violation>,
    pub cleaned: bool,
}

/// Result of the whole-tree validation step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub checked: usize,
    pub passed: usize,
    pub cleaned: usize,
    pub issues: Vec<NodeValidation>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Re-check every node carrying content and clean markup in place.
///
/// Length violations are reported only; nothing is truncated or padded.
pub fn validate_tree(tree: &mut SectionTree, settings: &ValidationSettings) -> ValidationReport {
    let mut report = ValidationReport::default();

    for id in tree.preorder() {
        let kind = if tree.is_leaf(id) {
            ContentKind::Leaf
        } else {
            ContentKind::Parent
        };
        let node = tree.node_mut(id);
        if node.content.trim().is_empty() {
            continue;
        }
        report.checked += 1;

        let violations = validate(&node.content, kind.bounds(settings));
        if violations.is_empty() {
            report.passed += 1;
            continue;
        }

        let mut cleaned = false;
        if violations
            .iter()
            .any(|v| matches!(v, Violation::ForbiddenMarkup { .. }))
        {
            let stripped = cleanup(&node.content);
            if !stripped.trim().is_empty() {
                node.content = stripped;
                cleaned = true;
                report.cleaned += 1;
            }
        }
        tracing::warn!(
            node = %id,
            title = %node.title,
            violations = violations.len(),
            cleaned,
            "Section content failed validation"
        );
        report.issues.push(NodeValidation {
            node: id,
            title: node.title.clone(),
            violations,
            cleaned,
        });
    }

    report
}
