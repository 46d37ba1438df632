//! Outline parser: numbered or heading-marked text → [`SectionTree`].
//!
//! Recognized heading lines, first match wins:
//!
//! - markdown headings (`## Title`, `## 1.2 Title`), where a leading decimal
//!   number overrides the `#` count as the level source
//! - decimal numbering (`1.`, `1.1`, `1.2.3.4.`), level = number of components
//! - Chinese ordinals, `一、` at level 1 and `（一）` / `(一)` at level 2
//!
//! Every other line is ignored. The parser only builds structure.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::DraftError;
use crate::tree::{NodeId, SectionTree};
use crate::validation::{self, Violation};

static MARKDOWN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s{0,3}(#{1,6})(?:\s+(.*?))?\s*#*\s*$").expect("markdown heading pattern is valid")
});
static DECIMAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+(?:\.\d+)*)(\.?)(\s*)(.*)$").expect("decimal heading pattern is valid")
});
static CN_TOP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([一二三四五六七八九十百]+)、\s*(.*)$").expect("ordinal pattern is valid")
});
static CN_SUB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[（(]([一二三四五六七八九十百]+)[）)]\s*(.*)$")
        .expect("parenthesized ordinal pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Heading deeper than the configured maximum; clamped.
    DepthClamped,
    /// Heading skipped one or more levels; attached to the nearest open ancestor.
    LevelGap,
    /// Heading marker with no title text; skipped.
    EmptyTitle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseWarning {
    /// 1-based line number in the input.
    pub line: usize,
    pub kind: WarningKind,
    pub message: String,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

#[derive(Debug, Clone)]
pub struct ParsedOutline {
    pub tree: SectionTree,
    pub warnings: Vec<ParseWarning>,
}

/// A recognized heading before it is placed in the tree.
#[derive(Debug, PartialEq, Eq)]
struct Heading {
    level: usize,
    title: String,
}

enum LineKind {
    Heading(Heading),
    EmptyHeading,
    Prose,
}

fn decimal_heading(text: &str) -> Option<LineKind> {
    let caps = DECIMAL.captures(text)?;
    let number = caps.get(1)?.as_str();
    let has_dot = !caps.get(2)?.as_str().is_empty();
    let has_space = !caps.get(3)?.as_str().is_empty();
    let title = caps.get(4)?.as_str().trim();
    let level = number.split('.').count();

    // "2024年" or "3 teams" is prose; a top-level number needs its dot.
    if !has_dot && level == 1 {
        return None;
    }
    if title.is_empty() {
        return Some(LineKind::EmptyHeading);
    }
    // "1.1abc" is not a heading; "1.1概述" is.
    if !has_dot && !has_space && title.chars().next().is_some_and(|c| c.is_ascii()) {
        return None;
    }
    Some(LineKind::Heading(Heading {
        level,
        title: title.to_string(),
    }))
}

fn classify(line: &str) -> LineKind {
    if let Some(caps) = MARKDOWN.captures(line) {
        let hashes = caps.get(1).map_or(1, |m| m.as_str().len());
        let text = caps.get(2).map_or("", |m| m.as_str()).trim();
        if text.is_empty() {
            return LineKind::EmptyHeading;
        }
        // "# 2024 Plan" keeps its year; only dotted numbers set the level.
        let dotted = text
            .split_whitespace()
            .next()
            .is_some_and(|w| w.starts_with(|c: char| c.is_ascii_digit()) && w.contains('.'));
        return match decimal_heading(text) {
            Some(kind @ LineKind::Heading(_)) if dotted => kind,
            _ => LineKind::Heading(Heading {
                level: hashes,
                title: text.to_string(),
            }),
        };
    }
    if let Some(kind) = decimal_heading(line) {
        return kind;
    }
    for (pattern, level) in [(&*CN_TOP, 1), (&*CN_SUB, 2)] {
        if let Some(caps) = pattern.captures(line) {
            let title = caps.get(2).map_or("", |m| m.as_str()).trim();
            if title.is_empty() {
                return LineKind::EmptyHeading;
            }
            return LineKind::Heading(Heading {
                level,
                title: title.to_string(),
            });
        }
    }
    LineKind::Prose
}

/// Parse `text` into a section tree no deeper than `max_depth`.
///
/// Fails only when no heading is recognized at all.
pub fn parse_outline(text: &str, max_depth: usize) -> Result<ParsedOutline, DraftError> {
    let max_depth = max_depth.max(1);
    let mut tree = SectionTree::new();
    let mut warnings = Vec::new();
    // (declared level, node) for every currently open ancestor.
    let mut stack: Vec<(usize, NodeId)> = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let heading = match classify(line) {
            LineKind::Heading(h) => h,
            LineKind::EmptyHeading => {
                warnings.push(ParseWarning {
                    line: line_no,
                    kind: WarningKind::EmptyTitle,
                    message: format!("heading without a title skipped: '{}'", line.trim()),
                });
                continue;
            }
            LineKind::Prose => continue,
        };

        let mut level = heading.level;
        if level > max_depth {
            warnings.push(ParseWarning {
                line: line_no,
                kind: WarningKind::DepthClamped,
                message: format!(
                    "'{}' at level {} clamped to {}",
                    heading.title, level, max_depth
                ),
            });
            level = max_depth;
        }

        while stack.last().is_some_and(|(open, _)| *open >= level) {
            stack.pop();
        }

        let id = match stack.last() {
            Some(&(_, parent)) => {
                let parent_level = tree.node(parent).level;
                if level > parent_level + 1 {
                    warnings.push(ParseWarning {
                        line: line_no,
                        kind: WarningKind::LevelGap,
                        message: format!(
                            "'{}' at level {} placed directly under level {}",
                            heading.title, level, parent_level
                        ),
                    });
                }
                tree.add_child(parent, heading.title)
            }
            None => {
                if level > 1 {
                    warnings.push(ParseWarning {
                        line: line_no,
                        kind: WarningKind::LevelGap,
                        message: format!(
                            "'{}' at level {} has no enclosing section; treated as top level",
                            heading.title, level
                        ),
                    });
                }
                tree.add_root(heading.title)
            }
        };
        stack.push((level, id));
    }

    if tree.is_empty() {
        return Err(DraftError::OutlineParse(
            "outline contains no recognizable headings".to_string(),
        ));
    }

    for warning in &warnings {
        tracing::warn!(line = warning.line, kind = ?warning.kind, "{}", warning.message);
    }

    Ok(ParsedOutline { tree, warnings })
}

/// Acceptance check for a generated outline: long enough and at least one
/// recognizable heading once code fences are dropped.
pub fn validate_outline(text: &str, min_chars: usize) -> Vec<Violation> {
    let text = strip_code_fences(text);
    if text.trim().is_empty() {
        return vec![Violation::Empty];
    }
    let mut violations = Vec::new();
    let len = validation::content_len(&text);
    if len < min_chars {
        violations.push(Violation::TooShort { len, min: min_chars });
    }
    if !text.lines().any(|l| matches!(classify(l), LineKind::Heading(_))) {
        violations.push(Violation::NoHeadings);
    }
    violations
}

/// Drop code-fence lines a generation service sometimes wraps outlines in.
pub fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|l| {
            let t = l.trim_start();
            !(t.starts_with("```") || t.starts_with("~~~"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titles(tree: &SectionTree) -> Vec<(usize, String)> {
        tree.preorder()
            .into_iter()
            .map(|id| (tree.node(id).level, tree.node(id).title.clone()))
            .collect()
    }

    #[test]
    fn test_decimal_outline() {
        let parsed = parse_outline("1. A\n1.1 A1\n1.2 A2\n2. B", 4).unwrap();
        let tree = &parsed.tree;
        assert_eq!(tree.len(), 4);
        assert_eq!(tree.roots().len(), 2);
        let a = tree.roots()[0];
        let b = tree.roots()[1];
        assert_eq!(tree.node(a).title, "A");
        let kids: Vec<&str> = tree
            .children(a)
            .iter()
            .map(|c| tree.node(*c).title.as_str())
            .collect();
        assert_eq!(kids, vec!["A1", "A2"]);
        assert!(tree.is_leaf(b));
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn test_prose_lines_are_ignored() {
        let text = "Project outline\n\n1. Overview\nsome explanatory text\n1.1 Scope\n- a bullet\n2. Plan";
        let parsed = parse_outline(text, 4).unwrap();
        assert_eq!(
            titles(&parsed.tree),
            vec![
                (1, "Overview".to_string()),
                (2, "Scope".to_string()),
                (1, "Plan".to_string()),
            ]
        );
    }

    #[test]
    fn test_markdown_headings() {
        let text = "# Intro\n## Background ##\n### Detail\n## 2.1 Numbered\n# Close";
        let parsed = parse_outline(text, 4).unwrap();
        assert_eq!(
            titles(&parsed.tree),
            vec![
                (1, "Intro".to_string()),
                (2, "Background".to_string()),
                (3, "Detail".to_string()),
                (2, "Numbered".to_string()),
                (1, "Close".to_string()),
            ]
        );
    }

    #[test]
    fn test_chinese_ordinals_and_compact_numbers() {
        let text = "一、工程概况\n（一）项目背景\n(二)建设规模\n二、施工部署\n2.1施工组织";
        let parsed = parse_outline(text, 4).unwrap();
        assert_eq!(
            titles(&parsed.tree),
            vec![
                (1, "工程概况".to_string()),
                (2, "项目背景".to_string()),
                (2, "建设规模".to_string()),
                (1, "施工部署".to_string()),
                (2, "施工组织".to_string()),
            ]
        );
    }

    #[test]
    fn test_numbers_in_prose_are_not_headings() {
        let parsed = parse_outline("1. Budget\n2024年完成\n12345\n1.1abc", 4).unwrap();
        assert_eq!(parsed.tree.len(), 1);

        let text = "1. Budget\n2024 年完成全部施工\n3 teams will be on site daily\n2. Staffing";
        let parsed = parse_outline(text, 4).unwrap();
        let titles: Vec<&str> = parsed
            .tree
            .roots()
            .iter()
            .map(|&id| parsed.tree.node(id).title.as_str())
            .collect();
        assert_eq!(titles, vec!["Budget", "Staffing"]);
    }

    #[test]
    fn test_depth_clamped_with_warning() {
        let text = "1. A\n1.1 B\n1.1.1 C\n1.1.1.1 D";
        let parsed = parse_outline(text, 2).unwrap();
        assert_eq!(parsed.tree.len(), 4);
        assert_eq!(parsed.tree.max_depth(), 2);
        let clamped: Vec<usize> = parsed
            .warnings
            .iter()
            .filter(|w| w.kind == WarningKind::DepthClamped)
            .map(|w| w.line)
            .collect();
        assert_eq!(clamped, vec![3, 4]);
        // C and D become siblings of B.
        let a = parsed.tree.roots()[0];
        assert_eq!(parsed.tree.children(a).len(), 3);
    }

    #[test]
    fn test_level_gap_attaches_to_open_ancestor() {
        let parsed = parse_outline("1. A\n1.1.1 X\n1.1.2 Y\n2. B", 4).unwrap();
        let tree = &parsed.tree;
        let a = tree.roots()[0];
        assert_eq!(tree.children(a).len(), 2);
        assert!(tree.children(a).iter().all(|c| tree.node(*c).level == 2));
        assert_eq!(
            parsed
                .warnings
                .iter()
                .filter(|w| w.kind == WarningKind::LevelGap)
                .count(),
            2
        );
    }

    #[test]
    fn test_duplicate_numbers_keep_document_order() {
        let parsed = parse_outline("2. Second\n1. First\n1. Again", 4).unwrap();
        assert_eq!(
            titles(&parsed.tree),
            vec![
                (1, "Second".to_string()),
                (1, "First".to_string()),
                (1, "Again".to_string()),
            ]
        );
        let orders: Vec<usize> = parsed
            .tree
            .roots()
            .iter()
            .map(|r| parsed.tree.node(*r).order)
            .collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }

    #[test]
    fn test_empty_titles_are_skipped() {
        let parsed = parse_outline("1.\n##\n2. Real", 4).unwrap();
        assert_eq!(parsed.tree.len(), 1);
        assert_eq!(
            parsed
                .warnings
                .iter()
                .filter(|w| w.kind == WarningKind::EmptyTitle)
                .count(),
            2
        );
    }

    #[test]
    fn test_no_headings_is_an_error() {
        let err = parse_outline("just some prose\nwith no structure", 4).unwrap_err();
        assert!(matches!(err, DraftError::OutlineParse(_)));
        assert!(parse_outline("", 4).is_err());
    }

    #[test]
    fn test_n_headings_yield_n_nodes() {
        let text = "1. a\n1.1 b\n1.1.1 c\n1.1.2 d\n1.2 e\n2. f\n2.1 g\n3. h";
        let parsed = parse_outline(text, 4).unwrap();
        let tree = &parsed.tree;
        assert_eq!(tree.len(), 8);
        assert_eq!(tree.leaf_count() + tree.internal_count(), 8);
    }

    #[test]
    fn test_validate_outline() {
        assert!(validate_outline("```\n1. Overview of the work\n2. Plan\n```", 10).is_empty());
        assert_eq!(validate_outline("```\n```", 10), vec![Violation::Empty]);
        assert_eq!(
            validate_outline("Sorry, I cannot help with that request.", 10),
            vec![Violation::NoHeadings]
        );
        assert!(matches!(
            validate_outline("1. A", 10).as_slice(),
            [Violation::TooShort { len: 4, min: 10 }]
        ));
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```text\n1. A\n```"), "1. A");
    }
}
