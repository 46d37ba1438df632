//! Prompt builders, one per request kind.

use super::{PromptContext, RequestKind};
use crate::config::LengthBounds;

const ANALYSIS_SYSTEM_PROMPT: &str = r#"You are a bid consultant analysing a tender document before a technical proposal is written.

Report, in this order:
1. Mandatory requirements and the evidence each one demands.
2. Scoring criteria: technical, commercial and price items with their weights, and what earns full marks.
3. Risks and points the proposal must emphasise.

Be specific and quote figures from the document. Do not draft the proposal itself."#;

const OUTLINE_SYSTEM_PROMPT: &str = r#"You are a senior technical writer preparing the outline of a technical proposal.

Rules:
- Return only the outline, one heading per line.
- Number headings hierarchically: "1.", "1.1", "1.1.1". At most four levels.
- Cover every mandatory requirement of the source document.
- Do not add commentary, introductions or code fences."#;

const LEAF_SYSTEM_PROMPT: &str = r#"You are a senior technical writer drafting one section of a technical proposal.

Rules:
- Write continuous prose paragraphs only.
- No headings, no bullet or numbered lists, no code fences, no tables.
- Stay strictly within the scope of the section title and its position in the outline.
- Use only facts supported by the source document; never invent figures or names."#;

const PARENT_SYSTEM_PROMPT: &str = r#"You are a senior technical writer writing the introductory summary of a proposal chapter.

Rules:
- Summarize the subsections provided, in their order, as continuous prose.
- No headings, no lists, no code fences.
- If a subsection has no content, mention the topic by title only and do not fabricate its details."#;

const DIFFERENTIATE_SYSTEM_PROMPT: &str = r#"You are an editor rewriting a section of a technical proposal.

Rules:
- Rephrase the text so it reads differently from the original wording.
- Preserve every fact, figure and commitment; add nothing new.
- Keep it as continuous prose: no headings, no lists, no code fences."#;

fn length_line(bounds: LengthBounds) -> String {
    format!(
        "Length: between {} and {} characters.",
        bounds.min, bounds.max
    )
}

fn requirements_block(key_requirements: &[String]) -> String {
    if key_requirements.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n\nKey requirements that must be addressed:\n");
    for req in key_requirements {
        out.push_str(req);
        out.push('\n');
    }
    out
}

/// Analysis request run ahead of outline generation.
pub fn analysis_request(document: &str, key_requirements: &[String]) -> PromptContext {
    let user = format!(
        "Analyse the requirements and scoring criteria of the following document.{}\n\nSource document:\n{}",
        requirements_block(key_requirements),
        document
    );
    PromptContext {
        kind: RequestKind::Analysis,
        title: String::new(),
        path: Vec::new(),
        system: ANALYSIS_SYSTEM_PROMPT.to_string(),
        user,
    }
}

/// Outline request: source document, extracted key requirements and the
/// analysis when one was produced.
pub fn outline_request(
    document: &str,
    key_requirements: &[String],
    analysis: Option<&str>,
) -> PromptContext {
    let analysis_block = match analysis {
        Some(text) if !text.trim().is_empty() => {
            format!("\n\nRequirements and scoring analysis:\n{}", text.trim())
        }
        _ => String::new(),
    };
    let user = format!(
        "Produce the outline for a technical proposal answering the following document.{}{}\n\nSource document:\n{}",
        requirements_block(key_requirements),
        analysis_block,
        document
    );
    PromptContext {
        kind: RequestKind::Outline,
        title: String::new(),
        path: Vec::new(),
        system: OUTLINE_SYSTEM_PROMPT.to_string(),
        user,
    }
}

/// Leaf request. The complete source document is passed, never a filtered subset.
pub fn leaf_request(
    title: &str,
    path: &[String],
    document: &str,
    bounds: LengthBounds,
) -> PromptContext {
    let user = format!(
        "Section: {}\nPosition in outline: {}\n{}\n\nSource document:\n{}",
        title,
        path.join(" > "),
        length_line(bounds),
        document
    );
    PromptContext {
        kind: RequestKind::Leaf,
        title: title.to_string(),
        path: path.to_vec(),
        system: LEAF_SYSTEM_PROMPT.to_string(),
        user,
    }
}

/// Parent summary request built from `(title, content)` pairs in sibling order.
/// Children without content appear with their title and an empty body.
pub fn parent_request(
    title: &str,
    path: &[String],
    children: &[(String, String)],
    bounds: LengthBounds,
) -> PromptContext {
    let mut user = format!(
        "Chapter: {}\nPosition in outline: {}\n{}\n\nSubsections:\n",
        title,
        path.join(" > "),
        length_line(bounds)
    );
    for (child_title, content) in children {
        user.push_str("\n[");
        user.push_str(child_title);
        user.push_str("]\n");
        user.push_str(content);
        user.push('\n');
    }
    PromptContext {
        kind: RequestKind::ParentSummary,
        title: title.to_string(),
        path: path.to_vec(),
        system: PARENT_SYSTEM_PROMPT.to_string(),
        user,
    }
}

/// Differentiation request. Only the existing content is sent.
pub fn differentiate_request(
    title: &str,
    path: &[String],
    content: &str,
    bounds: LengthBounds,
) -> PromptContext {
    let user = format!(
        "{}\n\nRewrite the following text:\n\n{}",
        length_line(bounds),
        content
    );
    PromptContext {
        kind: RequestKind::Differentiate,
        title: title.to_string(),
        path: path.to_vec(),
        system: DIFFERENTIATE_SYSTEM_PROMPT.to_string(),
        user,
    }
}
