//! crates/parentmath_core/src/guidance.rs
//!
//! Models the guidance the generation model returns. Parent mode promises a
//! fixed JSON teaching schema; child mode is freeform markdown-like text.
//! A parent response that fails to parse is rendered as markdown instead of
//! surfacing an error.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::HelpMode;

//=========================================================================================
// Parent-mode JSON schema
//=========================================================================================

/// The structured teaching guidance returned in parent mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentGuidance {
    pub parsed: ParsedProblem,
    pub teaching: Teaching,
    pub answer: Answer,
}

/// The model's reading of the problem itself. Fields here are free text the
/// model fills in; `numbers` is kept loose because role vocabularies drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedProblem {
    pub original_problem: String,
    #[serde(default)]
    pub numbers: Vec<Value>,
    #[serde(default)]
    pub unit: Option<String>,
    pub unknown: String,
    pub operation: String,
    pub operation_why: String,
    pub problem_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Teaching {
    pub problem_restatement: String,
    #[serde(default)]
    pub new_math_method: Option<MathMethod>,
    pub steps: Vec<TeachingStep>,
    pub quick_notes: QuickNotes,
    #[serde(default)]
    pub visual_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MathMethod {
    pub name: String,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeachingStep {
    pub title: String,
    #[serde(default)]
    pub instruction: Option<String>,
    pub say_this: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickNotes {
    pub concept: String,
    pub common_mistake: String,
    pub if_they_ask: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub expression: String,
    pub value: Value,
}

//=========================================================================================
// Markdown-like fallback rendering
//=========================================================================================

/// One inline run within a paragraph or list item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum Span {
    Text(String),
    Bold(String),
}

/// One block of the kid-facing markdown-like output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Block {
    Heading { level: u8, text: String },
    Paragraph { spans: Vec<Span> },
    ListItem { spans: Vec<Span> },
}

static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());

fn parse_spans(line: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut last = 0;
    for m in BOLD.captures_iter(line) {
        let whole = m.get(0).unwrap();
        if whole.start() > last {
            spans.push(Span::Text(line[last..whole.start()].to_string()));
        }
        spans.push(Span::Bold(m.get(1).unwrap().as_str().to_string()));
        last = whole.end();
    }
    if last < line.len() {
        spans.push(Span::Text(line[last..].to_string()));
    }
    spans
}

/// Parses freeform model output into renderable blocks. Recognizes `#`/`##`/
/// `###` headings, `-`/`*` list lines, and `**bold**` spans; blank lines are
/// skipped. Never fails.
pub fn parse_markdown(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let hashes = trimmed.chars().take_while(|c| *c == '#').count();
        if (1..=3).contains(&hashes) && trimmed[hashes..].starts_with(' ') {
            blocks.push(Block::Heading {
                level: hashes as u8,
                text: trimmed[hashes..].trim().to_string(),
            });
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("* ")) {
            blocks.push(Block::ListItem {
                spans: parse_spans(rest),
            });
            continue;
        }

        blocks.push(Block::Paragraph {
            spans: parse_spans(trimmed),
        });
    }
    blocks
}

//=========================================================================================
// Rendering entry point
//=========================================================================================

/// What the UI should display, tagged by the branch taken so callers and
/// tests can distinguish structured guidance from the markdown fallback.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rendered {
    Structured { guidance: Box<ParentGuidance> },
    Markdown { blocks: Vec<Block> },
}

/// Renders raw model output for the given mode. Parent mode tries the JSON
/// schema first and falls back to markdown on any parse or shape mismatch;
/// child mode is always markdown.
pub fn render(mode: HelpMode, raw: &str) -> Rendered {
    if mode == HelpMode::Parent {
        if let Ok(guidance) = serde_json::from_str::<ParentGuidance>(raw) {
            return Rendered::Structured {
                guidance: Box::new(guidance),
            };
        }
    }
    Rendered::Markdown {
        blocks: parse_markdown(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARENT_JSON: &str = r#"{
        "parsed": {
            "original_problem": "What is 60% of 50?",
            "numbers": [{"value": 60, "role": "percent"}, {"value": 50, "role": "whole"}],
            "unit": null,
            "unknown": "We want to know what 60% of 50 is",
            "operation": "We are finding part of a number",
            "operation_why": "Percent means out of 100, so we find 60 out of every 100.",
            "problem_type": "a percent problem"
        },
        "teaching": {
            "problem_restatement": "Find 60% of 50.",
            "new_math_method": {"name": "Grid model", "explanation": "Schools draw 100 squares so kids can see the percent."},
            "steps": [
                {"title": "Step 1: Turn percent into a fraction", "instruction": "Write 60% as 60/100.", "say_this": "Percent means out of 100."},
                {"title": "Step 2: Find the part", "say_this": "Now take that part of 50."}
            ],
            "quick_notes": {
                "concept": "Percent means out of 100.",
                "common_mistake": "Multiplying by 60 instead of 0.60.",
                "if_they_ask": "100% of something is the whole thing."
            },
            "visual_hint": null
        },
        "answer": {"expression": "50 x 0.60", "value": 30}
    }"#;

    #[test]
    fn parent_json_parses_into_structured_guidance() {
        match render(HelpMode::Parent, PARENT_JSON) {
            Rendered::Structured { guidance } => {
                assert_eq!(guidance.teaching.steps.len(), 2);
                assert!(guidance.teaching.steps[1].instruction.is_none());
                assert_eq!(guidance.answer.value, serde_json::json!(30));
            }
            Rendered::Markdown { .. } => panic!("expected structured guidance"),
        }
    }

    #[test]
    fn parent_json_missing_teaching_falls_back_to_markdown() {
        let raw = r#"{"parsed": {"original_problem": "2+2"}, "answer": {"expression": "2+2", "value": 4}}"#;
        match render(HelpMode::Parent, raw) {
            Rendered::Markdown { blocks } => assert!(!blocks.is_empty()),
            Rendered::Structured { .. } => panic!("expected markdown fallback"),
        }
    }

    #[test]
    fn child_mode_never_tries_json() {
        match render(HelpMode::Child, PARENT_JSON) {
            Rendered::Markdown { .. } => {}
            Rendered::Structured { .. } => panic!("child mode must render markdown"),
        }
    }

    #[test]
    fn markdown_headings_lists_and_bold() {
        let raw = "### STEPS\n**Step 1: Count** the apples\n- 3 apples\n* 4 more\n\nAll done";
        let blocks = parse_markdown(raw);
        assert_eq!(
            blocks[0],
            Block::Heading {
                level: 3,
                text: "STEPS".into()
            }
        );
        assert_eq!(
            blocks[1],
            Block::Paragraph {
                spans: vec![
                    Span::Bold("Step 1: Count".into()),
                    Span::Text(" the apples".into())
                ]
            }
        );
        assert!(matches!(blocks[2], Block::ListItem { .. }));
        assert!(matches!(blocks[3], Block::ListItem { .. }));
        assert_eq!(
            blocks[4],
            Block::Paragraph {
                spans: vec![Span::Text("All done".into())]
            }
        );
    }

    #[test]
    fn hash_without_space_is_a_paragraph() {
        let blocks = parse_markdown("#notaheading");
        assert!(matches!(blocks[0], Block::Paragraph { .. }));
    }
}
