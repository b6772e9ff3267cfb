//! crates/parentmath_core/src/segment.rs
//!
//! Splits raw OCR text from a worksheet photo into individual candidate
//! problems, and validates that the split looks sane before it is shown to
//! the user.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::ProblemRecord;

/// A blank-line separator only fires once the accumulated problem text is
/// longer than this.
const MIN_SPLIT_LEN: usize = 5;

/// Problems whose trimmed text is shorter than this signal over-fragmentation.
const MIN_PROBLEM_LEN: usize = 3;

/// More detected problems than this signals pathological over-splitting.
const MAX_PROBLEM_COUNT: usize = 20;

// Leading-index forms worksheets actually use: "1.", "1)", "(1)", "1a.",
// "Problem 1:". The second capture is the content after the marker.
static NUMBER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"^\s*(\d+)\.\s+(.+)$").unwrap(),
        Regex::new(r"^\s*(\d+)\)\s+(.+)$").unwrap(),
        Regex::new(r"^\s*\((\d+)\)\s+(.+)$").unwrap(),
        Regex::new(r"^\s*(\d+[a-z]?)\.\s+(.+)$").unwrap(),
        Regex::new(r"(?i)^\s*Problem\s+(\d+):?\s+(.+)$").unwrap(),
    ]
});

/// Outcome of segmenting one OCR result, with the policy branch made
/// explicit so callers and tests can tell which path was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segmentation {
    /// The split passed validation and is safe to offer for selection.
    Accepted(Vec<ProblemRecord>),
    /// The split failed validation; the whole text is offered as one record.
    Collapsed {
        reason: CollapseReason,
        problem: ProblemRecord,
    },
    /// The input was empty or whitespace-only; nothing to offer.
    Blank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollapseReason {
    FragmentTooShort,
    TooManyProblems,
}

/// Splits raw OCR text into an ordered list of candidate problems.
///
/// A line matching a numbered-problem pattern starts a new problem; a blank
/// line acts as a separator once enough text has accumulated and more
/// content follows; any other line is appended verbatim. If no pattern ever
/// fires on non-blank input, the whole trimmed text becomes a single
/// problem. Pure and deterministic.
pub fn segment(raw_text: &str) -> Vec<ProblemRecord> {
    if raw_text.trim().is_empty() {
        return Vec::new();
    }

    let lines: Vec<&str> = raw_text.split('\n').collect();
    let mut problems: Vec<ProblemRecord> = Vec::new();
    let mut current: Vec<String> = Vec::new();

    let flush = |current: &mut Vec<String>, problems: &mut Vec<ProblemRecord>| {
        let text = current.join("\n").trim().to_string();
        if !text.is_empty() {
            problems.push(ProblemRecord::numbered(problems.len() + 1, text));
        }
        current.clear();
    };

    for (i, line) in lines.iter().enumerate() {
        let numbered_rest = NUMBER_PATTERNS
            .iter()
            .find_map(|p| p.captures(line))
            .map(|caps| caps.get(2).map(|m| m.as_str()).unwrap_or("").to_string());

        if let Some(rest) = numbered_rest {
            // A new numbered problem begins: close out the previous one and
            // seed the accumulator with the text after the marker.
            flush(&mut current, &mut problems);
            current.push(rest);
        } else if line.trim().is_empty() {
            // Blank line: split only if we already hold real text and more
            // content follows; otherwise ignore it entirely.
            let accumulated = current.join("\n").trim().len();
            let has_more = lines[i + 1..].iter().any(|l| !l.trim().is_empty());
            if !current.is_empty() && has_more && accumulated > MIN_SPLIT_LEN {
                flush(&mut current, &mut problems);
            }
        } else {
            // Continuation line, kept verbatim (not trimmed).
            current.push(line.to_string());
        }
    }

    flush(&mut current, &mut problems);

    // No pattern matched anywhere: treat the whole input as one problem.
    if problems.is_empty() {
        return vec![ProblemRecord::numbered(1, raw_text.trim().to_string())];
    }

    problems
}

/// Checks whether a detected split looks reasonable. Rejects an empty list,
/// any fragment shorter than three characters, and more than twenty
/// problems. On rejection the caller must fall back to the whole original
/// text as one record rather than surface the partial list.
pub fn validate(problems: &[ProblemRecord]) -> bool {
    if problems.is_empty() {
        return false;
    }
    let has_valid_length = problems.iter().all(|p| p.text.trim().len() >= MIN_PROBLEM_LEN);
    let has_reasonable_count = problems.len() <= MAX_PROBLEM_COUNT;
    has_valid_length && has_reasonable_count
}

/// Segments and validates in one step, collapsing invalid splits to a
/// single whole-text record so the caller never sees a rejected list.
pub fn segment_with_fallback(raw_text: &str) -> Segmentation {
    if raw_text.trim().is_empty() {
        return Segmentation::Blank;
    }

    let problems = segment(raw_text);
    if validate(&problems) {
        return Segmentation::Accepted(problems);
    }

    let reason = if problems.len() > MAX_PROBLEM_COUNT {
        CollapseReason::TooManyProblems
    } else {
        CollapseReason::FragmentTooShort
    };

    Segmentation::Collapsed {
        reason,
        problem: ProblemRecord::numbered(1, raw_text.trim().to_string()),
    }
}
