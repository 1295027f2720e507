//! Deterministic rule-based analyzer.
//!
//! Tidying fixes whitespace runs, spacing before punctuation, a repeated word
//! and lowercase sentence starts. Detection treats `term: definition` and
//! `term - definition` lines as flashcards and short `X is Y` sentences as
//! patterns. Outline markers are skipped so section text from
//! [`crate::export::section_outline`] can be scanned directly.

use super::worker::{AnalysisKind, Analyze, AnalyzerRequest, ReplyOutcome};
use super::{Detection, DetectionKind, TextDiff, TextRange};
use unicode_segmentation::UnicodeSegmentation;

const PUNCTUATION: &[char] = &[',', '.', ';', ':', '!', '?'];
const OUTLINE_MARKERS: &[&str] = &["[ ] ", "[x] ", "## ", "# ", "- ", "* "];
const MAX_TERM_CHARS: usize = 60;
const MAX_SUBJECT_WORDS: usize = 6;

#[derive(Debug, Default, Clone, Copy)]
pub struct RuleAnalyzer;

impl RuleAnalyzer {
    /// Proposed text and the edits that produce it, as ranges of `text`.
    pub fn tidy(&self, text: &str) -> (String, Vec<TextDiff>) {
        let diffs = tidy_diffs(text);
        (apply_diffs(text, &diffs), diffs)
    }

    pub fn detect(&self, text: &str) -> Vec<Detection> {
        let mut detections = Vec::new();
        let mut offset = 0;
        for line in text.split_inclusive('\n') {
            let body = line.trim_end_matches(['\n', '\r']);
            let indent = body.len() - body.trim_start().len();
            let mut start = offset + indent;
            let mut content = body.trim_start();
            if let Some(marker) = OUTLINE_MARKERS
                .iter()
                .find(|marker| content.starts_with(**marker))
            {
                start += marker.len();
                content = &content[marker.len()..];
            }
            detect_line(content, start, &mut detections);
            offset += line.len();
        }
        detections
    }
}

impl Analyze for RuleAnalyzer {
    fn analyze(&self, request: &AnalyzerRequest) -> ReplyOutcome {
        match request.kind {
            AnalysisKind::Tidy => {
                let (proposed_text, diffs) = self.tidy(&request.text);
                ReplyOutcome::Success {
                    proposed_text,
                    diffs,
                }
            }
            AnalysisKind::Detect => ReplyOutcome::Detected {
                detections: self.detect(&request.text),
            },
        }
    }
}

fn tidy_diffs(text: &str) -> Vec<TextDiff> {
    let mut diffs = Vec::new();
    repeated_words(text, &mut diffs);
    whitespace_runs(text, &mut diffs);
    sentence_starts(text, &mut diffs);

    diffs.sort_by_key(|diff| (diff.range.start, diff.range.end));
    let mut kept: Vec<TextDiff> = Vec::with_capacity(diffs.len());
    for diff in diffs {
        if kept
            .last()
            .is_none_or(|last| last.range.end <= diff.range.start)
        {
            kept.push(diff);
        }
    }
    kept
}

fn push(diffs: &mut Vec<TextDiff>, start: usize, end: usize, replacement: &str) {
    diffs.push(TextDiff {
        range: TextRange { start, end },
        replacement: replacement.to_string(),
    });
}

/// `the the` becomes `the`; the second occurrence and its leading space go.
fn repeated_words(text: &str, diffs: &mut Vec<TextDiff>) {
    let words: Vec<(usize, &str)> = text.unicode_word_indices().collect();
    for pair in words.windows(2) {
        let (first_at, first) = pair[0];
        let (second_at, second) = pair[1];
        let gap = &text[first_at + first.len()..second_at];
        let is_word = first.chars().any(char::is_alphabetic);
        if is_word
            && !gap.is_empty()
            && gap.chars().all(|ch| ch == ' ' || ch == '\t')
            && first.to_lowercase() == second.to_lowercase()
        {
            push(diffs, first_at + first.len(), second_at + second.len(), "");
        }
    }
}

/// Collapses runs of spaces to one; drops them at line edges and before
/// punctuation.
fn whitespace_runs(text: &str, diffs: &mut Vec<TextDiff>) {
    let mut run_start = None;
    for (index, ch) in text.char_indices().chain(std::iter::once((text.len(), '\n'))) {
        let is_blank = ch == ' ' || ch == '\t';
        match (run_start, is_blank) {
            (None, true) => run_start = Some(index),
            (Some(start), false) => {
                run_start = None;
                let at_line_start = start == 0 || text[..start].ends_with('\n');
                let droppable = at_line_start || ch == '\n' || ch == '\r' || PUNCTUATION.contains(&ch);
                let replacement = if droppable { "" } else { " " };
                if &text[start..index] != replacement {
                    push(diffs, start, index, replacement);
                }
            }
            _ => {}
        }
    }
}

/// Uppercases the first letter of the text and of each sentence.
fn sentence_starts(text: &str, diffs: &mut Vec<TextDiff>) {
    let mut at_start = true;
    let mut after_terminator = false;
    for (index, ch) in text.char_indices() {
        if at_start && ch.is_alphabetic() {
            if ch.is_lowercase() {
                let upper: String = ch.to_uppercase().collect();
                push(diffs, index, index + ch.len_utf8(), &upper);
            }
            at_start = false;
            after_terminator = false;
            continue;
        }
        if matches!(ch, '.' | '!' | '?') {
            after_terminator = true;
            at_start = false;
        } else if ch.is_whitespace() {
            if after_terminator {
                at_start = true;
            }
        } else {
            at_start = false;
            after_terminator = false;
        }
    }
}

fn apply_diffs(text: &str, diffs: &[TextDiff]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for diff in diffs {
        out.push_str(&text[cursor..diff.range.start]);
        out.push_str(&diff.replacement);
        cursor = diff.range.end;
    }
    out.push_str(&text[cursor..]);
    out
}

fn detect_line(content: &str, start: usize, detections: &mut Vec<Detection>) {
    for separator in [": ", " - "] {
        if let Some((term, definition)) = content.split_once(separator) {
            let term = term.trim();
            let definition = definition.trim();
            if !term.is_empty()
                && !definition.is_empty()
                && term.chars().count() <= MAX_TERM_CHARS
            {
                detections.push(Detection {
                    kind: DetectionKind::Flashcard,
                    front: term.to_string(),
                    back: definition.to_string(),
                    range: TextRange {
                        start,
                        end: start + content.len(),
                    },
                });
                return;
            }
        }
    }

    let mut sentence_at = 0;
    for sentence in content.split_inclusive(['.', '!', '?']) {
        let trimmed = sentence.trim_start();
        let lead = sentence.len() - trimmed.len();
        let body = trimmed.trim_end_matches(['.', '!', '?']);
        for verb in [" is ", " are "] {
            if let Some((subject, predicate)) = body.split_once(verb) {
                let words = subject.unicode_words().count();
                if (1..=MAX_SUBJECT_WORDS).contains(&words) && !predicate.trim().is_empty() {
                    let begin = start + sentence_at + lead;
                    detections.push(Detection {
                        kind: DetectionKind::Pattern,
                        front: subject.trim().to_string(),
                        back: predicate.trim().to_string(),
                        range: TextRange {
                            start: begin,
                            end: begin + body.len(),
                        },
                    });
                    break;
                }
            }
        }
        sentence_at += sentence.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tidy_whitespace_and_punctuation() {
        let (proposed, diffs) = RuleAnalyzer.tidy("this  is   fine , right ?");
        assert_eq!(proposed, "This is fine, right?");
        assert!(!diffs.is_empty());
        assert_eq!(diffs[0].range, TextRange { start: 0, end: 1 });
    }

    #[test]
    fn test_tidy_repeated_word_and_sentence_start() {
        let (proposed, _) = RuleAnalyzer.tidy("it was the the best. then it ended.");
        assert_eq!(proposed, "It was the best. Then it ended.");
    }

    #[test]
    fn test_tidy_leaves_clean_text_alone() {
        let (proposed, diffs) = RuleAnalyzer.tidy("Already tidy. Nothing to do.");
        assert_eq!(proposed, "Already tidy. Nothing to do.");
        assert!(diffs.is_empty());
    }

    #[test]
    fn test_detect_flashcards_and_patterns() {
        let text = "Lecture 2\n  - osmosis: diffusion of water\n  A cell is the unit of life.\n";
        let detections = RuleAnalyzer.detect(text);
        assert_eq!(detections.len(), 2);

        assert_eq!(detections[0].kind, DetectionKind::Flashcard);
        assert_eq!(detections[0].front, "osmosis");
        assert_eq!(detections[0].back, "diffusion of water");
        let range = detections[0].range;
        assert_eq!(&text[range.start..range.end], "osmosis: diffusion of water");

        assert_eq!(detections[1].kind, DetectionKind::Pattern);
        assert_eq!(detections[1].front, "A cell");
        assert_eq!(detections[1].back, "the unit of life");
        let range = detections[1].range;
        assert_eq!(&text[range.start..range.end], "A cell is the unit of life");
    }
}
