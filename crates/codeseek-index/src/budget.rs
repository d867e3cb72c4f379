//! Token budgeting for code units.
//!
//! Embedding providers reject inputs over a token ceiling. Units that fit
//! pass through untouched; larger ones are split at line boundaries, and a
//! single line that is still too long is truncated.

use codeseek_core::CodeUnit;
use tracing::warn;

/// Counts and trims text in provider tokens.
pub trait Tokenizer: Send + Sync {
    /// Number of tokens `text` occupies.
    fn count_tokens(&self, text: &str) -> usize;

    /// The longest prefix of `text` that fits in `max_tokens`.
    fn truncate<'a>(&self, text: &'a str, max_tokens: usize) -> &'a str;
}

/// Byte-ratio token estimate.
///
/// Close enough for code with BPE tokenizers, and always at least as
/// pessimistic as the provider for ASCII-heavy source.
///
/// # Examples
///
/// ```
/// use codeseek_index::budget::{ApproxTokenizer, Tokenizer};
///
/// let tok = ApproxTokenizer::default();
/// assert_eq!(tok.count_tokens("abcdefgh"), 2);
/// assert_eq!(tok.count_tokens("abcdefghi"), 3);
/// assert_eq!(tok.truncate("abcdefghi", 1), "abcd");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ApproxTokenizer {
    pub bytes_per_token: usize,
}

impl Default for ApproxTokenizer {
    fn default() -> Self {
        Self { bytes_per_token: 4 }
    }
}

impl Tokenizer for ApproxTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        text.len().div_ceil(self.bytes_per_token.max(1))
    }

    fn truncate<'a>(&self, text: &'a str, max_tokens: usize) -> &'a str {
        let mut end = max_tokens
            .saturating_mul(self.bytes_per_token.max(1))
            .min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        &text[..end]
    }
}

/// Make `unit` fit in `max_tokens`, splitting or truncating as needed.
///
/// Split units keep the original name, kind, and path; their line ranges
/// are contiguous, non-overlapping, and cover the original range. A
/// `max_tokens` of zero is treated as one.
///
/// # Examples
///
/// ```
/// use codeseek_core::{CodeUnit, UnitKind};
/// use codeseek_index::budget::{fit_to_budget, ApproxTokenizer};
///
/// let unit = CodeUnit::new("a.c", 1, 2, "aaaaaaaa\nbbbbbbbb", UnitKind::Block, "a");
/// let parts = fit_to_budget(unit, 3, &ApproxTokenizer::default());
/// assert_eq!(parts.len(), 2);
/// assert_eq!((parts[1].start_line, parts[1].end_line), (2, 2));
/// ```
pub fn fit_to_budget(unit: CodeUnit, max_tokens: usize, tokenizer: &dyn Tokenizer) -> Vec<CodeUnit> {
    let max_tokens = max_tokens.max(1);
    let mut out = Vec::new();
    split_into(unit, max_tokens, tokenizer, &mut out);
    out
}

fn split_into(unit: CodeUnit, max_tokens: usize, tokenizer: &dyn Tokenizer, out: &mut Vec<CodeUnit>) {
    if tokenizer.count_tokens(&unit.text) <= max_tokens {
        out.push(unit);
        return;
    }

    let lines: Vec<&str> = unit.text.split('\n').collect();
    if lines.len() < 2 {
        let text = tokenizer.truncate(&unit.text, max_tokens);
        warn!(
            unit = %unit.location(),
            tokens = tokenizer.count_tokens(&unit.text),
            max_tokens,
            "single line exceeds token budget; truncating"
        );
        let mut cut = CodeUnit::new(
            unit.source_path.as_str(),
            unit.start_line,
            unit.end_line,
            text,
            unit.unit_kind,
            unit.name.as_str(),
        );
        cut.truncated = true;
        out.push(cut);
        return;
    }

    let mid = lines.len() / 2;
    let first_end = unit.start_line + mid as u32 - 1;
    let head = CodeUnit::new(
        unit.source_path.as_str(),
        unit.start_line,
        first_end,
        lines[..mid].join("\n"),
        unit.unit_kind,
        unit.name.as_str(),
    );
    let tail = CodeUnit::new(
        unit.source_path.as_str(),
        first_end + 1,
        unit.end_line,
        lines[mid..].join("\n"),
        unit.unit_kind,
        unit.name.as_str(),
    );
    split_into(head, max_tokens, tokenizer, out);
    split_into(tail, max_tokens, tokenizer, out);
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeseek_core::UnitKind;

    fn unit(text: &str, start: u32) -> CodeUnit {
        let lines = text.split('\n').count() as u32;
        CodeUnit::new("src/big.c", start, start + lines - 1, text, UnitKind::Function, "big")
    }

    #[test]
    fn unit_within_budget_is_unchanged() {
        let original = unit("int x;\nint y;", 4);
        let parts = fit_to_budget(original.clone(), 100, &ApproxTokenizer::default());
        assert_eq!(parts, vec![original]);
    }

    #[test]
    fn split_parts_cover_the_original_range() {
        let text: String = (0..50)
            .map(|i| format!("    line_{i:02} = compute({i});"))
            .collect::<Vec<_>>()
            .join("\n");
        let original = unit(&text, 10);
        let tok = ApproxTokenizer::default();
        let parts = fit_to_budget(original.clone(), 40, &tok);

        assert!(parts.len() > 1);
        assert_eq!(parts[0].start_line, 10);
        assert_eq!(parts.last().unwrap().end_line, original.end_line);
        for pair in parts.windows(2) {
            assert_eq!(pair[0].end_line + 1, pair[1].start_line);
        }
        for part in &parts {
            assert!(tok.count_tokens(&part.text) <= 40);
            assert_eq!(part.name, "big");
            assert_eq!(part.unit_kind, UnitKind::Function);
            assert!(!part.truncated);
        }
        let rejoined: Vec<&str> = parts.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(rejoined.join("\n"), text);
    }

    #[test]
    fn long_single_line_is_truncated() {
        let long = "x".repeat(1000);
        let parts = fit_to_budget(unit(&long, 1), 10, &ApproxTokenizer::default());
        assert_eq!(parts.len(), 1);
        assert!(parts[0].truncated);
        assert_eq!(parts[0].text.len(), 40);
        assert_eq!((parts[0].start_line, parts[0].end_line), (1, 1));
        assert_eq!(parts[0].content_hash, codeseek_core::content_hash(&parts[0].text));
    }

    #[test]
    fn fitting_a_fitted_part_changes_nothing() {
        let tok = ApproxTokenizer::default();
        let split_text: String = (0..30)
            .map(|i| format!("total += weight_{i} * value_{i};"))
            .collect::<Vec<_>>()
            .join("\n");
        let long_line = format!("char *banner = \"{}\";", "=".repeat(300));

        for (original, budget) in [(unit(&split_text, 3), 25), (unit(&long_line, 7), 12)] {
            let parts = fit_to_budget(original, budget, &tok);
            assert!(!parts.is_empty());
            for part in parts {
                assert_eq!(fit_to_budget(part.clone(), budget, &tok), vec![part]);
            }
        }
    }

    #[test]
    fn zero_budget_is_treated_as_one() {
        let parts = fit_to_budget(unit("abcdefgh", 1), 0, &ApproxTokenizer::default());
        assert_eq!(parts[0].text, "abcd");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let tok = ApproxTokenizer::default();
        let text = "ab\u{00e9}\u{00e9}";
        assert_eq!(tok.truncate(text, 1), "ab\u{00e9}");
        assert_eq!(tok.truncate("short", 50), "short");
    }
}
