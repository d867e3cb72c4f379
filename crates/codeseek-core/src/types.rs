use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A contiguous slice of source text treated as one indexable item.
///
/// Lines are 1-based and inclusive. `text` is the exact source for
/// `start_line..=end_line` joined with `\n` (no trailing newline), or a
/// prefix of that line when `truncated` is set.
///
/// # Examples
///
/// ```
/// use codeseek_core::{CodeUnit, UnitKind};
///
/// let unit = CodeUnit::new("src/math.c", 1, 1, "int add(a,b){return a+b;}", UnitKind::Function, "add");
/// assert_eq!(unit.line_count(), 1);
/// assert_eq!(unit.content_hash.len(), 64);
/// assert!(!unit.truncated);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeUnit {
    /// Path of the source file, relative to the indexed root.
    pub source_path: String,
    /// First line (1-indexed).
    pub start_line: u32,
    /// Last line (1-indexed, inclusive).
    pub end_line: u32,
    /// Source text of the unit.
    pub text: String,
    /// How the unit boundary was found.
    pub unit_kind: UnitKind,
    /// Symbol name, or `snippet_<n>` for fragments.
    pub name: String,
    /// Set when the text was cut to fit the token budget.
    pub truncated: bool,
    /// SHA-256 of `text`, hex encoded.
    pub content_hash: String,
}

impl CodeUnit {
    /// Create a unit, hashing its text.
    pub fn new(
        source_path: impl Into<String>,
        start_line: u32,
        end_line: u32,
        text: impl Into<String>,
        unit_kind: UnitKind,
        name: impl Into<String>,
    ) -> Self {
        let text = text.into();
        let content_hash = content_hash(&text);
        Self {
            source_path: source_path.into(),
            start_line,
            end_line,
            text,
            unit_kind,
            name: name.into(),
            truncated: false,
            content_hash,
        }
    }

    /// Number of source lines the unit spans.
    pub fn line_count(&self) -> u32 {
        self.end_line - self.start_line + 1
    }

    /// `path:start-end`, used in log lines and failure reports.
    pub fn location(&self) -> String {
        format!("{}:{}-{}", self.source_path, self.start_line, self.end_line)
    }
}

/// Kind of a [`CodeUnit`].
///
/// # Examples
///
/// ```
/// use codeseek_core::UnitKind;
///
/// assert_eq!(UnitKind::FileFragment.to_string(), "file-fragment");
/// assert_eq!("function".parse::<UnitKind>().unwrap(), UnitKind::Function);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitKind {
    /// A top-level block introduced by a function signature.
    Function,
    /// Any other named top-level block (struct, class, namespace, ...).
    Block,
    /// A slice of a file with no detected structure.
    FileFragment,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKind::Function => write!(f, "function"),
            UnitKind::Block => write!(f, "block"),
            UnitKind::FileFragment => write!(f, "file-fragment"),
        }
    }
}

impl FromStr for UnitKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "function" => Ok(UnitKind::Function),
            "block" => Ok(UnitKind::Block),
            "file-fragment" => Ok(UnitKind::FileFragment),
            other => Err(format!("unknown unit kind: {other}")),
        }
    }
}

/// Hex-encoded SHA-256 of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A ranked search hit in owned, display-ready form.
///
/// # Examples
///
/// ```
/// use codeseek_core::{SearchResult, UnitKind};
///
/// let result = SearchResult {
///     rank: 1,
///     source_path: "src/db.c".into(),
///     start_line: 10,
///     end_line: 25,
///     name: "connect".into(),
///     unit_kind: UnitKind::Function,
///     snippet: "int connect() { ... }".into(),
///     score: 0.92,
/// };
/// assert!(result.score > 0.9);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// 1-based position in the result list.
    pub rank: usize,
    /// Path to the file containing the match.
    pub source_path: String,
    /// First line of the matched unit.
    pub start_line: u32,
    /// Last line of the matched unit.
    pub end_line: u32,
    /// Symbol name of the unit.
    pub name: String,
    /// Kind of the unit.
    pub unit_kind: UnitKind,
    /// The matched code.
    pub snippet: String,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
}

/// Output format for CLI subcommands.
///
/// Implements [`FromStr`] so it can be used directly with `clap` argument parsing.
///
/// # Examples
///
/// ```
/// use codeseek_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
///
/// let fmt: OutputFormat = "md".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Markdown);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable listing.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
    /// Markdown-formatted output.
    Markdown,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_format_from_str() {
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!(
            "markdown".parse::<OutputFormat>().unwrap(),
            OutputFormat::Markdown
        );
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("sarif".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn unit_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&UnitKind::FileFragment).unwrap();
        assert_eq!(json, "\"file-fragment\"");
        let back: UnitKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, UnitKind::FileFragment);
    }

    #[test]
    fn content_hash_is_deterministic() {
        assert_eq!(content_hash("fn main() {}"), content_hash("fn main() {}"));
        assert_ne!(content_hash("a"), content_hash("b"));
    }

    #[test]
    fn location_formats_path_and_lines() {
        let unit = CodeUnit::new("a/b.c", 3, 9, "x", UnitKind::Block, "b");
        assert_eq!(unit.location(), "a/b.c:3-9");
        assert_eq!(unit.line_count(), 7);
    }

    #[test]
    fn search_result_serializes_camel_case() {
        let result = SearchResult {
            rank: 1,
            source_path: "lib.c".into(),
            start_line: 1,
            end_line: 5,
            name: "main".into(),
            unit_kind: UnitKind::Function,
            snippet: "int main() {}".into(),
            score: 0.5,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("sourcePath").is_some());
        assert!(json.get("startLine").is_some());
        assert_eq!(json["unitKind"], "function");
    }
}
