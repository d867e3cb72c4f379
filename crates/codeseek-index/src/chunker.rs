//! Heuristic code-unit extraction.
//!
//! Files are split along structural boundaries found by a
//! [`BoundaryDetector`]. Brace-delimited languages use [`BraceDetector`],
//! which tracks nesting depth line by line; everything else is cut into
//! fixed windows by [`LineWindowDetector`]. Neither is a parser: when the
//! heuristic cannot make sense of a file, the whole file becomes a single
//! [`UnitKind::FileFragment`] and the scan moves on.

use std::path::Path;

use codeseek_core::{CodeUnit, CodeseekError, IndexConfig, UnitKind};
use tracing::warn;

use crate::walker::{Language, SourceWalker};

/// Header keywords that introduce a non-function block.
const BLOCK_KEYWORDS: &[&str] = &[
    "struct",
    "class",
    "enum",
    "union",
    "namespace",
    "interface",
    "impl",
    "trait",
    "extern",
    "mod",
    "object",
];

/// Control-flow keywords that can open a top-level block in script files.
const CONTROL_KEYWORDS: &[&str] = &["if", "for", "while", "switch", "do", "try", "catch"];

/// Leading words of a `;` statement that is not a declaration.
const STATEMENT_KEYWORDS: &[&str] = &[
    "typedef", "return", "await", "new", "throw", "delete", "yield", "else", "case", "goto",
];

/// A unit boundary found by a detector, as 0-based inclusive line indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub kind: UnitKind,
    pub name: String,
}

/// Outcome of running a [`BoundaryDetector`] over a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// Units found, in file order, non-overlapping.
    Spans(Vec<Span>),
    /// The file has no recognisable structure.
    NoBoundaries,
    /// Delimiters do not balance; `line` is 1-based.
    Unbalanced { line: usize },
}

/// Strategy for locating unit boundaries in a file's lines.
pub trait BoundaryDetector: Send + Sync {
    fn detect(&self, lines: &[&str]) -> Detection;
}

/// Finds top-level `{ ... }` blocks in C-family source.
///
/// A unit starts at the first non-blank line of the header that introduces
/// the block (so a leading comment or a signature split over several lines
/// stays with its body) and ends on the line where the depth returns to
/// zero. Braces inside comments and string or char literals are ignored.
///
/// # Examples
///
/// ```
/// use codeseek_core::UnitKind;
/// use codeseek_index::chunker::{BoundaryDetector, BraceDetector, Detection};
///
/// let lines = ["int add(int a, int b) {", "    return a + b;", "}"];
/// let Detection::Spans(spans) = BraceDetector.detect(&lines) else { panic!() };
/// assert_eq!(spans.len(), 1);
/// assert_eq!((spans[0].start, spans[0].end), (0, 2));
/// assert_eq!(spans[0].kind, UnitKind::Function);
/// assert_eq!(spans[0].name, "add");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct BraceDetector;

#[derive(Default)]
struct Scanner {
    depth: i64,
    in_block_comment: bool,
    /// Inside a JS template literal, which may span lines.
    in_template: bool,
}

impl Scanner {
    /// Scan one line, returning its code with comments removed. `on_brace`
    /// sees every brace with the depth outside it and the code before it.
    /// `None` means the depth went negative.
    fn scan(&mut self, line: &str, mut on_brace: impl FnMut(char, i64, &str)) -> Option<String> {
        let chars: Vec<char> = line.chars().collect();
        let mut code = String::with_capacity(line.len());
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            let next = chars.get(i + 1).copied();

            if self.in_block_comment {
                if c == '*' && next == Some('/') {
                    self.in_block_comment = false;
                    i += 2;
                } else {
                    i += 1;
                }
                continue;
            }

            if self.in_template {
                if c == '\\' {
                    i += 2;
                    continue;
                }
                if c == '`' {
                    self.in_template = false;
                    code.push(c);
                }
                i += 1;
                continue;
            }

            match c {
                '/' if next == Some('/') => break,
                '/' if next == Some('*') => {
                    self.in_block_comment = true;
                    i += 2;
                    continue;
                }
                '`' => {
                    self.in_template = true;
                    code.push(c);
                    i += 1;
                    continue;
                }
                '"' => {
                    // Skip to the closing quote on this line
                    code.push(c);
                    i += 1;
                    while i < chars.len() {
                        if chars[i] == '\\' {
                            i += 2;
                            continue;
                        }
                        if chars[i] == c {
                            code.push(c);
                            break;
                        }
                        i += 1;
                    }
                    i += 1;
                    continue;
                }
                '\'' => {
                    // Only a short char literal counts; a lone quote (lifetime,
                    // apostrophe) is left alone
                    let close = if next == Some('\\') { i + 3 } else { i + 2 };
                    if chars.get(close) == Some(&'\'') {
                        code.push_str("''");
                        i = close + 1;
                        continue;
                    }
                }
                '{' => {
                    on_brace('{', self.depth, &code);
                    self.depth += 1;
                }
                '}' => {
                    self.depth -= 1;
                    if self.depth < 0 {
                        return None;
                    }
                    on_brace('}', self.depth, &code);
                }
                _ => {}
            }

            code.push(c);
            i += 1;
        }

        Some(code)
    }
}

impl BoundaryDetector for BraceDetector {
    fn detect(&self, lines: &[&str]) -> Detection {
        let mut scanner = Scanner::default();
        let mut spans = Vec::new();
        let mut code_lines: Vec<String> = Vec::with_capacity(lines.len());
        let mut header_start: Option<usize> = None;
        let mut open: Option<(usize, String)> = None;

        for (idx, line) in lines.iter().enumerate() {
            let depth_before = scanner.depth;
            let mut opened_here: Option<String> = None;

            let scanned = scanner.scan(line, |brace, depth, code_so_far| {
                if brace == '{' && depth == 0 && opened_here.is_none() {
                    opened_here = Some(code_so_far.to_string());
                }
            });
            let Some(code) = scanned else {
                return Detection::Unbalanced { line: idx + 1 };
            };

            if depth_before == 0 && header_start.is_none() && !line.trim().is_empty() {
                header_start = Some(idx);
            }

            if let Some(prefix) = opened_here {
                if open.is_none() {
                    let start = header_start.unwrap_or(idx);
                    let mut header = code_lines[start..idx].join(" ");
                    header.push(' ');
                    header.push_str(&prefix);
                    open = Some((start, header));
                }
            }
            code_lines.push(code);

            if scanner.depth == 0 {
                if let Some((start, header)) = open.take() {
                    let (kind, name) = classify_header(&header);
                    spans.push(Span {
                        start,
                        end: idx,
                        kind,
                        name,
                    });
                    header_start = None;
                    continue;
                }

                let trimmed = code_lines[idx].trim();
                if trimmed.ends_with(';') && !trimmed.starts_with('#') {
                    if let Some(start) = header_start {
                        let statement = code_lines[start..=idx].join(" ");
                        if let Some(name) = prototype_name(&statement) {
                            spans.push(Span {
                                start,
                                end: idx,
                                kind: UnitKind::Function,
                                name,
                            });
                        }
                    }
                }
                if line.trim().is_empty() || trimmed.ends_with(';') || trimmed.starts_with('#') {
                    header_start = None;
                }
            }
        }

        if scanner.depth != 0 {
            return Detection::Unbalanced { line: lines.len() };
        }
        if spans.is_empty() {
            Detection::NoBoundaries
        } else {
            Detection::Spans(fill_gaps(spans, lines))
        }
    }
}

/// Name of the function declared by a top-level `;`-terminated statement,
/// if it is a prototype such as `int parse(const char *s);`.
fn prototype_name(statement: &str) -> Option<String> {
    let statement = statement.trim();
    let paren = statement.find('(')?;
    let prefix = &statement[..paren];
    if prefix.contains('=') {
        return None;
    }
    let prefix_words: Vec<&str> = words(prefix).collect();
    // A return type and a name; a bare call like `init();` has only one word
    if prefix_words.len() < 2 {
        return None;
    }
    let first = prefix_words[0];
    if STATEMENT_KEYWORDS.contains(&first)
        || CONTROL_KEYWORDS.contains(&first)
        || prefix_words.iter().any(|w| BLOCK_KEYWORDS.contains(w))
    {
        return None;
    }
    let name = function_name(prefix);
    (name != "anonymous").then_some(name)
}

/// Cover top-level text between spans (declarations, includes, macros)
/// with fragment spans so nothing outside a block is lost.
fn fill_gaps(mut spans: Vec<Span>, lines: &[&str]) -> Vec<Span> {
    spans.sort_by_key(|s| s.start);

    let mut out = Vec::with_capacity(spans.len() * 2);
    let mut cursor = 0;
    let mut gaps = 0;
    let mut push_gap = |from: usize, to: usize, out: &mut Vec<Span>| {
        let Some(start) = (from..to).find(|&i| !lines[i].trim().is_empty()) else {
            return;
        };
        let Some(end) = (from..to).rev().find(|&i| !lines[i].trim().is_empty()) else {
            return;
        };
        out.push(Span {
            start,
            end,
            kind: UnitKind::FileFragment,
            name: format!("snippet_{gaps}"),
        });
        gaps += 1;
    };

    for span in spans {
        push_gap(cursor, span.start, &mut out);
        cursor = span.end + 1;
        out.push(span);
    }
    push_gap(cursor, lines.len(), &mut out);
    out
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !is_ident_char(c))
        .filter(|w| !w.is_empty())
}

/// Classify a block header and pull a name out of it.
fn classify_header(header: &str) -> (UnitKind, String) {
    let header = header.trim();

    if let Some(first) = words(header).next() {
        if CONTROL_KEYWORDS.contains(&first) {
            return (UnitKind::Block, first.to_string());
        }
    }

    let before_paren = header.find('(').map(|p| &header[..p]);
    let keyword = words(before_paren.unwrap_or(header)).position(|w| BLOCK_KEYWORDS.contains(&w));

    match (before_paren, keyword) {
        (Some(prefix), None) => (UnitKind::Function, function_name(prefix)),
        (_, Some(pos)) => {
            let all: Vec<&str> = words(header).collect();
            let name = all
                .get(pos + 1)
                .or_else(|| all.get(pos))
                .map(|w| w.to_string())
                .unwrap_or_else(|| "block".into());
            (UnitKind::Block, name)
        }
        (None, None) => {
            let name = words(header)
                .last()
                .map(|w| w.to_string())
                .unwrap_or_else(|| "block".into());
            (UnitKind::Block, name)
        }
    }
}

/// The (possibly qualified) identifier immediately before a `(`.
fn function_name(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches(|c: char| c.is_whitespace() || c == '=' || c == ':');
    let start = trimmed
        .char_indices()
        .rev()
        .take_while(|(_, c)| is_ident_char(*c) || *c == ':' || *c == '.' || *c == '~')
        .last()
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    let name = trimmed[start..].trim_matches(|c: char| c == ':' || c == '.');
    if name.is_empty() {
        "anonymous".into()
    } else {
        name.to_string()
    }
}

/// Cuts a file into fixed windows of `lines` lines, dropping blank windows.
///
/// A window size of zero reports [`Detection::NoBoundaries`], which keeps
/// the file whole.
#[derive(Debug, Clone, Copy)]
pub struct LineWindowDetector {
    pub lines: usize,
}

impl BoundaryDetector for LineWindowDetector {
    fn detect(&self, lines: &[&str]) -> Detection {
        if self.lines == 0 {
            return Detection::NoBoundaries;
        }
        let spans: Vec<Span> = (0..lines.len())
            .step_by(self.lines)
            .enumerate()
            .filter_map(|(n, start)| {
                let end = (start + self.lines).min(lines.len()) - 1;
                if lines[start..=end].iter().all(|l| l.trim().is_empty()) {
                    return None;
                }
                Some(Span {
                    start,
                    end,
                    kind: UnitKind::FileFragment,
                    name: format!("snippet_{n}"),
                })
            })
            .collect();
        Detection::Spans(spans)
    }
}

/// The detector used for files of `language`.
pub fn detector_for(language: Language, fragment_lines: usize) -> Box<dyn BoundaryDetector> {
    if language.is_brace_delimited() {
        Box::new(BraceDetector)
    } else {
        Box::new(LineWindowDetector {
            lines: fragment_lines,
        })
    }
}

/// Split one file into code units using `detector`.
///
/// Empty and whitespace-only files produce no units. A file without
/// boundaries, or with unbalanced delimiters, produces one whole-file
/// fragment.
///
/// # Examples
///
/// ```
/// use codeseek_core::UnitKind;
/// use codeseek_index::chunker::{chunk_with, BraceDetector};
///
/// let units = chunk_with("math.c", "int add(a,b){return a+b;}\nint sub(a,b){return a-b;}\n", &BraceDetector);
/// assert_eq!(units.len(), 2);
/// assert_eq!(units[1].name, "sub");
/// assert_eq!(units[1].start_line, 2);
/// assert_eq!(units[1].unit_kind, UnitKind::Function);
/// ```
pub fn chunk_with(path: &str, content: &str, detector: &dyn BoundaryDetector) -> Vec<CodeUnit> {
    let body = content.strip_suffix('\n').unwrap_or(content);
    if body.trim().is_empty() {
        return Vec::new();
    }
    let lines: Vec<&str> = body.split('\n').collect();

    match detector.detect(&lines) {
        Detection::Spans(spans) => spans
            .into_iter()
            .map(|span| {
                CodeUnit::new(
                    path,
                    span.start as u32 + 1,
                    span.end as u32 + 1,
                    lines[span.start..=span.end].join("\n"),
                    span.kind,
                    span.name,
                )
            })
            .collect(),
        Detection::NoBoundaries => vec![whole_file(path, body, lines.len())],
        Detection::Unbalanced { line } => {
            warn!(path, line, "unbalanced delimiters; indexing whole file");
            vec![whole_file(path, body, lines.len())]
        }
    }
}

fn whole_file(path: &str, body: &str, line_count: usize) -> CodeUnit {
    let name = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());
    CodeUnit::new(
        path,
        1,
        line_count as u32,
        body,
        UnitKind::FileFragment,
        name,
    )
}

/// Split one file into code units with the detector for its language.
pub fn chunk_file(
    path: &str,
    content: &str,
    language: Language,
    fragment_lines: usize,
) -> Vec<CodeUnit> {
    chunk_with(path, content, detector_for(language, fragment_lines).as_ref())
}

/// Lazy stream of code units below a root; see [`extract_units`].
pub struct UnitStream {
    files: SourceWalker,
    pending: std::vec::IntoIter<CodeUnit>,
    fragment_lines: usize,
}

impl Iterator for UnitStream {
    type Item = CodeUnit;

    fn next(&mut self) -> Option<CodeUnit> {
        loop {
            if let Some(unit) = self.pending.next() {
                return Some(unit);
            }
            let file = self.files.next()?;
            self.pending =
                chunk_file(&file.path, &file.content, file.language, self.fragment_lines)
                    .into_iter();
        }
    }
}

/// Walk `root` and yield its code units one file at a time.
///
/// The stream is finite and not restartable; only the current file's
/// units are held in memory.
///
/// # Errors
///
/// Returns [`CodeseekError::PathNotFound`] or
/// [`CodeseekError::PathNotReadable`] if `root` cannot be walked.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use codeseek_core::IndexConfig;
/// use codeseek_index::chunker::extract_units;
///
/// let units: Vec<_> = extract_units(Path::new("."), &IndexConfig::default()).unwrap().collect();
/// println!("Found {} units", units.len());
/// ```
pub fn extract_units(root: &Path, config: &IndexConfig) -> Result<UnitStream, CodeseekError> {
    Ok(UnitStream {
        files: SourceWalker::new(root, config)?,
        pending: Vec::new().into_iter(),
        fragment_lines: config.fragment_lines,
    })
}
