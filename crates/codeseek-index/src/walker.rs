use std::collections::HashSet;
use std::path::{Path, PathBuf};

use codeseek_core::{CodeseekError, IndexConfig};
use ignore::overrides::OverrideBuilder;
use tracing::{debug, warn};

/// Number of bytes to check for binary detection.
const BINARY_CHECK_SIZE: usize = 8192;

/// A source file discovered during walking.
///
/// # Examples
///
/// ```
/// use codeseek_index::walker::{Language, SourceFile};
///
/// let file = SourceFile {
///     path: "src/main.c".into(),
///     language: Language::C,
///     content: "int main() { return 0; }".to_string(),
/// };
/// assert!(file.language.is_brace_delimited());
/// ```
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the walked root, `/`-separated.
    pub path: String,
    /// Detected programming language.
    pub language: Language,
    /// Full file content.
    pub content: String,
}

/// Programming language detected from file extension.
///
/// # Examples
///
/// ```
/// use codeseek_index::walker::Language;
///
/// assert_eq!(Language::from_extension("c"), Language::C);
/// assert_eq!(Language::from_extension("hpp"), Language::Cpp);
/// assert_eq!(Language::from_extension("py"), Language::Python);
/// assert_eq!(Language::from_extension("sh"), Language::Shell);
/// assert_eq!(Language::from_extension("txt"), Language::Unknown);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    C,
    Cpp,
    JavaScript,
    TypeScript,
    Java,
    Go,
    Rust,
    CSharp,
    Kotlin,
    Swift,
    Php,
    Python,
    Ruby,
    Shell,
    Unknown,
}

impl Language {
    /// Detect language from a file extension string (without the dot).
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "c" | "h" => Language::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hxx" | "hh" => Language::Cpp,
            "js" | "jsx" | "mjs" => Language::JavaScript,
            "ts" | "tsx" => Language::TypeScript,
            "java" => Language::Java,
            "go" => Language::Go,
            "rs" => Language::Rust,
            "cs" => Language::CSharp,
            "kt" | "kts" => Language::Kotlin,
            "swift" => Language::Swift,
            "php" => Language::Php,
            "py" => Language::Python,
            "rb" => Language::Ruby,
            "sh" | "bash" | "zsh" => Language::Shell,
            _ => Language::Unknown,
        }
    }

    /// Whether top-level units in this language are delimited by `{ }`.
    pub fn is_brace_delimited(&self) -> bool {
        !matches!(
            self,
            Language::Python | Language::Ruby | Language::Shell | Language::Unknown
        )
    }
}

/// Lazy walk over the eligible source files below a root.
///
/// Honours `.gitignore`, skips hidden entries, binary files, files over the
/// configured size, files whose extension is not listed, and files matching
/// an ignore pattern. A file is read only when the iterator reaches it.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use codeseek_core::IndexConfig;
/// use codeseek_index::walker::SourceWalker;
///
/// let walker = SourceWalker::new(Path::new("."), &IndexConfig::default()).unwrap();
/// for file in walker {
///     println!("{}: {:?}", file.path, file.language);
/// }
/// ```
pub struct SourceWalker {
    root: PathBuf,
    walk: ignore::Walk,
    extensions: HashSet<String>,
    max_file_size: u64,
}

impl SourceWalker {
    /// Start a walk at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`CodeseekError::PathNotFound`] if `root` does not exist,
    /// [`CodeseekError::PathNotReadable`] if it cannot be opened, or
    /// [`CodeseekError::Config`] if an ignore pattern is not a valid glob.
    pub fn new(root: &Path, config: &IndexConfig) -> Result<Self, CodeseekError> {
        check_root(root)?;

        let mut overrides = OverrideBuilder::new(root);
        for pattern in &config.ignore_patterns {
            overrides.add(&format!("!{pattern}")).map_err(|e| {
                CodeseekError::Config(format!("invalid ignore pattern '{pattern}': {e}"))
            })?;
        }
        let overrides = overrides
            .build()
            .map_err(|e| CodeseekError::Config(format!("invalid ignore patterns: {e}")))?;

        let walk = ignore::WalkBuilder::new(root)
            .overrides(overrides)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        Ok(Self {
            root: root.to_path_buf(),
            walk,
            extensions: config
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            max_file_size: config.max_file_size,
        })
    }

    fn load(&self, path: &Path) -> Option<SourceFile> {
        let ext = path.extension().and_then(|e| e.to_str())?;
        if !self.extensions.contains(&ext.to_ascii_lowercase()) {
            return None;
        }

        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot stat file; skipping");
                return None;
            }
        };
        if metadata.len() > self.max_file_size {
            debug!(path = %path.display(), size = metadata.len(), "file too large; skipping");
            return None;
        }

        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read file; skipping");
                return None;
            }
        };

        // Null bytes in the first 8KB mean binary content
        let check_len = bytes.len().min(BINARY_CHECK_SIZE);
        if bytes[..check_len].contains(&0) {
            debug!(path = %path.display(), "binary file; skipping");
            return None;
        }

        let content = match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        };

        Some(SourceFile {
            path: relative_path(&self.root, path),
            language: Language::from_extension(ext),
            content,
        })
    }
}

impl Iterator for SourceWalker {
    type Item = SourceFile;

    fn next(&mut self) -> Option<SourceFile> {
        loop {
            let entry = match self.walk.next()? {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "walk error; skipping entry");
                    continue;
                }
            };

            let Some(file_type) = entry.file_type() else {
                continue;
            };
            if !file_type.is_file() {
                continue;
            }

            if let Some(file) = self.load(entry.path()) {
                return Some(file);
            }
        }
    }
}

fn check_root(root: &Path) -> Result<(), CodeseekError> {
    let metadata = std::fs::metadata(root).map_err(|e| root_error(root, e))?;
    if metadata.is_dir() {
        std::fs::read_dir(root).map_err(|e| root_error(root, e))?;
    }
    Ok(())
}

fn root_error(root: &Path, e: std::io::Error) -> CodeseekError {
    if e.kind() == std::io::ErrorKind::NotFound {
        CodeseekError::PathNotFound(root.to_path_buf())
    } else {
        CodeseekError::PathNotReadable {
            path: root.to_path_buf(),
            source: e,
        }
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    let relative = match path.strip_prefix(root) {
        Ok(r) if !r.as_os_str().is_empty() => r,
        // Walking a single file: keep its name
        _ => path.file_name().map(Path::new).unwrap_or(path),
    };
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
