//! The in-memory index and its JSON persistence.
//!
//! An [`Index`] is immutable once built or loaded. [`save`] writes it
//! through a temp file in the destination directory and atomically renames
//! it into place, so readers see either the old file or the new one.
//! [`load`] refuses to hand out an index that fails any structural check.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use codeseek_core::{content_hash, CodeUnit, CodeseekError, UnitKind};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

/// Version written to and accepted from index files.
pub const FORMAT_VERSION: u32 = 1;

/// Facts about how an index was built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Root the units were extracted from, as given to the builder.
    pub source_root: String,
    /// Model that produced the vectors.
    pub provider_model_id: String,
    /// Length of every vector in the index.
    pub vector_dim: usize,
    pub created_at: DateTime<Utc>,
}

/// A code unit paired with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub unit: CodeUnit,
    pub vector: Vec<f32>,
}

impl IndexEntry {
    pub fn vector_dim(&self) -> usize {
        self.vector.len()
    }
}

/// An ordered, read-only collection of embedded code units.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use codeseek_core::{CodeUnit, UnitKind};
/// use codeseek_index::store::{Index, IndexEntry, IndexMetadata};
///
/// let metadata = IndexMetadata {
///     source_root: ".".into(),
///     provider_model_id: "test".into(),
///     vector_dim: 2,
///     created_at: Utc::now(),
/// };
/// let entry = IndexEntry {
///     unit: CodeUnit::new("a.c", 1, 1, "int a;", UnitKind::FileFragment, "a.c"),
///     vector: vec![1.0, 0.0],
/// };
/// let index = Index::from_parts(metadata, vec![entry]).unwrap();
/// assert_eq!(index.len(), 1);
/// assert_eq!(index.vector_dim(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct Index {
    metadata: IndexMetadata,
    entries: Vec<IndexEntry>,
}

impl Index {
    /// Assemble an index, checking every entry against the metadata.
    ///
    /// # Errors
    ///
    /// Returns [`CodeseekError::CorruptIndex`] if an entry has the wrong
    /// vector length, a non-finite component, an invalid line range, or a
    /// hash that does not match its text.
    pub fn from_parts(
        metadata: IndexMetadata,
        entries: Vec<IndexEntry>,
    ) -> Result<Self, CodeseekError> {
        validate(&metadata, &entries).map_err(CodeseekError::CorruptIndex)?;
        Ok(Self { metadata, entries })
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn vector_dim(&self) -> usize {
        self.metadata.vector_dim
    }
}

fn validate(metadata: &IndexMetadata, entries: &[IndexEntry]) -> Result<(), String> {
    if metadata.vector_dim == 0 && !entries.is_empty() {
        return Err("vector_dim is 0 but the index has entries".into());
    }
    for (i, entry) in entries.iter().enumerate() {
        let unit = &entry.unit;
        if entry.vector_dim() != metadata.vector_dim {
            return Err(format!(
                "entry {i} ({}) has {} dimensions, expected {}",
                unit.location(),
                entry.vector_dim(),
                metadata.vector_dim
            ));
        }
        if entry.vector.iter().any(|v| !v.is_finite()) {
            return Err(format!("entry {i} ({}) has a non-finite vector", unit.location()));
        }
        if unit.start_line == 0 || unit.start_line > unit.end_line {
            return Err(format!(
                "entry {i} has invalid line range {}-{}",
                unit.start_line, unit.end_line
            ));
        }
        if content_hash(&unit.text) != unit.content_hash {
            return Err(format!(
                "entry {i} ({}) content hash does not match its text",
                unit.location()
            ));
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct DocumentOut<'a> {
    format_version: u32,
    metadata: MetadataRecord,
    entries: Vec<EntryOut<'a>>,
}

#[derive(Deserialize)]
struct DocumentIn {
    format_version: u32,
    metadata: MetadataRecord,
    entries: Vec<EntryIn>,
}

#[derive(Serialize, Deserialize)]
struct MetadataRecord {
    source_root: String,
    provider_model_id: String,
    vector_dim: usize,
    entry_count: usize,
    created_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct EntryOut<'a> {
    source_path: &'a str,
    start_line: u32,
    end_line: u32,
    unit_kind: UnitKind,
    name: &'a str,
    text: &'a str,
    truncated: bool,
    content_hash: &'a str,
    vector: &'a [f32],
}

#[derive(Deserialize)]
struct EntryIn {
    source_path: String,
    start_line: u32,
    end_line: u32,
    unit_kind: UnitKind,
    name: String,
    text: String,
    truncated: bool,
    content_hash: String,
    vector: Vec<f32>,
}

impl<'a> From<&'a IndexEntry> for EntryOut<'a> {
    fn from(entry: &'a IndexEntry) -> Self {
        let unit = &entry.unit;
        Self {
            source_path: &unit.source_path,
            start_line: unit.start_line,
            end_line: unit.end_line,
            unit_kind: unit.unit_kind,
            name: &unit.name,
            text: &unit.text,
            truncated: unit.truncated,
            content_hash: &unit.content_hash,
            vector: &entry.vector,
        }
    }
}

impl From<EntryIn> for IndexEntry {
    fn from(record: EntryIn) -> Self {
        Self {
            unit: CodeUnit {
                source_path: record.source_path,
                start_line: record.start_line,
                end_line: record.end_line,
                text: record.text,
                unit_kind: record.unit_kind,
                name: record.name,
                truncated: record.truncated,
                content_hash: record.content_hash,
            },
            vector: record.vector,
        }
    }
}

/// Write `index` to `destination` atomically, creating parent directories.
///
/// # Errors
///
/// Returns [`CodeseekError::Persistence`] on any I/O fault. An existing
/// file at `destination` is left untouched when the write fails.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use codeseek_index::store::{load, save};
///
/// let index = load(Path::new(".codeseek/index.json")).unwrap();
/// save(&index, Path::new("backup/index.json")).unwrap();
/// ```
pub fn save(index: &Index, destination: &Path) -> Result<(), CodeseekError> {
    let parent = match destination.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| {
        CodeseekError::Persistence(format!("failed to create {}: {e}", parent.display()))
    })?;

    let document = DocumentOut {
        format_version: FORMAT_VERSION,
        metadata: MetadataRecord {
            source_root: index.metadata.source_root.clone(),
            provider_model_id: index.metadata.provider_model_id.clone(),
            vector_dim: index.metadata.vector_dim,
            entry_count: index.entries.len(),
            created_at: index.metadata.created_at,
        },
        entries: index.entries.iter().map(EntryOut::from).collect(),
    };

    let write_err =
        |e: std::io::Error| CodeseekError::Persistence(format!("failed to write index: {e}"));

    let mut tmp = NamedTempFile::new_in(parent).map_err(write_err)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer(&mut writer, &document)
            .map_err(|e| CodeseekError::Persistence(format!("failed to write index: {e}")))?;
        writer.flush().map_err(write_err)?;
    }
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(destination).map_err(|e| {
        CodeseekError::Persistence(format!(
            "failed to replace {}: {}",
            destination.display(),
            e.error
        ))
    })?;

    debug!(path = %destination.display(), entries = index.len(), "index saved");
    Ok(())
}

/// Read and validate an index written by [`save`].
///
/// # Errors
///
/// Returns [`CodeseekError::Persistence`] if the file cannot be read and
/// [`CodeseekError::CorruptIndex`] if it is malformed, has an unsupported
/// version, or fails validation.
pub fn load(source: &Path) -> Result<Index, CodeseekError> {
    let bytes = fs::read(source).map_err(|e| {
        CodeseekError::Persistence(format!("failed to read {}: {e}", source.display()))
    })?;

    let document: DocumentIn = serde_json::from_slice(&bytes)
        .map_err(|e| CodeseekError::CorruptIndex(format!("{}: {e}", source.display())))?;

    if document.format_version != FORMAT_VERSION {
        return Err(CodeseekError::CorruptIndex(format!(
            "unsupported format_version {} (expected {FORMAT_VERSION})",
            document.format_version
        )));
    }
    let record = document.metadata;
    if record.entry_count != document.entries.len() {
        return Err(CodeseekError::CorruptIndex(format!(
            "metadata declares {} entries, file has {}",
            record.entry_count,
            document.entries.len()
        )));
    }

    let metadata = IndexMetadata {
        source_root: record.source_root,
        provider_model_id: record.provider_model_id,
        vector_dim: record.vector_dim,
        created_at: record.created_at,
    };
    let entries = document.entries.into_iter().map(IndexEntry::from).collect();
    let index = Index::from_parts(metadata, entries)?;

    debug!(path = %source.display(), entries = index.len(), "index loaded");
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Index {
        let metadata = IndexMetadata {
            source_root: "/src/project".into(),
            provider_model_id: "fake-model".into(),
            vector_dim: 3,
            created_at: Utc::now(),
        };
        let entries = vec![
            IndexEntry {
                unit: CodeUnit::new("a.c", 1, 3, "int a() {\n  return 1;\n}", UnitKind::Function, "a"),
                vector: vec![0.1, 0.2, 0.3],
            },
            IndexEntry {
                unit: CodeUnit::new("b.py", 1, 1, "print(1)", UnitKind::FileFragment, "snippet_0"),
                vector: vec![-1.0, 0.0, 1.0],
            },
        ];
        Index::from_parts(metadata, entries).unwrap()
    }

    fn rewrite(path: &Path, edit: impl FnOnce(&mut serde_json::Value)) {
        let mut doc: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        edit(&mut doc);
        fs::write(path, serde_json::to_string(&doc).unwrap()).unwrap();
    }

    #[test]
    fn save_then_load_preserves_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/index.json");
        let index = sample();
        save(&index, &path).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.metadata(), index.metadata());
        assert_eq!(loaded.entries(), index.entries());
    }

    #[test]
    fn file_uses_snake_case_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        save(&sample(), &path).unwrap();

        let doc: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["format_version"], 1);
        assert_eq!(doc["metadata"]["entry_count"], 2);
        assert_eq!(doc["metadata"]["vector_dim"], 3);
        assert_eq!(doc["entries"][0]["unit_kind"], "function");
        assert_eq!(doc["entries"][1]["unit_kind"], "file-fragment");
        assert_eq!(doc["entries"][0]["start_line"], 1);
    }

    #[test]
    fn save_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        fs::write(&path, "old").unwrap();
        save(&sample(), &path).unwrap();
        assert_eq!(load(&path).unwrap().len(), 2);
        // No temp files left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn save_into_unwritable_location_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();
        let err = save(&sample(), &blocker.join("index.json")).unwrap_err();
        assert!(matches!(err, CodeseekError::Persistence(_)), "{err}");
        assert_eq!(fs::read_to_string(&blocker).unwrap(), "not a directory");
    }

    #[test]
    fn missing_file_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, CodeseekError::Persistence(_)));
    }

    #[test]
    fn garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load(&path), Err(CodeseekError::CorruptIndex(_))));
    }

    #[test]
    fn entry_count_mismatch_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        save(&sample(), &path).unwrap();
        rewrite(&path, |doc| doc["metadata"]["entry_count"] = 3.into());
        let err = load(&path).unwrap_err();
        assert!(matches!(err, CodeseekError::CorruptIndex(_)));
        assert!(err.to_string().contains("declares 3"));
    }

    #[test]
    fn wrong_vector_length_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        save(&sample(), &path).unwrap();
        rewrite(&path, |doc| doc["entries"][1]["vector"] = serde_json::json!([1.0, 2.0]));
        assert!(matches!(load(&path), Err(CodeseekError::CorruptIndex(_))));
    }

    #[test]
    fn edited_text_fails_hash_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        save(&sample(), &path).unwrap();
        rewrite(&path, |doc| doc["entries"][0]["text"] = "int evil;".into());
        let err = load(&path).unwrap_err();
        assert!(err.to_string().contains("hash"));
    }

    #[test]
    fn unknown_version_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        save(&sample(), &path).unwrap();
        rewrite(&path, |doc| doc["format_version"] = 2.into());
        assert!(matches!(load(&path), Err(CodeseekError::CorruptIndex(_))));
    }

    #[test]
    fn inverted_line_range_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        save(&sample(), &path).unwrap();
        rewrite(&path, |doc| doc["entries"][0]["start_line"] = 9.into());
        assert!(matches!(load(&path), Err(CodeseekError::CorruptIndex(_))));
    }

    #[test]
    fn empty_index_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let index = Index::from_parts(
            IndexMetadata {
                source_root: ".".into(),
                provider_model_id: "m".into(),
                vector_dim: 0,
                created_at: Utc::now(),
            },
            Vec::new(),
        )
        .unwrap();
        save(&index, &path).unwrap();
        assert!(load(&path).unwrap().is_empty());
    }

    #[test]
    fn from_parts_rejects_non_finite_vectors() {
        let metadata = IndexMetadata {
            source_root: ".".into(),
            provider_model_id: "m".into(),
            vector_dim: 1,
            created_at: Utc::now(),
        };
        let entry = IndexEntry {
            unit: CodeUnit::new("a.c", 1, 1, "x", UnitKind::Block, "x"),
            vector: vec![f32::NAN],
        };
        assert!(Index::from_parts(metadata, vec![entry]).is_err());
    }
}
