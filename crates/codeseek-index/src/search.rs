//! Natural-language queries against a built index.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use codeseek_core::{CodeseekError, SearchResult};

use crate::budget::{ApproxTokenizer, Tokenizer};
use crate::embedding::Embedder;
use crate::rank::{rank, QueryResult};
use crate::store::{load, Index};

/// How long a query waits for its embedding unless told otherwise.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Embed `query_text` with one provider call and rank `index` against it.
///
/// The query is cut to the embedder's token ceiling first. The call is
/// bounded by [`DEFAULT_QUERY_TIMEOUT`]; use [`search_with_timeout`] to pick
/// another bound. Provider and dimension errors are returned unchanged;
/// there is no retry here.
///
/// # Errors
///
/// Returns [`CodeseekError::EmbeddingProvider`] if the embedding call fails
/// or times out (the timeout is retryable) and
/// [`CodeseekError::DimensionMismatch`] if the query vector does not match
/// the index.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use codeseek_index::embedding::OpenAiEmbedder;
/// use codeseek_index::search::search;
/// use codeseek_index::store::load;
///
/// # async fn example() -> codeseek_core::Result<()> {
/// let index = load(Path::new(".codeseek/index.json"))?;
/// let embedder = OpenAiEmbedder::new("sk-...");
/// for hit in search("open a database connection", &index, 5, &embedder).await? {
///     println!("{:.3} {}", hit.score, hit.entry.unit.location());
/// }
/// # Ok(())
/// # }
/// ```
pub async fn search<'a>(
    query_text: &str,
    index: &'a Index,
    top_k: usize,
    embedder: &dyn Embedder,
) -> Result<Vec<QueryResult<'a>>, CodeseekError> {
    search_with_timeout(query_text, index, top_k, embedder, DEFAULT_QUERY_TIMEOUT).await
}

/// [`search`] with an explicit bound on the embedding call.
pub async fn search_with_timeout<'a>(
    query_text: &str,
    index: &'a Index,
    top_k: usize,
    embedder: &dyn Embedder,
    call_timeout: Duration,
) -> Result<Vec<QueryResult<'a>>, CodeseekError> {
    let query = ApproxTokenizer::default().truncate(query_text, embedder.max_input_tokens().max(1));
    let vector = tokio::time::timeout(call_timeout, embedder.embed(query))
        .await
        .map_err(|_| {
            CodeseekError::transient(format!(
                "query embedding timed out after {}s",
                call_timeout.as_secs_f32()
            ))
        })??;
    rank(&vector, index, top_k)
}

/// A loaded index and an embedder, shareable across concurrent queries.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use std::sync::Arc;
/// use codeseek_index::embedding::OpenAiEmbedder;
/// use codeseek_index::search::SemanticSearch;
///
/// # async fn example() -> codeseek_core::Result<()> {
/// let search = SemanticSearch::open(
///     Path::new(".codeseek/index.json"),
///     Arc::new(OpenAiEmbedder::new("sk-...")),
/// )?;
/// let results = search.query("parse command line flags", 5).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SemanticSearch {
    index: Arc<Index>,
    embedder: Arc<dyn Embedder>,
    call_timeout: Duration,
}

impl SemanticSearch {
    pub fn new(index: Arc<Index>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            index,
            embedder,
            call_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Load the index at `path` and pair it with `embedder`.
    ///
    /// # Errors
    ///
    /// Everything [`load`] returns.
    pub fn open(path: &Path, embedder: Arc<dyn Embedder>) -> Result<Self, CodeseekError> {
        Ok(Self::new(Arc::new(load(path)?), embedder))
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Run a query, returning owned results ranked from 1.
    ///
    /// # Errors
    ///
    /// As [`search`], plus a retryable [`CodeseekError::EmbeddingProvider`]
    /// if the embedding call exceeds the call timeout.
    pub async fn query(&self, text: &str, top_k: usize) -> Result<Vec<SearchResult>, CodeseekError> {
        let hits = search_with_timeout(
            text,
            &self.index,
            top_k,
            self.embedder.as_ref(),
            self.call_timeout,
        )
        .await?;

        Ok(hits
            .into_iter()
            .enumerate()
            .map(|(i, hit)| {
                let unit = &hit.entry.unit;
                SearchResult {
                    rank: i + 1,
                    source_path: unit.source_path.clone(),
                    start_line: unit.start_line,
                    end_line: unit.end_line,
                    name: unit.name.clone(),
                    unit_kind: unit.unit_kind,
                    snippet: unit.text.clone(),
                    score: hit.score,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{IndexEntry, IndexMetadata};
    use async_trait::async_trait;
    use chrono::Utc;
    use codeseek_core::{CodeUnit, UnitKind};
    use std::sync::Mutex;

    /// Returns a fixed vector and remembers what it was asked to embed.
    struct Fixed {
        vector: Vec<f32>,
        seen: Mutex<Vec<String>>,
        max_tokens: usize,
    }

    impl Fixed {
        fn new(vector: Vec<f32>) -> Self {
            Self {
                vector,
                seen: Mutex::new(Vec::new()),
                max_tokens: 8000,
            }
        }
    }

    #[async_trait]
    impl Embedder for Fixed {
        fn model_id(&self) -> &str {
            "fixed"
        }
        fn max_input_tokens(&self) -> usize {
            self.max_tokens
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>, CodeseekError> {
            self.seen.lock().unwrap().push(text.to_string());
            Ok(self.vector.clone())
        }
    }

    struct Down;

    #[async_trait]
    impl Embedder for Down {
        fn model_id(&self) -> &str {
            "down"
        }
        fn max_input_tokens(&self) -> usize {
            8000
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, CodeseekError> {
            Err(CodeseekError::transient("503 service unavailable"))
        }
    }

    /// Never answers.
    struct Hang;

    #[async_trait]
    impl Embedder for Hang {
        fn model_id(&self) -> &str {
            "hang"
        }
        fn max_input_tokens(&self) -> usize {
            8000
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, CodeseekError> {
            std::future::pending().await
        }
    }

    fn two_entry_index() -> Index {
        let entries = vec![
            IndexEntry {
                unit: CodeUnit::new("m.c", 1, 1, "int add(a,b){return a+b;}", UnitKind::Function, "add"),
                vector: vec![1.0, 0.0],
            },
            IndexEntry {
                unit: CodeUnit::new("m.c", 2, 2, "int sub(a,b){return a-b;}", UnitKind::Function, "sub"),
                vector: vec![0.0, 1.0],
            },
        ];
        Index::from_parts(
            IndexMetadata {
                source_root: ".".into(),
                provider_model_id: "fixed".into(),
                vector_dim: 2,
                created_at: Utc::now(),
            },
            entries,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn search_embeds_once_and_ranks() {
        let index = two_entry_index();
        let embedder = Fixed::new(vec![0.9, 0.1]);
        let hits = search("addition", &index, 1, &embedder).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.unit.name, "add");
        assert!((hits[0].score - 0.99388).abs() < 1e-4);
        assert_eq!(*embedder.seen.lock().unwrap(), vec!["addition".to_string()]);
    }

    #[tokio::test]
    async fn long_queries_are_truncated() {
        let index = two_entry_index();
        let mut embedder = Fixed::new(vec![1.0, 0.0]);
        embedder.max_tokens = 2;
        search(&"q".repeat(100), &index, 1, &embedder).await.unwrap();
        assert_eq!(embedder.seen.lock().unwrap()[0].len(), 8);
    }

    #[tokio::test]
    async fn provider_error_propagates_unchanged() {
        let err = search("x", &two_entry_index(), 3, &Down).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn stalled_provider_times_out_as_retryable() {
        let index = two_entry_index();
        let err = tokio::time::timeout(
            Duration::from_secs(5),
            search_with_timeout("x", &index, 1, &Hang, Duration::from_millis(50)),
        )
        .await
        .expect("search must give up on its own")
        .unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timed out"), "{err}");
    }

    #[tokio::test]
    async fn semantic_search_times_out_with_its_call_timeout() {
        let engine = SemanticSearch::new(Arc::new(two_entry_index()), Arc::new(Hang))
            .with_call_timeout(Duration::from_millis(50));
        let err = engine.query("x", 1).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn query_vector_of_wrong_length_is_mismatch() {
        let err = search("x", &two_entry_index(), 3, &Fixed::new(vec![1.0; 3]))
            .await
            .unwrap_err();
        assert!(matches!(err, CodeseekError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn semantic_search_returns_owned_ranked_results() {
        let engine = SemanticSearch::new(
            Arc::new(two_entry_index()),
            Arc::new(Fixed::new(vec![0.1, 0.9])),
        );
        let results = engine.query("subtract", 5).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[0].name, "sub");
        assert_eq!(results[1].rank, 2);
        assert_eq!(results[0].snippet, "int sub(a,b){return a-b;}");
    }

    #[tokio::test]
    async fn semantic_search_is_shareable_across_tasks() {
        let engine = SemanticSearch::new(
            Arc::new(two_entry_index()),
            Arc::new(Fixed::new(vec![1.0, 0.0])),
        );
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.query("add", 1).await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap()[0].name, "add");
        }
    }
}
