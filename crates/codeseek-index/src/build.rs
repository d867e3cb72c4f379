//! Index construction.
//!
//! [`IndexBuilder`] pulls code units lazily, fits each to the embedder's
//! token budget, and embeds them in batches with a bounded number of
//! requests in flight. Results are committed in unit order regardless of
//! which batch finishes first.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use codeseek_core::{CodeUnit, CodeseekError, EmbeddingConfig, IndexConfig};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::budget::{fit_to_budget, ApproxTokenizer, Tokenizer};
use crate::chunker::extract_units;
use crate::embedding::Embedder;
use crate::retry::{CancelFlag, RetryPolicy};
use crate::store::{Index, IndexEntry, IndexMetadata};

/// Progress callback: `(units_processed, units_discovered, phase)`.
///
/// `units_discovered` grows while the source walk is still running and is
/// final once the phase is `"done"`.
pub type ProgressFn = Arc<dyn Fn(usize, usize, &str) + Send + Sync>;

/// A unit that could not be embedded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub source_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub message: String,
}

impl UnitFailure {
    fn new(unit: &CodeUnit, error: &CodeseekError) -> Self {
        Self {
            source_path: unit.source_path.clone(),
            start_line: unit.start_line,
            end_line: unit.end_line,
            message: error.to_string(),
        }
    }
}

/// Outcome of a successful build.
#[derive(Debug)]
pub struct BuildReport {
    pub index: Index,
    /// Units after budgeting, embedded or not.
    pub units_total: usize,
    pub failures: Vec<UnitFailure>,
}

type UnitOutcome = Result<Vec<f32>, CodeseekError>;

/// Builds an [`Index`] from a stream of code units.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use std::sync::Arc;
/// use codeseek_core::{CodeseekConfig, IndexConfig};
/// use codeseek_index::build::IndexBuilder;
/// use codeseek_index::embedding::OpenAiEmbedder;
///
/// # async fn example() -> codeseek_core::Result<()> {
/// let config = CodeseekConfig::default();
/// let embedder = Arc::new(OpenAiEmbedder::with_config(&config.embedding, "sk-...")?);
/// let report = IndexBuilder::with_config(embedder, &config.embedding)
///     .with_progress(|done, total, phase| eprintln!("{phase}: {done}/{total}"))
///     .build_from_root(Path::new("."), &config.index)
///     .await?;
/// println!("{} entries, {} failed", report.index.len(), report.failures.len());
/// # Ok(())
/// # }
/// ```
pub struct IndexBuilder {
    embedder: Arc<dyn Embedder>,
    tokenizer: Arc<dyn Tokenizer>,
    retry: RetryPolicy,
    batch_size: usize,
    max_concurrent: usize,
    cancel: CancelFlag,
    progress: Option<ProgressFn>,
    source_root: String,
}

impl IndexBuilder {
    /// A builder with default batching and retry settings.
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self::with_config(embedder, &EmbeddingConfig::default())
    }

    /// A builder using the batching, concurrency, and retry settings in `config`.
    pub fn with_config(embedder: Arc<dyn Embedder>, config: &EmbeddingConfig) -> Self {
        Self {
            embedder,
            tokenizer: Arc::new(ApproxTokenizer::default()),
            retry: RetryPolicy::from_config(config),
            batch_size: config.batch_size.max(1),
            max_concurrent: config.max_concurrent_requests.max(1),
            cancel: CancelFlag::new(),
            progress: None,
            source_root: ".".into(),
        }
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Share an existing cancel flag instead of the builder's own.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(
        mut self,
        progress: impl Fn(usize, usize, &str) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Root recorded in the index metadata by [`build`](Self::build).
    pub fn with_source_root(mut self, source_root: impl Into<String>) -> Self {
        self.source_root = source_root.into();
        self
    }

    /// Handle for cancelling a build from elsewhere.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Walk `root`, extract its code units, and build an index from them.
    ///
    /// # Errors
    ///
    /// Everything [`extract_units`] and [`build`](Self::build) return.
    pub async fn build_from_root(
        &self,
        root: &Path,
        config: &IndexConfig,
    ) -> Result<BuildReport, CodeseekError> {
        let units = extract_units(root, config)?;
        self.build_inner(units, root.display().to_string()).await
    }

    /// Embed `units` into a new index.
    ///
    /// A unit that fails to embed is recorded in
    /// [`BuildReport::failures`] and left out of the index.
    ///
    /// # Errors
    ///
    /// Returns [`CodeseekError::EmptyBuild`] if no unit was embedded and
    /// [`CodeseekError::Cancelled`] if the cancel flag was set. Nothing
    /// embedded before cancellation is kept.
    pub async fn build<I>(&self, units: I) -> Result<BuildReport, CodeseekError>
    where
        I: IntoIterator<Item = CodeUnit>,
    {
        self.build_inner(units, self.source_root.clone()).await
    }

    async fn build_inner<I>(
        &self,
        units: I,
        source_root: String,
    ) -> Result<BuildReport, CodeseekError>
    where
        I: IntoIterator<Item = CodeUnit>,
    {
        let max_tokens = self.embedder.max_input_tokens();
        let tokenizer = Arc::clone(&self.tokenizer);
        let mut parts = units
            .into_iter()
            .flat_map(move |unit| fit_to_budget(unit, max_tokens, tokenizer.as_ref()));

        let mut tasks: JoinSet<(usize, Vec<CodeUnit>, Result<Vec<UnitOutcome>, CodeseekError>)> =
            JoinSet::new();
        let mut ready: BTreeMap<usize, (Vec<CodeUnit>, Vec<UnitOutcome>)> = BTreeMap::new();
        let mut exhausted = false;
        let mut dispatched = 0usize;
        let mut committed = 0usize;
        let mut discovered = 0usize;
        let mut processed = 0usize;
        let mut dim = self.embedder.dimensions();
        let mut entries = Vec::new();
        let mut failures = Vec::new();

        loop {
            while !exhausted && tasks.len() < self.max_concurrent {
                let batch: Vec<CodeUnit> = parts.by_ref().take(self.batch_size).collect();
                if batch.is_empty() {
                    exhausted = true;
                    break;
                }
                self.cancel.check()?;

                discovered += batch.len();
                let seq = dispatched;
                dispatched += 1;
                debug!(batch = seq, units = batch.len(), "dispatching batch");

                let texts: Vec<String> = batch.iter().map(|u| u.text.clone()).collect();
                let embedder = Arc::clone(&self.embedder);
                let retry = self.retry.clone();
                let cancel = self.cancel.clone();
                tasks.spawn(async move {
                    let outcome = embed_units(embedder.as_ref(), &retry, &cancel, texts).await;
                    (seq, batch, outcome)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (seq, batch, outcome) = match joined {
                Ok(done) => done,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => return Err(CodeseekError::Cancelled),
            };
            ready.insert(seq, (batch, outcome?));

            while let Some((batch, outcomes)) = ready.remove(&committed) {
                committed += 1;
                for (unit, outcome) in batch.into_iter().zip(outcomes) {
                    processed += 1;
                    match outcome.and_then(|vector| admit(vector, &mut dim)) {
                        Ok(vector) => entries.push(IndexEntry { unit, vector }),
                        Err(e) => {
                            warn!(unit = %unit.location(), error = %e, "skipping unit");
                            failures.push(UnitFailure::new(&unit, &e));
                        }
                    }
                    if let Some(progress) = &self.progress {
                        progress(processed, discovered, "embedding");
                    }
                }
            }
        }

        self.cancel.check()?;

        if entries.is_empty() {
            return Err(CodeseekError::EmptyBuild {
                units: processed,
                failed: failures.len(),
            });
        }

        let metadata = IndexMetadata {
            source_root,
            provider_model_id: self.embedder.model_id().to_string(),
            vector_dim: dim.unwrap_or(0),
            created_at: Utc::now(),
        };
        let index = Index::from_parts(metadata, entries)?;

        if let Some(progress) = &self.progress {
            progress(processed, processed, "done");
        }
        info!(
            entries = index.len(),
            failed = failures.len(),
            units = processed,
            "index built"
        );

        Ok(BuildReport {
            index,
            units_total: processed,
            failures,
        })
    }
}

/// Embed one batch, falling back to per-unit calls if the batch fails.
///
/// The outer error is only ever [`CodeseekError::Cancelled`].
async fn embed_units(
    embedder: &dyn Embedder,
    retry: &RetryPolicy,
    cancel: &CancelFlag,
    texts: Vec<String>,
) -> Result<Vec<UnitOutcome>, CodeseekError> {
    let batch = retry
        .run(cancel, "embedding batch", || embedder.embed_batch(&texts))
        .await;

    match batch {
        Ok(vectors) if vectors.len() == texts.len() => {
            return Ok(vectors.into_iter().map(Ok).collect());
        }
        Err(CodeseekError::Cancelled) => return Err(CodeseekError::Cancelled),
        Ok(vectors) if texts.len() == 1 => {
            return Ok(vec![Err(CodeseekError::permanent(format!(
                "expected 1 embedding, got {}",
                vectors.len()
            )))]);
        }
        Err(e) if texts.len() == 1 => return Ok(vec![Err(e)]),
        Ok(vectors) => warn!(
            expected = texts.len(),
            got = vectors.len(),
            "batch returned the wrong number of embeddings; retrying units one at a time"
        ),
        Err(e) => warn!(
            units = texts.len(),
            error = %e,
            "batch failed; retrying units one at a time"
        ),
    }

    let mut outcomes = Vec::with_capacity(texts.len());
    for text in &texts {
        match retry.run(cancel, "embedding", || embedder.embed(text)).await {
            Err(CodeseekError::Cancelled) => return Err(CodeseekError::Cancelled),
            outcome => outcomes.push(outcome),
        }
    }
    Ok(outcomes)
}

/// Accept a vector into an index of dimension `dim`, fixing `dim` on first use.
fn admit(vector: Vec<f32>, dim: &mut Option<usize>) -> Result<Vec<f32>, CodeseekError> {
    if vector.is_empty() {
        return Err(CodeseekError::permanent("provider returned an empty vector"));
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(CodeseekError::permanent(
            "provider returned a vector with non-finite values",
        ));
    }
    match *dim {
        Some(expected) if expected != vector.len() => Err(CodeseekError::DimensionMismatch {
            expected,
            actual: vector.len(),
        }),
        Some(_) => Ok(vector),
        None => {
            *dim = Some(vector.len());
            Ok(vector)
        }
    }
}
