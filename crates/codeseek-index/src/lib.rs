//! Code-unit extraction, embedding, and similarity search.
//!
//! A source tree is walked with the `ignore` crate, split into code units
//! along brace boundaries (or fixed line windows for other languages),
//! fitted to the embedding model's token budget, and embedded in bounded
//! concurrent batches. The resulting [`Index`](store::Index) is persisted
//! as JSON and queried by brute-force cosine similarity.

pub mod budget;
pub mod build;
pub mod chunker;
pub mod embedding;
pub mod rank;
pub mod retry;
pub mod search;
pub mod store;
pub mod walker;

pub use build::{BuildReport, IndexBuilder, UnitFailure};
pub use chunker::extract_units;
pub use embedding::{Embedder, OpenAiEmbedder};
pub use rank::{rank, QueryResult};
pub use retry::CancelFlag;
pub use search::{search, search_with_timeout, SemanticSearch};
pub use store::{load, save, Index, IndexEntry, IndexMetadata};
