//! Extraction pipeline: dialogue → knowledge graph bundle
//!
//! The write path of the memory engine:
//! - `preprocess`: role normalisation, cleaning, filtering, chunking
//! - `pruning`: scene-based semantic pruning of low-value messages
//! - `chunker`: recursive / sentence / LLM sub-chunking strategies
//! - `extractor`: LLM-structured statements, entity mentions, relations
//! - `dedup`: two-layer entity deduplication & disambiguation
//! - `summarizer`: per-chunk episodic summaries with title + type
//! - `coordinator`: orchestrates all of it into one transactional write

pub mod chunker;
pub mod coordinator;
pub mod dedup;
pub mod extractor;
pub mod preprocess;
pub mod prompts;
pub mod pruning;
pub mod schema;
pub mod summarizer;

pub use chunker::{chunker_for, LlmChunker, RecursiveChunker, SentenceChunker};
pub use coordinator::WriteCoordinator;
pub use dedup::{merge_descriptions, DedupOutcome, DedupReport, Deduplicator};
pub use extractor::{ChunkExtraction, DraftEntity, DraftRelation, DraftStatement, StatementExtractor};
pub use preprocess::{clean_text, PreparedChunk, PreparedDialogue, Preprocessor};
pub use pruning::SemanticPruner;
pub use summarizer::{DraftSummary, Summarizer};
