//! Offline ingestion: chunk, embed, store

mod chunker;
mod processor;

pub use chunker::FixedSizeChunker;
pub use processor::{IngestPipeline, IngestReport};
