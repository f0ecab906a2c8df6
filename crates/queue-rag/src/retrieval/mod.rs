//! Retrieval and prompt assembly

pub mod search;

pub use search::Retriever;
