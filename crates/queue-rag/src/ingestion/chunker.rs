//! Fixed-size character window chunking

use crate::error::{Error, Result};

/// Splits text into overlapping windows of at most `chunk_size` characters
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    /// Window size in characters
    chunk_size: usize,
    /// Characters shared by consecutive windows
    overlap: usize,
}

impl FixedSizeChunker {
    /// Create a chunker; the overlap must be smaller than the window so windows advance
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::Config("chunk size must be positive".into()));
        }
        if overlap >= chunk_size {
            return Err(Error::Config(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                overlap, chunk_size
            )));
        }
        Ok(Self { chunk_size, overlap })
    }

    /// Window size in characters
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Chunk `text` after collapsing whitespace runs to single spaces
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let chars: Vec<char> = normalized.chars().collect();

        if chars.is_empty() {
            return Vec::new();
        }
        if chars.len() <= self.chunk_size {
            return vec![normalized];
        }

        let step = self.chunk_size - self.overlap;
        let mut chunks = Vec::with_capacity(chars.len() / step + 1);
        let mut start = 0;
        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            chunks.push(chars[start..end].iter().collect());
            start += step;
        }
        chunks
    }
}

impl Default for FixedSizeChunker {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 50,
        }
    }
}
