/// Mock embedder for tests and `--mock-embedder` runs.
///
/// Vectors are derived from a SHA-256 digest of the text, so equal texts
/// always map to the same unit vector and different texts almost never do.
use sha2::{Digest, Sha256};

use super::{Embedder, EmbedderError};

/// A mock embedder that produces deterministic vectors from text hashes.
///
/// Useful for testing without loading a real ONNX model.
pub struct MockEmbedder {
    pub dimensions: usize,
}

impl MockEmbedder {
    /// Create a new `MockEmbedder` with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self { dimensions: 768 }
    }
}

impl Embedder for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let digest = Sha256::digest(text.as_bytes());

        // Centre the bytes around zero so vectors spread over all orthants
        let mut embedding: Vec<f32> = (0..self.dimensions)
            .map(|i| {
                let byte = digest[i % digest.len()] ^ (i / digest.len()) as u8;
                f32::from(byte) / 255.0 - 0.5
            })
            .collect();

        let norm_sq: f32 = embedding.iter().map(|v| v * v).sum();
        if norm_sq > 0.0 {
            let inv = 1.0 / norm_sq.sqrt();
            for v in &mut embedding {
                *v *= inv;
            }
        }

        Ok(embedding)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
