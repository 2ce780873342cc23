use crate::error::{MatchError, Result};
use crate::traits::Embedder;
use crate::types::{Chunk, ChunkMetadata, Embedding};

/// Sliding window over whitespace-delimited words.
///
/// Windows start at `0, stride, 2*stride, ...` and stop once a window reaches the
/// last word, so consecutive chunks overlap by `window_size - stride` words and only
/// the final chunk may be shorter than `window_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingWindowChunker {
    window_size: usize,
    stride: usize,
}

impl Default for SlidingWindowChunker {
    fn default() -> Self {
        Self { window_size: 5, stride: 3 }
    }
}

impl SlidingWindowChunker {
    pub fn new(window_size: usize, stride: usize) -> Result<Self> {
        if window_size == 0 || stride == 0 {
            return Err(MatchError::InvalidConfig(format!(
                "window_size ({window_size}) and stride ({stride}) must be positive"
            )));
        }
        if stride > window_size {
            return Err(MatchError::InvalidConfig(format!(
                "stride ({stride}) must be <= window_size ({window_size})"
            )));
        }
        Ok(Self { window_size, stride })
    }

    pub fn window_size(&self) -> usize { self.window_size }
    pub fn stride(&self) -> usize { self.stride }

    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let n = words.len();
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < n {
            let end = (start + self.window_size).min(n);
            chunks.push(Chunk {
                text: words[start..end].join(" "),
                metadata: ChunkMetadata { word_range: (start, end), length: end - start },
            });
            if end == n { break; }
            start += self.stride;
        }
        chunks
    }
}

/// Embeds `text` as the element-wise mean of its chunk embeddings.
///
/// Text that yields no chunks is embedded whole.
pub async fn embed_with_chunking(
    chunker: &SlidingWindowChunker,
    embedder: &dyn Embedder,
    text: &str,
) -> Result<Embedding> {
    let chunks = chunker.chunk(text);
    if chunks.is_empty() {
        return embedder.embed(text).await;
    }
    let mut vectors = Vec::with_capacity(chunks.len());
    for chunk in &chunks {
        vectors.push(embedder.embed(&chunk.text).await?);
    }
    mean_embedding(&vectors)
}

pub fn mean_embedding(vectors: &[Embedding]) -> Result<Embedding> {
    let Some(first) = vectors.first() else {
        return Err(MatchError::InvalidOutput("cannot average zero embeddings".into()));
    };
    let dim = first.len();
    let mut sum = vec![0f32; dim];
    for v in vectors {
        if v.len() != dim {
            return Err(MatchError::InvalidOutput(format!(
                "chunk embedding dimension mismatch: expected {dim}, got {}",
                v.len()
            )));
        }
        for (acc, x) in sum.iter_mut().zip(v) { *acc += x; }
    }
    let count = vectors.len() as f32;
    for x in &mut sum { *x /= count; }
    Ok(sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    fn expected_count(n: usize, w: usize, s: usize) -> usize {
        if n == 0 { 0 } else { n.saturating_sub(w).div_ceil(s) + 1 }
    }

    #[test]
    fn chunk_count_matches_closed_form() {
        for (w, s) in [(5, 3), (4, 4), (3, 1), (7, 2)] {
            let chunker = SlidingWindowChunker::new(w, s).unwrap();
            for n in 0..40 {
                let chunks = chunker.chunk(&words(n));
                assert_eq!(chunks.len(), expected_count(n, w, s), "n={n} w={w} s={s}");
                assert!(chunks.iter().all(|c| c.metadata.length <= w));
            }
        }
    }

    #[test]
    fn consecutive_chunks_overlap_by_window_minus_stride() {
        let chunker = SlidingWindowChunker::new(5, 3).unwrap();
        let chunks = chunker.chunk(&words(20));
        for pair in chunks.windows(2) {
            let (a, b) = (pair[0].metadata.word_range, pair[1].metadata.word_range);
            assert_eq!(a.1.saturating_sub(b.0), 2);
        }
        assert_eq!(chunks.last().unwrap().metadata.word_range.1, 20);
    }

    #[test]
    fn degenerate_inputs() {
        let chunker = SlidingWindowChunker::default();
        assert!(chunker.chunk("").is_empty());
        assert!(chunker.chunk(" \n\t ").is_empty());
        let one = chunker.chunk("Swift");
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].text, "Swift");
        assert_eq!(one[0].metadata.word_range, (0, 1));
    }

    #[test]
    fn rejects_invalid_geometry() {
        assert!(matches!(SlidingWindowChunker::new(3, 4), Err(MatchError::InvalidConfig(_))));
        assert!(SlidingWindowChunker::new(0, 0).is_err());
        assert!(SlidingWindowChunker::new(4, 0).is_err());
    }

    #[test]
    fn mean_is_elementwise() {
        let mean = mean_embedding(&[vec![1.0, 2.0], vec![3.0, 6.0]]).unwrap();
        assert_eq!(mean, vec![2.0, 4.0]);
        assert!(mean_embedding(&[vec![1.0], vec![1.0, 2.0]]).is_err());
    }
}
