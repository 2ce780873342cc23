use std::hash::Hasher;

use async_trait::async_trait;
use twox_hash::XxHash64;

use cvmatch_core::similarity::l2_normalize;
use cvmatch_core::{Embedder, Embedding, Result};

/// Feature-hashing embedder: lower-cased word tokens hashed into `dim` buckets.
/// Needs no model files, so loading never fails. Text without word tokens
/// embeds as the zero vector, which scores 0 against everything.
pub struct HashedEmbedder {
    dim: usize,
}

impl HashedEmbedder {
    pub fn new(dim: usize) -> Self { Self { dim: dim.max(1) } }

    fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split(|c: char| !c.is_alphanumeric() && c != '+' && c != '#')
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
    }
}

#[async_trait]
impl Embedder for HashedEmbedder {
    fn id(&self) -> &str { "hashed" }
    fn dim(&self) -> usize { self.dim }

    async fn load_model(&self) -> Result<()> { Ok(()) }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut v = vec![0f32; self.dim];
        let mut any = false;
        for token in Self::tokens(text) {
            any = true;
            let mut hasher = XxHash64::with_seed(0);
            hasher.write(token.as_bytes());
            let h = hasher.finish();
            let idx = (h % self.dim as u64) as usize;
            // top bit picks the sign so unrelated tokens tend to cancel
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        if any {
            l2_normalize(&mut v);
        }
        Ok(v)
    }
}
