use std::path::Path;
use std::sync::Arc;

use cvmatch_core::{Embedder, EmbeddingModelKind};

pub mod device;
pub mod hashed;
pub mod pool;
pub mod tokenize;
pub mod transformer;

pub use hashed::HashedEmbedder;
pub use transformer::{Architecture, ModelProfile, TransformerEmbedder};

/// Builds the embedder for `kind`. Model files live in `model_root/<kind>/`;
/// nothing is read until `load_model` is called.
pub fn embedder_for(kind: EmbeddingModelKind, model_root: &Path) -> Arc<dyn Embedder> {
    match kind {
        EmbeddingModelKind::MiniLm => Arc::new(TransformerEmbedder::new(ModelProfile {
            id: kind.as_str(),
            architecture: Architecture::Bert,
            dim: kind.dimension(),
            max_len: 128,
            model_dir: model_root.join(kind.as_str()),
        })),
        EmbeddingModelKind::BgeM3 => Arc::new(TransformerEmbedder::new(ModelProfile {
            id: kind.as_str(),
            architecture: Architecture::XlmRoberta,
            dim: kind.dimension(),
            max_len: 256,
            model_dir: model_root.join(kind.as_str()),
        })),
        EmbeddingModelKind::Hashed => Arc::new(HashedEmbedder::new(kind.dimension())),
    }
}
