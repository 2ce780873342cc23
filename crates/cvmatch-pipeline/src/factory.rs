use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use cvmatch_core::{
    Embedder, EmbeddingModelKind, Generator, MatchSettings, PipelineSelection, PromptVersion, Result, RetrievalBackend,
    VectorStore,
};
use cvmatch_embed::embedder_for;
use cvmatch_generate::generator_for;
use cvmatch_vector::{ExactStore, LanceStore};

/// The four capabilities one run is composed from.
#[derive(Clone)]
pub struct Services {
    pub selection: PipelineSelection,
    pub embedder: Arc<dyn Embedder>,
    pub store: Arc<dyn VectorStore>,
    pub generator: Arc<dyn Generator>,
    pub prompt_version: PromptVersion,
}

/// Builds the services for a settings snapshot. Called once at the start of every run.
pub trait ServiceFactory: Send + Sync {
    fn compose(&self, settings: &MatchSettings) -> Result<Services>;
}

type StoreKey = (RetrievalBackend, EmbeddingModelKind, PathBuf);

/// Real embedders, stores and generators.
///
/// Embedders and stores are memoised so loaded models stay resident and each
/// (backend, model) store is reused across runs. Generators are rebuilt per run
/// so endpoint and key changes apply immediately.
#[derive(Default)]
pub struct StandardFactory {
    embedders: Mutex<HashMap<(EmbeddingModelKind, PathBuf), Arc<dyn Embedder>>>,
    stores: Mutex<HashMap<StoreKey, Arc<dyn VectorStore>>>,
}

impl StandardFactory {
    pub fn new() -> Self { Self::default() }

    fn embedder(&self, kind: EmbeddingModelKind, settings: &MatchSettings) -> Arc<dyn Embedder> {
        let root = settings.model_root();
        self.embedders
            .lock()
            .entry((kind, root.clone()))
            .or_insert_with(|| embedder_for(kind, &root))
            .clone()
    }

    fn store(&self, backend: RetrievalBackend, kind: EmbeddingModelKind, settings: &MatchSettings) -> Arc<dyn VectorStore> {
        let uri = settings.lancedb_path();
        self.stores
            .lock()
            .entry((backend, kind, uri.clone()))
            .or_insert_with(|| match backend {
                RetrievalBackend::Exact => Arc::new(ExactStore::new()),
                RetrievalBackend::Approximate => {
                    let table = format!("{}_{}", settings.store.table_prefix, kind.as_str());
                    Arc::new(LanceStore::new(uri, table, settings.store.ann_min_rows))
                }
            })
            .clone()
    }
}

impl ServiceFactory for StandardFactory {
    fn compose(&self, settings: &MatchSettings) -> Result<Services> {
        let selection = settings.pipeline;
        debug!(
            embedding = %selection.embedding_model,
            generator = %selection.generative_model,
            backend = %selection.retrieval_backend,
            prompt = %selection.prompt_version,
            "composing services"
        );
        Ok(Services {
            selection,
            embedder: self.embedder(selection.embedding_model, settings),
            store: self.store(selection.retrieval_backend, selection.embedding_model, settings),
            generator: generator_for(selection.generative_model, &settings.generation)?,
            prompt_version: selection.prompt_version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_are_shared_per_backend_and_model() {
        let factory = StandardFactory::new();
        let mut settings = MatchSettings::default();
        settings.pipeline.retrieval_backend = RetrievalBackend::Exact;
        settings.pipeline.embedding_model = EmbeddingModelKind::Hashed;
        let a = factory.compose(&settings).unwrap();
        let b = factory.compose(&settings).unwrap();
        assert!(Arc::ptr_eq(&a.store, &b.store));
        assert!(Arc::ptr_eq(&a.embedder, &b.embedder));

        settings.pipeline.embedding_model = EmbeddingModelKind::MiniLm;
        let c = factory.compose(&settings).unwrap();
        assert!(!Arc::ptr_eq(&a.store, &c.store));
        assert_eq!(c.embedder.id(), "mini_lm");
        assert_eq!(c.store.id(), "exact");
    }

    #[test]
    fn every_axis_combination_composes() {
        let factory = StandardFactory::new();
        let mut settings = MatchSettings::default();
        for e in EmbeddingModelKind::ALL {
            for g in cvmatch_core::GenerativeModelKind::ALL {
                for r in RetrievalBackend::ALL {
                    for p in PromptVersion::ALL {
                        settings.pipeline = PipelineSelection {
                            embedding_model: *e,
                            generative_model: *g,
                            retrieval_backend: *r,
                            prompt_version: *p,
                        };
                        let s = factory.compose(&settings).unwrap();
                        assert_eq!(s.selection, settings.pipeline);
                        assert_eq!(s.generator.id(), g.as_str());
                    }
                }
            }
        }
    }
}
