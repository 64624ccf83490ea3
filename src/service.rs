use std::sync::Arc;

use crate::{
    encoder::Encoder,
    entry::Entry,
    error::Result,
    search::{self, SearchOutcome, SearchParams},
    store::KnowledgeBase,
};

/// Shared handle used by the async front ends.
///
/// Searches block on disk and on the encoder, so they run on tokio's
/// blocking pool. Cloning is cheap; every clone shares the same store and
/// the same loaded model.
#[derive(Clone)]
pub struct SearchService {
    kb: Arc<KnowledgeBase>,
    encoder: Arc<dyn Encoder>,
}

impl SearchService {
    pub fn new(kb: Arc<KnowledgeBase>, encoder: Arc<dyn Encoder>) -> Self {
        Self { kb, encoder }
    }

    pub fn knowledge_base(&self) -> &KnowledgeBase {
        &self.kb
    }

    pub fn encoder(&self) -> &dyn Encoder {
        self.encoder.as_ref()
    }

    pub async fn search(&self, params: SearchParams) -> Result<SearchOutcome> {
        let kb = Arc::clone(&self.kb);
        let encoder = Arc::clone(&self.encoder);
        tokio::task::spawn_blocking(move || {
            search::execute_search(&params, kb.as_ref(), encoder.as_ref())
        })
        .await?
    }

    pub async fn get(&self, id: u64) -> Result<Option<Entry>> {
        let kb = Arc::clone(&self.kb);
        tokio::task::spawn_blocking(move || kb.get(id)).await?
    }
}

impl std::fmt::Debug for SearchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchService")
            .field("kb", &self.kb)
            .field("encoder", &self.encoder.model_id())
            .finish()
    }
}
