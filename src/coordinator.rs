//! Index coordinator: keeps the document store, the ANN index, and the
//! position→id mapping consistent across mutations and restarts.
//!
//! Three invariants hold at the boundary of every public operation:
//!
//! 1. `mapping.len() == index.count() == store.count()`.
//! 2. The vector at ANN position `p` is the current embedding of the
//!    document whose id sits at `mapping[p]`.
//! 3. Reopening the persisted artifacts reproduces the same logical state
//!    (a stale index is detected by count mismatch and rebuilt).
//!
//! The ANN index has no per-vector delete, so update, delete, and
//! replace-in-place upsert all trigger a full rebuild: re-embed every stored
//! document and re-add in id order. Callers serialize access externally; the
//! coordinator itself is not thread-safe.

use std::collections::BTreeMap;
use std::path::Path;

use crate::ann::{AnnIndex, IndexParams};
use crate::error::{Error, Result};
use crate::inference::Embedder;
use crate::models::{Document, NewDocument, SearchResult};
use crate::store::DocumentStore;

/// Lifecycle of a coordinator. Only `Ready` serves reads and writes; a
/// failed rebuild is fatal and transitions to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Store is open but no embedding model is attached.
    NoModel,
    /// Fully initialized: model attached, index loaded or created.
    Ready,
    /// Shut down; all operations fail.
    Closed,
}

pub struct Coordinator {
    store: DocumentStore,
    engine: Option<Box<dyn Embedder>>,
    index: Option<AnnIndex>,
    mapping: Vec<String>,
    params: IndexParams,
    state: CoordinatorState,
}

impl Coordinator {
    /// Wrap an open store. The coordinator stays in `NoModel` until an
    /// embedder is attached and the index is loaded or created.
    pub fn new(store: DocumentStore, params: IndexParams) -> Self {
        Self {
            store,
            engine: None,
            index: None,
            mapping: Vec::new(),
            params,
            state: CoordinatorState::NoModel,
        }
    }

    pub fn set_engine(&mut self, engine: Box<dyn Embedder>) {
        self.engine = Some(engine);
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn close(&mut self) {
        self.state = CoordinatorState::Closed;
    }

    /// Deserialize the index at `path` if present, otherwise create an empty
    /// one; then bring index, mapping, and store back into agreement.
    ///
    /// After a successful deserialize, the mapping is reconstructed from the
    /// store's id order; a count mismatch (index older than the store) is
    /// logged and repaired by a full rebuild.
    pub fn load_or_create_index(&mut self, path: &Path) -> Result<()> {
        if self.state == CoordinatorState::Closed {
            return Err(Error::Closed);
        }
        let dimension = self.embedding_dimension()?;

        if AnnIndex::exists(path) {
            let index = AnnIndex::load(path, dimension)?;
            let indexed = index.count();
            self.index = Some(index);
            self.mapping = self.store.all_ids()?;
            tracing::info!(vectors = indexed, "loaded existing index");
            if self.mapping.len() != indexed {
                tracing::warn!(
                    documents = self.mapping.len(),
                    indexed,
                    "index out of sync with document store, rebuilding"
                );
                self.rebuild()?;
            }
        } else {
            tracing::info!(dimension, "creating new index");
            self.index = Some(AnnIndex::new(dimension, &self.params));
            self.rebuild()?;
        }

        self.state = CoordinatorState::Ready;
        Ok(())
    }

    /// Discard the index, re-embed every stored document in one batch, and
    /// re-add them in store id order. A failure here leaves the coordinator
    /// `Closed`.
    pub fn rebuild(&mut self) -> Result<()> {
        match self.rebuild_inner() {
            Ok(count) => {
                tracing::info!(vectors = count, "index rebuilt");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "index rebuild failed, closing coordinator");
                self.state = CoordinatorState::Closed;
                Err(e)
            }
        }
    }

    fn rebuild_inner(&mut self) -> Result<usize> {
        let dimension = self.embedding_dimension()?;
        let docs = self.store.get_all()?;
        let mut index = AnnIndex::new(dimension, &self.params);
        let mut mapping = Vec::with_capacity(docs.len());

        if !docs.is_empty() {
            let texts: Vec<String> = docs.iter().map(|d| d.text.clone()).collect();
            let embeddings = self.engine()?.embed_batch(&texts)?;
            index.add(&embeddings)?;
            mapping.extend(docs.iter().map(|d| d.id.clone()));
        }

        let count = index.count();
        self.index = Some(index);
        self.mapping = mapping;
        Ok(count)
    }

    /// Persist a document, embed it, and append the vector to the index.
    ///
    /// If embedding fails after the row was written, the row is deleted
    /// again so the store and index never diverge.
    pub fn add_document(
        &mut self,
        text: &str,
        metadata: &BTreeMap<String, String>,
        custom_id: Option<&str>,
    ) -> Result<String> {
        self.ensure_ready()?;
        let id = self.store.add(text, metadata, custom_id)?;

        let embedding = match self.engine()?.embed(text) {
            Ok(v) => v,
            Err(e) => {
                if let Err(del) = self.store.delete(&id) {
                    tracing::error!(id = %id, error = %del, "compensating delete failed");
                }
                return Err(e);
            }
        };

        self.index_mut()?.add(std::slice::from_ref(&embedding))?;
        self.mapping.push(id.clone());
        Ok(id)
    }

    /// Insert several documents under one store transaction. Embeddings are
    /// computed in a single batch; on any failure the transaction rolls back
    /// and the ANN index is untouched.
    pub fn add_documents(&mut self, docs: &[NewDocument]) -> Result<Vec<String>> {
        self.ensure_ready()?;
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        self.store.begin()?;
        match self.persist_and_embed(docs) {
            Ok((ids, embeddings)) => {
                self.store.commit()?;
                self.index_mut()?.add(&embeddings)?;
                self.mapping.extend(ids.iter().cloned());
                Ok(ids)
            }
            Err(e) => {
                if let Err(rb) = self.store.rollback() {
                    tracing::error!(error = %rb, "rollback failed");
                }
                Err(e)
            }
        }
    }

    fn persist_and_embed(
        &mut self,
        docs: &[NewDocument],
    ) -> Result<(Vec<String>, Vec<Vec<f32>>)> {
        let mut ids = Vec::with_capacity(docs.len());
        for doc in docs {
            ids.push(
                self.store
                    .add(&doc.text, &doc.metadata, doc.custom_id.as_deref())?,
            );
        }
        let texts: Vec<String> = docs.iter().map(|d| d.text.clone()).collect();
        let embeddings = self.engine()?.embed_batch(&texts)?;
        if embeddings.len() != docs.len() {
            return Err(Error::Inference(format!(
                "expected {} embeddings, got {}",
                docs.len(),
                embeddings.len()
            )));
        }
        Ok((ids, embeddings))
    }

    /// Insert-or-replace. A replaced document may already occupy an index
    /// position whose vector is now stale, so replacement rebuilds; a
    /// brand-new id takes the cheaper append path.
    pub fn upsert_document(
        &mut self,
        id: &str,
        text: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.ensure_ready()?;
        let existed = self.store.upsert(id, text, metadata)?;
        if existed {
            return self.rebuild();
        }

        match self.engine()?.embed(text) {
            Ok(embedding) => {
                self.index_mut()?.add(std::slice::from_ref(&embedding))?;
                self.mapping.push(id.to_string());
                Ok(())
            }
            Err(e) => {
                if let Err(del) = self.store.delete(id) {
                    tracing::error!(id = %id, error = %del, "compensating delete failed");
                }
                Err(e)
            }
        }
    }

    /// Update an existing document and rebuild. `Ok(false)` when the id is
    /// unknown; the index is untouched in that case.
    pub fn update_document(
        &mut self,
        id: &str,
        text: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<bool> {
        self.ensure_ready()?;
        if !self.store.update(id, text, metadata)? {
            return Ok(false);
        }
        self.rebuild()?;
        Ok(true)
    }

    /// Delete a document and rebuild. `Ok(false)` when the id is unknown.
    pub fn delete_document(&mut self, id: &str) -> Result<bool> {
        self.ensure_ready()?;
        if !self.store.delete(id)? {
            return Ok(false);
        }
        self.rebuild()?;
        Ok(true)
    }

    /// Semantic k-NN search. Results come back in the index's nearest-first
    /// order with `score = 1 / (1 + distance)`; hits below `threshold` are
    /// dropped.
    pub fn search_text(
        &self,
        query: &str,
        k: usize,
        threshold: f32,
        ef_search: usize,
    ) -> Result<Vec<SearchResult>> {
        self.ensure_ready()?;
        let index = self.index()?;
        if index.count() == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.engine()?.embed(query)?;
        let k = k.min(index.count());
        let neighbours = index.search(&embedding, k, ef_search)?;

        let mut results = Vec::with_capacity(neighbours.len());
        for (distance, position) in neighbours {
            if position >= self.mapping.len() {
                continue;
            }
            let score = 1.0 / (1.0 + distance);
            if score < threshold {
                continue;
            }
            if let Some(doc) = self.store.get(&self.mapping[position])? {
                results.push(SearchResult {
                    id: doc.id,
                    text: doc.text,
                    score,
                    metadata: doc.metadata,
                });
            }
        }
        Ok(results)
    }

    /// Exact metadata match, capped at `k`, score fixed at 1.0.
    pub fn search_by_metadata(
        &self,
        key: &str,
        value: &str,
        k: usize,
    ) -> Result<Vec<SearchResult>> {
        self.ensure_ready()?;
        Ok(self
            .store
            .get_by_metadata(key, value)?
            .into_iter()
            .take(k)
            .map(exact_match)
            .collect())
    }

    /// Substring match over document text, capped at `k`, score fixed at 1.0
    /// (still subject to `threshold`).
    pub fn search_substring(
        &self,
        query: &str,
        k: usize,
        threshold: f32,
    ) -> Result<Vec<SearchResult>> {
        self.ensure_ready()?;
        if threshold > 1.0 {
            return Ok(Vec::new());
        }
        Ok(self
            .store
            .search_substring(query)?
            .into_iter()
            .take(k)
            .map(exact_match)
            .collect())
    }

    /// Serialize the ANN index. Callers save after every successful mutation
    /// to bound crash loss to the last in-flight write; the store is already
    /// durable per transaction.
    pub fn save_index(&self, path: &Path) -> Result<()> {
        self.ensure_ready()?;
        self.index()?.save(path)
    }

    pub fn document(&self, id: &str) -> Result<Option<Document>> {
        self.ensure_ready()?;
        self.store.get(id)
    }

    pub fn all_documents(&self) -> Result<Vec<Document>> {
        self.ensure_ready()?;
        self.store.get_all()
    }

    pub fn document_count(&self) -> Result<u64> {
        self.ensure_ready()?;
        self.store.count()
    }

    pub fn documents_by_metadata(&self, key: &str, value: &str) -> Result<Vec<Document>> {
        self.ensure_ready()?;
        self.store.get_by_metadata(key, value)
    }

    pub fn metadata_count(&self, key: &str, value: &str) -> Result<u64> {
        self.ensure_ready()?;
        Ok(self.store.get_by_metadata(key, value)?.len() as u64)
    }

    /// Number of vectors currently in the ANN index.
    pub fn index_size(&self) -> usize {
        self.index.as_ref().map_or(0, AnnIndex::count)
    }

    /// Length of the position→id mapping (equal to the index size whenever
    /// the coordinator is `Ready`).
    pub fn mapping_len(&self) -> usize {
        self.mapping.len()
    }

    pub fn embedding_dimension(&self) -> Result<usize> {
        Ok(self.engine()?.dimension())
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            CoordinatorState::Ready => Ok(()),
            CoordinatorState::NoModel => Err(Error::EngineNotLoaded),
            CoordinatorState::Closed => Err(Error::Closed),
        }
    }

    fn engine(&self) -> Result<&dyn Embedder> {
        self.engine
            .as_deref()
            .ok_or(Error::EngineNotLoaded)
    }

    fn index(&self) -> Result<&AnnIndex> {
        self.index.as_ref().ok_or(Error::Closed)
    }

    fn index_mut(&mut self) -> Result<&mut AnnIndex> {
        self.index.as_mut().ok_or(Error::Closed)
    }
}

fn exact_match(doc: Document) -> SearchResult {
    SearchResult {
        id: doc.id,
        text: doc.text,
        score: 1.0,
        metadata: doc.metadata,
    }
}
