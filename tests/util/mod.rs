//! Shared test fixtures: deterministic embedders and coordinator builders.
//!
//! The embedders here satisfy the engine contract (unit-norm vectors,
//! identical text → identical vector) without any model files, which is what
//! the `Embedder` seam exists for.
#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

use semstore::ann::IndexParams;
use semstore::coordinator::Coordinator;
use semstore::error::{Error, Result};
use semstore::inference::Embedder;
use semstore::store::DocumentStore;

pub const TEST_DIMENSION: usize = 16;

/// Deterministic embedder: hashes the text into an LCG seed and emits a
/// unit-norm pseudo-random vector. Equal texts embed equally; distinct texts
/// land far apart with overwhelming probability.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut state = hasher.finish() | 1;

        let mut v = Vec::with_capacity(self.dimension);
        for _ in 0..self.dimension {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            let unit = (state >> 33) as f32 / (1u64 << 31) as f32;
            v.push(unit - 0.5);
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt() + 1e-12;
        Ok(v.into_iter().map(|x| x / norm).collect())
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Marker that makes [`FlakyEmbedder`] fail a text on purpose.
pub const POISON: &str = "<<poison>>";

/// Embedder that fails for texts containing [`POISON`], for exercising
/// compensation and rollback paths.
pub struct FlakyEmbedder {
    inner: HashEmbedder,
}

impl FlakyEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            inner: HashEmbedder::new(dimension),
        }
    }
}

impl Embedder for FlakyEmbedder {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.contains(POISON) {
            return Err(Error::Inference("poisoned text".to_string()));
        }
        self.inner.embed(text)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Open a store at `db_path`, attach `embedder`, and load or create the
/// index at `index_path`.
pub fn coordinator_with(
    db_path: &Path,
    index_path: &Path,
    embedder: Box<dyn Embedder>,
) -> Coordinator {
    let store = DocumentStore::open(db_path).expect("open store");
    let mut coordinator = Coordinator::new(store, IndexParams::default());
    coordinator.set_engine(embedder);
    coordinator
        .load_or_create_index(index_path)
        .expect("load or create index");
    coordinator
}

/// Standard test coordinator with a [`HashEmbedder`].
pub fn test_coordinator(db_path: &Path, index_path: &Path) -> Coordinator {
    coordinator_with(db_path, index_path, Box::new(HashEmbedder::new(TEST_DIMENSION)))
}
