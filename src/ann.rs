//! HNSW approximate nearest-neighbor index over unit-norm embeddings.
//!
//! Thin wrapper around `hnsw_rs` with Euclidean (L2) distance. Vectors are
//! appended at consecutive internal positions; there is no per-vector
//! delete, so the coordinator rebuilds the whole index on update/delete.
//!
//! Serialization uses `hnsw_rs`'s dump format, which writes a graph and a
//! data file next to the configured index path: `<path>.hnsw.graph` and
//! `<path>.hnsw.data`. "The index file exists" means the graph file exists.

use std::path::{Path, PathBuf};

use hnsw_rs::hnswio::HnswIo;
use hnsw_rs::prelude::*;

use crate::error::{Error, Result};

/// Graph construction parameters.
///
/// `m` is the HNSW graph degree, `ef_construction` the candidate-list size
/// during build. Larger values raise recall and build cost.
#[derive(Debug, Clone)]
pub struct IndexParams {
    pub m: usize,
    pub ef_construction: usize,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
        }
    }
}

const MAX_LAYER: usize = 16;
const CAPACITY_HINT: usize = 65_536;

pub struct AnnIndex {
    hnsw: Hnsw<'static, f32, DistL2>,
    dimension: usize,
    count: usize,
}

impl AnnIndex {
    /// Fresh empty index of the given dimension.
    pub fn new(dimension: usize, params: &IndexParams) -> Self {
        let hnsw = Hnsw::<f32, DistL2>::new(
            params.m,
            CAPACITY_HINT,
            MAX_LAYER,
            params.ef_construction,
            DistL2,
        );
        Self {
            hnsw,
            dimension,
            count: 0,
        }
    }

    /// Append vectors at internal positions `[count, count + n)`.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        for v in vectors {
            if v.len() != self.dimension {
                return Err(Error::ModelShape(format!(
                    "vector dimension {} does not match index dimension {}",
                    v.len(),
                    self.dimension
                )));
            }
        }
        let base = self.count;
        let items: Vec<(&[f32], usize)> = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (v.as_slice(), base + i))
            .collect();
        self.hnsw.parallel_insert_slice(&items);
        self.count += vectors.len();
        Ok(())
    }

    /// Nearest neighbors as `(distance, position)` pairs, nearest first.
    /// Fewer than `k` entries come back when the index holds fewer points;
    /// callers must range-check positions against their own mapping.
    pub fn search(&self, query: &[f32], k: usize, ef_search: usize) -> Result<Vec<(f32, usize)>> {
        if query.len() != self.dimension {
            return Err(Error::ModelShape(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dimension
            )));
        }
        if k == 0 || self.count == 0 {
            return Ok(Vec::new());
        }
        let neighbours = self.hnsw.search(query, k, ef_search);
        Ok(neighbours
            .into_iter()
            .map(|n| (n.distance, n.d_id))
            .collect())
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Serialize the index next to `path` (graph + data file pair).
    pub fn save(&self, path: &Path) -> Result<()> {
        let (dir, basename) = split_index_path(path)?;
        std::fs::create_dir_all(&dir)?;
        self.hnsw
            .file_dump(&dir, &basename)
            .map_err(|e| Error::Io(std::io::Error::other(format!("dump index: {e}"))))?;
        Ok(())
    }

    /// Whether a serialized index exists at `path`.
    pub fn exists(path: &Path) -> bool {
        match Self::artifact_files(path) {
            Ok([graph, _data]) => graph.exists(),
            Err(_) => false,
        }
    }

    /// The two files backing a serialized index at `path`.
    pub fn artifact_files(path: &Path) -> Result<[PathBuf; 2]> {
        let (dir, basename) = split_index_path(path)?;
        Ok([
            dir.join(format!("{basename}.hnsw.graph")),
            dir.join(format!("{basename}.hnsw.data")),
        ])
    }

    /// Deserialize an index previously written by [`AnnIndex::save`].
    pub fn load(path: &Path, dimension: usize) -> Result<Self> {
        let (dir, basename) = split_index_path(path)?;
        // The loader's buffers must outlive the graph, so the loader is
        // leaked; loads happen once per process, at startup.
        let io: &'static mut HnswIo = Box::leak(Box::new(HnswIo::new(&dir, &basename)));
        let hnsw = io
            .load_hnsw::<f32, DistL2>()
            .map_err(|e| Error::Io(std::io::Error::other(format!("load index: {e}"))))?;
        let count = hnsw.get_nb_point();
        Ok(Self {
            hnsw,
            dimension,
            count,
        })
    }
}

fn split_index_path(path: &Path) -> Result<(PathBuf, String)> {
    let basename = path
        .file_name()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| Error::Config(format!("invalid index path: {}", path.display())))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, basename))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis_vectors() -> Vec<Vec<f32>> {
        vec![
            vec![1.0, 0.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0, 0.0],
            vec![0.0, 0.0, 1.0, 0.0],
            vec![0.0, 0.0, 0.0, 1.0],
        ]
    }

    #[test]
    fn nearest_neighbor_is_the_inserted_vector() {
        let mut index = AnnIndex::new(4, &IndexParams::default());
        index.add(&axis_vectors()).unwrap();
        assert_eq!(index.count(), 4);

        let hits = index.search(&[0.9, 0.1, 0.0, 0.0], 1, 64).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1, 0);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut index = AnnIndex::new(4, &IndexParams::default());
        assert!(index.add(&[vec![1.0, 0.0]]).is_err());
        assert!(index.search(&[1.0, 0.0], 1, 64).is_err());
    }

    #[test]
    fn empty_index_returns_no_hits() {
        let index = AnnIndex::new(4, &IndexParams::default());
        assert!(index.search(&[1.0, 0.0, 0.0, 0.0], 5, 64).unwrap().is_empty());
    }

    #[test]
    fn save_then_load_preserves_search_results() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("vectors.index");

        let mut index = AnnIndex::new(4, &IndexParams::default());
        index.add(&axis_vectors()).unwrap();
        index.save(&path).unwrap();
        assert!(AnnIndex::exists(&path));

        let reloaded = AnnIndex::load(&path, 4).unwrap();
        assert_eq!(reloaded.count(), 4);

        let query = [0.0, 0.8, 0.2, 0.0];
        let before = index.search(&query, 4, 128).unwrap();
        let after = reloaded.search(&query, 4, 128).unwrap();
        assert_eq!(
            before.iter().map(|(_, p)| *p).collect::<Vec<_>>(),
            after.iter().map(|(_, p)| *p).collect::<Vec<_>>()
        );
    }

    #[test]
    fn missing_index_does_not_exist() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(!AnnIndex::exists(&tmp.path().join("absent.index")));
    }
}
