//! In-memory vector index (C4).
//!
//! Default backend is a brute-force flat L2 index, matching the original's
//! `faiss.IndexFlatL2` usage exactly (including its similarity mapping).
//! An optional `usearch-hnsw` feature swaps in an approximate HNSW index for
//! larger corpora, following the teacher's pattern of a pluggable vector
//! backend behind a cargo feature.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Metadata kept alongside each indexed vector, enough to rehydrate a full
/// result row (spec §4.4's `{record_id, file_path, file_name, file_type,
/// data}` parallel map) without a second store lookup.
#[derive(Debug, Clone)]
pub struct VectorMeta {
    /// The record id this vector belongs to.
    pub record_id: String,
    /// Source file path.
    pub file_path: String,
    /// Source file name (final path component).
    pub file_name: String,
    /// File type, derived from the extension.
    pub file_type: String,
    /// The record's flattened data payload.
    pub data: BTreeMap<String, Value>,
}

/// A single vector search hit.
#[derive(Debug, Clone)]
pub struct VectorHit {
    /// The record id this vector belongs to.
    pub record_id: String,
    /// Source file path.
    pub file_path: String,
    /// Source file name (final path component).
    pub file_name: String,
    /// File type, derived from the extension.
    pub file_type: String,
    /// The record's flattened data payload.
    pub data: BTreeMap<String, Value>,
    /// Similarity score, `10.0 / (1.0 + l2_distance)`.
    ///
    /// Deliberately NOT normalized to `[0, 1]` — this preserves the
    /// original's exact scale, under which a similarity_threshold of 0.6 is
    /// a very loose filter rather than a literal 60%-cosine-style cutoff.
    pub similarity: f32,
}

/// Brute-force flat L2 vector index.
pub struct FlatIndex {
    dim: usize,
    vectors: Vec<Vec<f32>>,
    meta: Vec<VectorMeta>,
    by_record_id: HashMap<String, usize>,
}

impl FlatIndex {
    /// Construct an empty index for vectors of dimension `dim`.
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            vectors: Vec::new(),
            meta: Vec::new(),
            by_record_id: HashMap::new(),
        }
    }

    /// Number of vectors currently indexed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Whether the index holds no vectors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Insert a vector, replacing any existing entry for the same `record_id`.
    #[allow(clippy::too_many_arguments)]
    pub fn insert(
        &mut self,
        record_id: String,
        file_path: String,
        file_name: String,
        file_type: String,
        data: BTreeMap<String, Value>,
        vector: Vec<f32>,
    ) {
        if vector.len() != self.dim {
            return;
        }
        if let Some(&pos) = self.by_record_id.get(&record_id) {
            self.vectors[pos] = vector;
            self.meta[pos] = VectorMeta { record_id, file_path, file_name, file_type, data };
            return;
        }
        let pos = self.vectors.len();
        self.by_record_id.insert(record_id.clone(), pos);
        self.vectors.push(vector);
        self.meta.push(VectorMeta { record_id, file_path, file_name, file_type, data });
    }

    /// Remove every vector belonging to any of `record_ids`.
    pub fn remove_records(&mut self, record_ids: &[String]) {
        let remove_set: std::collections::HashSet<&String> = record_ids.iter().collect();
        let mut kept_vectors = Vec::with_capacity(self.vectors.len());
        let mut kept_meta = Vec::with_capacity(self.meta.len());
        for (vector, meta) in self.vectors.drain(..).zip(self.meta.drain(..)) {
            if !remove_set.contains(&meta.record_id) {
                kept_vectors.push(vector);
                kept_meta.push(meta);
            }
        }
        self.vectors = kept_vectors;
        self.meta = kept_meta;
        self.by_record_id.clear();
        for (idx, meta) in self.meta.iter().enumerate() {
            self.by_record_id.insert(meta.record_id.clone(), idx);
        }
    }

    /// Search for the `top_k` nearest vectors to `query`, by L2 distance,
    /// mapped to similarity via `10.0 / (1.0 + distance)`.
    #[must_use]
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<VectorHit> {
        if query.len() != self.dim {
            return Vec::new();
        }
        let mut scored: Vec<(f32, usize)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(idx, v)| (l2_distance(query, v), idx))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        scored
            .into_iter()
            .take(top_k)
            .map(|(distance, idx)| {
                let meta = &self.meta[idx];
                VectorHit {
                    record_id: meta.record_id.clone(),
                    file_path: meta.file_path.clone(),
                    file_name: meta.file_name.clone(),
                    file_type: meta.file_type.clone(),
                    data: meta.data.clone(),
                    similarity: 10.0 / (1.0 + distance),
                }
            })
            .collect()
    }
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

#[cfg(feature = "usearch-hnsw")]
pub mod hnsw {
    //! HNSW-backed vector index, used in place of [`super::FlatIndex`] when
    //! the `usearch-hnsw` feature is enabled.

    use super::{VectorHit, VectorMeta};
    use serde_json::Value;
    use std::collections::{BTreeMap, HashMap};
    use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

    /// An approximate nearest-neighbor index backed by `usearch`.
    pub struct HnswIndex {
        index: Index,
        meta: HashMap<u64, VectorMeta>,
        next_key: u64,
        by_record_id: HashMap<String, u64>,
    }

    impl HnswIndex {
        /// Construct a new HNSW index for vectors of dimension `dim`.
        ///
        /// # Errors
        /// Returns an error if the underlying `usearch` index cannot be created.
        pub fn new(dim: usize) -> Result<Self, usearch::Error> {
            let options = IndexOptions {
                dimensions: dim,
                metric: MetricKind::L2sq,
                quantization: ScalarKind::F32,
                ..IndexOptions::default()
            };
            let index = Index::new(&options)?;
            index.reserve(1024)?;
            Ok(Self {
                index,
                meta: HashMap::new(),
                next_key: 0,
                by_record_id: HashMap::new(),
            })
        }

        /// Insert a vector, replacing any existing entry for `record_id`.
        ///
        /// # Errors
        /// Returns an error if the underlying index rejects the insertion.
        #[allow(clippy::too_many_arguments)]
        pub fn insert(
            &mut self,
            record_id: String,
            file_path: String,
            file_name: String,
            file_type: String,
            data: BTreeMap<String, Value>,
            vector: &[f32],
        ) -> Result<(), usearch::Error> {
            if let Some(&key) = self.by_record_id.get(&record_id) {
                let _ = self.index.remove(key);
                self.meta.remove(&key);
            }
            let key = self.next_key;
            self.next_key += 1;
            if self.index.size() + 1 > self.index.capacity() {
                self.index.reserve(self.index.capacity() * 2 + 1)?;
            }
            self.index.add(key, vector)?;
            self.by_record_id.insert(record_id.clone(), key);
            self.meta.insert(key, VectorMeta { record_id, file_path, file_name, file_type, data });
            Ok(())
        }

        /// Remove every vector belonging to any of `record_ids`.
        pub fn remove_records(&mut self, record_ids: &[String]) {
            for record_id in record_ids {
                if let Some(key) = self.by_record_id.remove(record_id) {
                    let _ = self.index.remove(key);
                    self.meta.remove(&key);
                }
            }
        }

        /// Search for the `top_k` nearest vectors to `query`.
        ///
        /// # Errors
        /// Returns an error if the underlying search call fails.
        pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<VectorHit>, usearch::Error> {
            let matches = self.index.search(query, top_k)?;
            Ok(matches
                .keys
                .iter()
                .zip(matches.distances.iter())
                .filter_map(|(key, distance)| {
                    self.meta.get(key).map(|m| VectorHit {
                        record_id: m.record_id.clone(),
                        file_path: m.file_path.clone(),
                        file_name: m.file_name.clone(),
                        file_type: m.file_type.clone(),
                        data: m.data.clone(),
                        similarity: 10.0 / (1.0 + distance),
                    })
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert_basic(index: &mut FlatIndex, record_id: &str, file_path: &str, vector: Vec<f32>) {
        index.insert(
            record_id.to_string(),
            file_path.to_string(),
            file_path.to_string(),
            "text".to_string(),
            BTreeMap::new(),
            vector,
        );
    }

    #[test]
    fn search_ranks_by_l2_distance_and_maps_similarity() {
        let mut index = FlatIndex::new(2);
        insert_basic(&mut index, "a", "a.txt", vec![0.0, 0.0]);
        insert_basic(&mut index, "b", "b.txt", vec![1.0, 0.0]);
        let hits = index.search(&[0.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record_id, "a");
        assert!((hits[0].similarity - 10.0).abs() < 1e-6);
        assert!((hits[1].similarity - 5.0).abs() < 1e-6);
    }

    #[test]
    fn remove_records_drops_matching_entries() {
        let mut index = FlatIndex::new(1);
        insert_basic(&mut index, "a", "a.txt", vec![0.0]);
        insert_basic(&mut index, "b", "b.txt", vec![1.0]);
        index.remove_records(&["a".to_string()]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.search(&[0.0], 1)[0].record_id, "b");
    }

    #[test]
    fn insert_replaces_existing_vector_for_same_record_id() {
        let mut index = FlatIndex::new(1);
        insert_basic(&mut index, "a", "a.txt", vec![0.0]);
        insert_basic(&mut index, "a", "a.txt", vec![5.0]);
        assert_eq!(index.len(), 1);
        let hits = index.search(&[5.0], 1);
        assert!((hits[0].similarity - 10.0).abs() < 1e-6);
    }

    #[test]
    fn search_hits_carry_full_record_metadata() {
        let mut index = FlatIndex::new(1);
        let mut data = BTreeMap::new();
        data.insert("title".to_string(), Value::String("doc".to_string()));
        index.insert(
            "a".to_string(),
            "a.txt".to_string(),
            "a.txt".to_string(),
            "text".to_string(),
            data,
            vec![0.0],
        );
        let hits = index.search(&[0.0], 1);
        assert_eq!(hits[0].file_name, "a.txt");
        assert_eq!(hits[0].file_type, "text");
        assert_eq!(hits[0].data.get("title").unwrap(), "doc");
    }
}
