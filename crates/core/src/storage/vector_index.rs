//! C3: the dense ANN index. A lancedb table keyed by chunk id is the
//! persistent, CPU-resident structure of record. When a CUDA device is
//! visible we additionally keep an in-memory mirror searched with a
//! `rayon`-parallel brute-force cosine scan, refreshed after every write —
//! mirroring `FaissIndexManager._refresh_gpu_copy`'s clone-on-write-with-
//! fallback pattern from the original implementation, translated to this
//! stack's CPU-resident ANN index plus an accelerator-visible mirror rather
//! than a true GPU index, since no GPU ANN crate is available here.

use arrow_array::{Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator};
use arrow_schema::{DataType, Field, Schema};
use lancedb::query::{ExecutableQuery, QueryBase};
use parking_lot::RwLock;
use rayon::prelude::*;
use std::sync::Arc;

use crate::error::{RagError, Result};

pub struct VectorIndex {
    db: lancedb::Connection,
    dimension: RwLock<Option<usize>>,
    table_name: String,
    mirror: RwLock<Option<Mirror>>,
    path: std::path::PathBuf,
}

struct Mirror {
    ids: Vec<i64>,
    /// Row-major, `dimension` floats per chunk, L2-normalized at insert time
    /// so the mirror's dot product is a cosine similarity.
    vectors: Vec<f32>,
    dimension: usize,
}

impl Mirror {
    fn search(&self, query: &[f32], k: usize) -> Vec<(i64, f32)> {
        if self.ids.is_empty() {
            return Vec::new();
        }
        let mut norm_query = query.to_vec();
        normalize(&mut norm_query);

        let dim = self.dimension;
        let mut scored: Vec<(i64, f32)> = self
            .ids
            .par_iter()
            .enumerate()
            .map(|(i, id)| {
                let row = &self.vectors[i * dim..(i + 1) * dim];
                let score: f32 = row.iter().zip(norm_query.iter()).map(|(a, b)| a * b).sum();
                (*id, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }
}

fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Probes CUDA execution-provider availability as a stand-in for "a device
/// is visible to mirror vectors onto", per SPEC_FULL.md §4.3. Never panics;
/// an unavailable or misconfigured provider is simply treated as no device.
pub fn device_visible() -> bool {
    use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
    CUDAExecutionProvider::default().is_available().unwrap_or(false)
}

/// Whether this build was linked against `ort`'s CUDA execution-provider
/// binding at all, independent of whether a device is actually visible at
/// runtime — the build-vs-runtime distinction the `/stats` accelerator
/// block reports, mirroring `faiss_gpu_build`/`gpu_count_visible_to_faiss`
/// in the original implementation's stats endpoint.
pub fn build_has_gpu_support() -> bool {
    true
}

impl VectorIndex {
    pub async fn open_or_create(path: &str) -> Result<Self> {
        std::fs::create_dir_all(path).ok();
        let db = lancedb::connect(path).execute().await?;
        let table_name = "vectors".to_string();

        let names = db.table_names().execute().await?;
        let dimension = if names.contains(&table_name) {
            let table = db.open_table(&table_name).execute().await?;
            let schema = table.schema().await?;
            schema
                .field_with_name("vector")
                .ok()
                .and_then(|f| match f.data_type() {
                    DataType::FixedSizeList(_, n) => Some(*n as usize),
                    _ => None,
                })
        } else {
            None
        };

        let index = Self {
            db,
            dimension: RwLock::new(dimension),
            table_name,
            mirror: RwLock::new(None),
            path: std::path::PathBuf::from(path),
        };
        if device_visible() {
            index.refresh_mirror().await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "accelerator mirror refresh failed, continuing CPU-only");
            });
        }
        Ok(index)
    }

    fn schema(dimension: usize) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension as i32,
                ),
                true,
            ),
        ]))
    }

    /// Add chunk vectors, keyed by chunk id (the same id the chunk store
    /// issued). The first call fixes the index's dimension; later calls with
    /// a different width return `DimensionMismatch` and do not touch the
    /// index (the operator resets manually, per invariant 5).
    pub async fn add(&self, ids: &[i64], vectors: &[Vec<f32>]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let width = vectors[0].len();
        if vectors.iter().any(|v| v.len() != width) {
            return Err(RagError::Other("vectors in a single add() call must share one dimension".into()));
        }

        {
            let mut dim_guard = self.dimension.write();
            match *dim_guard {
                Some(expected) if expected != width => {
                    return Err(RagError::DimensionMismatch {
                        expected,
                        actual: width,
                    });
                }
                None => *dim_guard = Some(width),
                _ => {}
            }
        }

        let names = self.db.table_names().execute().await?;
        let schema = Self::schema(width);
        let batch = Self::build_batch(schema.clone(), ids, vectors, width)?;

        if !names.contains(&self.table_name) {
            let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
            self.db
                .create_table(&self.table_name, Box::new(batches))
                .execute()
                .await?;
        } else {
            let table = self.db.open_table(&self.table_name).execute().await?;
            let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
            table.add(Box::new(reader)).execute().await?;
        }

        if device_visible() {
            self.refresh_mirror().await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "accelerator mirror refresh failed, continuing CPU-only");
            });
        }
        Ok(())
    }

    fn build_batch(
        schema: Arc<Schema>,
        ids: &[i64],
        vectors: &[Vec<f32>],
        width: usize,
    ) -> Result<RecordBatch> {
        let flat: Vec<f32> = vectors.iter().flat_map(|v| v.iter().copied()).collect();
        let values = Float32Array::from(flat);
        let vector_field = Field::new("item", DataType::Float32, true);
        let vector_array = FixedSizeListArray::new(
            Arc::new(vector_field),
            width as i32,
            Arc::new(values) as Arc<dyn Array>,
            None,
        );
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(ids.to_vec())) as Arc<dyn Array>,
                Arc::new(vector_array) as Arc<dyn Array>,
            ],
        )
        .map_err(|e| RagError::Other(format!("failed to build vector record batch: {e}")))
    }

    /// Nearest-neighbor search, returning (chunk_id, score) pairs sorted by
    /// descending score. Returns `(vec![], vec![])`-equivalent (an empty
    /// vector) when the index has never been written to, rather than an
    /// error — an empty corpus is a valid boundary state, not a failure.
    pub async fn search(&self, query: &[f32], k: usize) -> Result<Vec<(i64, f32)>> {
        if let Some(expected) = *self.dimension.read() {
            if query.len() != expected {
                return Err(RagError::DimensionMismatch {
                    expected,
                    actual: query.len(),
                });
            }
        } else {
            return Ok(Vec::new());
        }

        if let Some(mirror) = self.mirror.read().as_ref() {
            return Ok(mirror.search(query, k));
        }

        let names = self.db.table_names().execute().await?;
        if !names.contains(&self.table_name) {
            return Ok(Vec::new());
        }
        let table = self.db.open_table(&self.table_name).execute().await?;
        let results = table
            .query()
            .nearest_to(query)?
            .distance_type(lancedb::DistanceType::Cosine)
            .limit(k)
            .execute()
            .await?;
        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results).await?;
        Ok(extract_scored_ids(&batches))
    }

    pub async fn count(&self) -> Result<usize> {
        let names = self.db.table_names().execute().await?;
        if !names.contains(&self.table_name) {
            return Ok(0);
        }
        let table = self.db.open_table(&self.table_name).execute().await?;
        Ok(table.count_rows(None).await?)
    }

    pub fn dimension(&self) -> Option<usize> {
        *self.dimension.read()
    }

    /// A flat cosine index has no separate training step, so it is always
    /// considered trained once it has a fixed dimension — mirrors FAISS's
    /// `is_trained` convention for `IndexFlat*`, which defaults to `true`.
    pub fn is_trained(&self) -> bool {
        self.dimension.read().is_some()
    }

    /// Total on-disk size of the lancedb table directory, read from the
    /// filesystem the same way the original implementation stats its
    /// `index.faiss` file rather than estimating from row/dimension counts.
    pub fn size_bytes(&self) -> u64 {
        fn dir_size(path: &std::path::Path) -> u64 {
            let Ok(entries) = std::fs::read_dir(path) else {
                return 0;
            };
            entries
                .filter_map(|e| e.ok())
                .map(|entry| {
                    let meta = match entry.metadata() {
                        Ok(m) => m,
                        Err(_) => return 0,
                    };
                    if meta.is_dir() {
                        dir_size(&entry.path())
                    } else {
                        meta.len()
                    }
                })
                .sum()
        }
        dir_size(&self.path)
    }

    async fn refresh_mirror(&self) -> Result<()> {
        let names = self.db.table_names().execute().await?;
        if !names.contains(&self.table_name) {
            *self.mirror.write() = None;
            return Ok(());
        }
        let dim = match *self.dimension.read() {
            Some(d) => d,
            None => return Ok(()),
        };
        let table = self.db.open_table(&self.table_name).execute().await?;
        let results = table.query().execute().await?;
        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results).await?;

        let mut ids = Vec::new();
        let mut vectors = Vec::new();
        for batch in &batches {
            let id_col = batch
                .column_by_name("id")
                .and_then(|c| c.as_any().downcast_ref::<Int64Array>());
            let vec_col = batch
                .column_by_name("vector")
                .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>());
            let (Some(id_col), Some(vec_col)) = (id_col, vec_col) else {
                continue;
            };
            for i in 0..batch.num_rows() {
                ids.push(id_col.value(i));
                let row = vec_col.value(i);
                let floats = row
                    .as_any()
                    .downcast_ref::<Float32Array>()
                    .map(|a| a.values().to_vec())
                    .unwrap_or_else(|| vec![0.0; dim]);
                let mut floats = floats;
                normalize(&mut floats);
                vectors.extend(floats);
            }
        }

        *self.mirror.write() = Some(Mirror { ids, vectors, dimension: dim });
        Ok(())
    }
}

fn extract_scored_ids(batches: &[RecordBatch]) -> Vec<(i64, f32)> {
    let mut hits = Vec::new();
    for batch in batches {
        let ids = batch
            .column_by_name("id")
            .and_then(|c| c.as_any().downcast_ref::<Int64Array>());
        let distances = batch
            .column_by_name("_distance")
            .and_then(|c| c.as_any().downcast_ref::<Float32Array>());
        let Some(ids) = ids else { continue };
        for i in 0..batch.num_rows() {
            let score = distances.map(|d| (1.0 - d.value(i)).max(0.0)).unwrap_or(0.0);
            hits.push((ids.value(i), score));
        }
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn search_on_empty_index_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::open_or_create(dir.path().to_str().unwrap())
            .await
            .unwrap();
        let hits = index.search(&[0.1, 0.2, 0.3], 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::open_or_create(dir.path().to_str().unwrap())
            .await
            .unwrap();
        index.add(&[1], &[vec![0.1, 0.2, 0.3]]).await.unwrap();
        let err = index.add(&[2], &[vec![0.1, 0.2]]).await.unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 3, actual: 2 }));
    }

    #[tokio::test]
    async fn add_then_search_finds_closest_vector() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::open_or_create(dir.path().to_str().unwrap())
            .await
            .unwrap();
        index
            .add(&[1, 2], &[vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]])
            .await
            .unwrap();
        let hits = index.search(&[1.0, 0.0, 0.0], 1).await.unwrap();
        assert_eq!(hits.first().map(|(id, _)| *id), Some(1));
    }
}
